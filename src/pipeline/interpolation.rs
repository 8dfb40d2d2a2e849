//! Build variable interpolation
//!
//! Supports:
//! - %PHPCI% (always `1`)
//! - %COMMIT%, %PROJECT%, %BUILD%
//! - %PROJECT_TITLE%, %BUILD_PATH%, %BUILD_URI%
//! - The same tokens prefixed with `PHPCI_` (e.g. %PHPCI_COMMIT%)
//!
//! The same values are exported to child processes as `PHPCI_*` variables,
//! with `CI_*` duplicates.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::build::Build;

static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%([A-Z][A-Z_]*)%").expect("token pattern is valid"));

/// Token table for one build, computed once the working copy path is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolator {
    tokens: BTreeMap<String, String>,
    env: Vec<(String, String)>,
}

impl Interpolator {
    pub fn from_build(build: &Build, build_path: &Path, build_uri: &str) -> Self {
        let values = [
            ("COMMIT", build.commit_id.clone()),
            ("PROJECT", build.project.id.to_string()),
            ("BUILD", build.id.to_string()),
            ("PROJECT_TITLE", build.project.title.clone()),
            ("BUILD_PATH", build_path.display().to_string()),
            ("BUILD_URI", build_uri.to_string()),
        ];

        let mut tokens = BTreeMap::new();
        let mut env = vec![
            ("PHPCI".to_string(), "1".to_string()),
            ("CI".to_string(), "1".to_string()),
        ];
        tokens.insert("PHPCI".to_string(), "1".to_string());

        for (name, value) in values {
            tokens.insert(name.to_string(), value.clone());
            tokens.insert(format!("PHPCI_{}", name), value.clone());
            env.push((format!("PHPCI_{}", name), value.clone()));
            env.push((format!("CI_{}", name), value));
        }

        Self { tokens, env }
    }

    /// Substitute every recognized token in a single pass
    ///
    /// Values are not rescanned, and unknown `%WORD%` sequences are kept.
    pub fn interpolate(&self, input: &str) -> String {
        TOKEN_REGEX
            .replace_all(input, |caps: &regex::Captures<'_>| {
                match self.tokens.get(&caps[1]) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Value of a token, without the surrounding `%`
    pub fn get(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    /// Environment variables for child processes
    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{Project, ProjectSource};
    use std::path::PathBuf;

    fn interpolator() -> Interpolator {
        let project = Project::new(
            7,
            "Acme Shop",
            ProjectSource::Local {
                path: PathBuf::from("/srv/acme"),
            },
        );
        let build = Build::new(42, project, "0a1b2c", "main");
        Interpolator::from_build(
            &build,
            Path::new("/builds/project7-build42"),
            "https://ci.example.com/build/view/42",
        )
    }

    #[test]
    fn test_interpolate_all_tokens() {
        let i = interpolator();
        assert_eq!(
            i.interpolate("%PHPCI% %COMMIT% %PROJECT% %BUILD% %PROJECT_TITLE%"),
            "1 0a1b2c 7 42 Acme Shop"
        );
        assert_eq!(
            i.interpolate("cd %BUILD_PATH% && open %BUILD_URI%"),
            "cd /builds/project7-build42 && open https://ci.example.com/build/view/42"
        );
    }

    #[test]
    fn test_prefixed_synonyms() {
        let i = interpolator();
        assert_eq!(
            i.interpolate("%PHPCI_COMMIT%-%PHPCI_BUILD%-%PHPCI_BUILD_PATH%"),
            "0a1b2c-42-/builds/project7-build42"
        );
    }

    #[test]
    fn test_text_without_tokens_is_unchanged() {
        let i = interpolator();
        let input = "phpunit --coverage 100% -c phpunit.xml";
        assert_eq!(i.interpolate(input), input);
    }

    #[test]
    fn test_unknown_tokens_are_kept() {
        let i = interpolator();
        assert_eq!(i.interpolate("%HOME% and %BUILD%"), "%HOME% and 42");
    }

    #[test]
    fn test_interpolation_is_idempotent() {
        let i = interpolator();
        let once = i.interpolate("%BUILD%/%COMMIT%/%PROJECT_TITLE%/%BUILD_PATH%");
        assert_eq!(i.interpolate(&once), once);
    }

    #[test]
    fn test_single_pass_does_not_expand_values() {
        let project = Project::new(
            1,
            "%BUILD%",
            ProjectSource::Local {
                path: PathBuf::from("/srv/x"),
            },
        );
        let build = Build::new(5, project, "c0ffee", "main");
        let i = Interpolator::from_build(&build, Path::new("/b"), "uri");
        assert_eq!(i.interpolate("%PROJECT_TITLE%"), "%BUILD%");
    }

    #[test]
    fn test_env_vars() {
        let i = interpolator();
        let env: BTreeMap<_, _> = i.env_vars().iter().cloned().collect();
        assert_eq!(env.get("PHPCI").map(String::as_str), Some("1"));
        assert_eq!(env.get("PHPCI_COMMIT").map(String::as_str), Some("0a1b2c"));
        assert_eq!(env.get("PHPCI_PROJECT").map(String::as_str), Some("7"));
        assert_eq!(env.get("PHPCI_BUILD").map(String::as_str), Some("42"));
        assert_eq!(
            env.get("PHPCI_PROJECT_TITLE").map(String::as_str),
            Some("Acme Shop")
        );
        assert_eq!(
            env.get("PHPCI_BUILD_PATH").map(String::as_str),
            Some("/builds/project7-build42")
        );
        assert_eq!(env.get("CI_BUILD").map(String::as_str), Some("42"));
    }
}
