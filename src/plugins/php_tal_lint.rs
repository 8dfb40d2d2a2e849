//! PHPTAL template lint plugin
//!
//! ```yaml
//! test:
//!   php_tal_lint:
//!     directories: [templates, views]
//!     suffixes: [zpt, html]
//!     allowed_warnings: 5
//!     allowed_errors: 0
//!     tales: lib/tales.php
//! ```
//!
//! Lints every matching file below the configured directories, skipping the
//! build's ignore list. Results are stored as `phptallint-warnings`,
//! `phptallint-errors` and `phptallint-data`. A limit of `-1` allows any
//! number of findings.

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

use super::{Plugin, PluginContext};
use crate::engine::error::PluginError;
use crate::pipeline::PluginOptions;

static REPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Found (.+?) (error|warning)").expect("lint report pattern is valid")
});

const MODIFIER_HINT: &str = "(use -i to include your custom modifier functions)";

/// One finding reported by the linter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintIssue {
    pub file: String,
    pub line: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

pub struct PhpTalLintPlugin {
    directories: Vec<String>,
    suffixes: Vec<String>,
    allowed_warnings: i64,
    allowed_errors: i64,
    tales: Option<String>,
    ignore: Vec<String>,
    lint: Option<PathBuf>,
}

pub fn create(options: &PluginOptions, ctx: &PluginContext<'_>) -> Result<Box<dyn Plugin>, PluginError> {
    let mut directories = vec![String::new()];
    if let Some(dir) = options.get_str("directory") {
        directories = vec![dir];
    }
    if let Some(dirs) = options.get_list("directories").filter(|d| !d.is_empty()) {
        directories = dirs;
    }

    let suffixes = options
        .get_list("suffixes")
        .unwrap_or_else(|| vec!["zpt".to_string()])
        .into_iter()
        .map(|s| s.to_lowercase())
        .collect();

    let lint = ctx
        .locator
        .find_binary(&["phptal_lint.php", "phptal_lint"])
        .or_else(|| {
            let bundled = ctx
                .build_path
                .join("vendor/phptal/phptal/tools/phptal_lint.php");
            bundled.is_file().then_some(bundled)
        });

    Ok(Box::new(PhpTalLintPlugin {
        directories: directories.into_iter().map(|d| directory_prefix(&d)).collect(),
        suffixes,
        allowed_warnings: options.get_i64("allowed_warnings").unwrap_or(0),
        allowed_errors: options.get_i64("allowed_errors").unwrap_or(0),
        tales: options.get_str("tales"),
        ignore: ctx
            .ignore
            .iter()
            .map(|i| i.trim_end_matches('/').to_string())
            .collect(),
        lint,
    }))
}

/// `dir` as a relative prefix: empty for the root, otherwise ending in `/`
fn directory_prefix(dir: &str) -> String {
    let trimmed = dir.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

impl PhpTalLintPlugin {
    /// Relative paths of the files to lint below `prefix`
    fn collect(&self, root: &Path, prefix: &str, out: &mut Vec<String>) -> std::io::Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(root.join(prefix))?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let item = format!("{}{}", prefix, name);
            if self.ignore.contains(&item) {
                continue;
            }

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.collect(root, &format!("{}/", item), out)?;
            } else if self.matches_suffix(&name) {
                out.push(item);
            }
        }
        Ok(())
    }

    fn matches_suffix(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((_, ext)) => self.suffixes.contains(&ext.to_lowercase()),
            None => false,
        }
    }

    fn flags(&self, build_path: &Path) -> (String, String) {
        let suffixes = if self.suffixes.is_empty() {
            String::new()
        } else {
            format!(" -e {}", self.suffixes.join(","))
        };
        let tales = match &self.tales {
            Some(tales) => format!(" -i {}", build_path.join(tales).display()),
            None => String::new(),
        };
        (suffixes, tales)
    }

    async fn lint_all(
        &self,
        lint: &Path,
        ctx: &mut PluginContext<'_>,
    ) -> Result<Vec<LintIssue>, PluginError> {
        let mut files = Vec::new();
        for dir in &self.directories {
            self.collect(ctx.build_path, dir, &mut files)?;
        }
        debug!("Linting {} template(s)", files.len());

        let template = if lint.extension().is_some_and(|ext| ext == "php") {
            format!("php \"{}\"%s%s \"%s\"", lint.display())
        } else {
            format!("\"{}\"%s%s \"%s\"", lint.display())
        };
        let (suffixes, tales) = self.flags(ctx.build_path);

        let mut issues = Vec::new();
        for file in files {
            let full = ctx.build_path.join(&file).display().to_string();
            ctx.executor
                .execute(&template, &[&suffixes, &tales, &full])
                .await?;
            issues.extend(parse_report(&file, ctx.executor.last_output()));
        }
        Ok(issues)
    }

    fn within_limit(count: i64, allowed: i64) -> bool {
        allowed == -1 || count <= allowed
    }
}

/// Findings in the linter's output for `file`
fn parse_report(file: &str, output: &str) -> Vec<LintIssue> {
    let Some(caps) = REPORT_REGEX.captures(output) else {
        return Vec::new();
    };
    let kind = caps[2].to_lowercase();
    let name = Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name_prefix = format!("{}: ", name);

    output
        .lines()
        .skip(4)
        .filter(|row| !row.trim().is_empty())
        .map(|row| {
            let message = row.replace(&name_prefix, "").replace(MODIFIER_HINT, "");
            let (message, line) = match message.split_once(" (line ") {
                Some((message, rest)) => (message.trim().to_string(), rest.replace(')', "").trim().to_string()),
                None => (message.trim().to_string(), String::new()),
            };
            LintIssue {
                file: file.to_string(),
                line,
                kind: kind.clone(),
                message,
            }
        })
        .collect()
}

#[async_trait]
impl Plugin for PhpTalLintPlugin {
    async fn execute(&mut self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        let Some(lint) = self.lint.clone() else {
            ctx.logger.log_failure("Could not find phptal_lint.");
            return Ok(false);
        };

        ctx.executor.set_quiet(true);
        ctx.executor.set_log_output(false);
        let result = self.lint_all(&lint, ctx).await;
        ctx.executor.set_quiet(false);
        ctx.executor.set_log_output(true);
        let issues = result?;

        let errors = issues.iter().filter(|i| i.kind == "error").count() as i64;
        let warnings = issues.len() as i64 - errors;

        ctx.build.store_meta("phptallint-warnings", warnings);
        ctx.build.store_meta("phptallint-errors", errors);
        ctx.build.store_meta(
            "phptallint-data",
            serde_json::to_value(&issues).unwrap_or_default(),
        );

        Ok(Self::within_limit(warnings, self.allowed_warnings)
            && Self::within_limit(errors, self.allowed_errors))
    }
}
