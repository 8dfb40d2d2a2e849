//! PHP copy/paste detector plugin
//!
//! ```yaml
//! test:
//!   php_cpd:
//!     path: src
//!     ignore:
//!       - src/Legacy
//! ```
//!
//! `ignore` defaults to the build's ignore list. The number of clones found
//! is stored as `phpcpd-warnings`.

use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

use super::{Plugin, PluginContext};
use crate::engine::error::PluginError;
use crate::pipeline::PluginOptions;

static CLONES_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Found (\d+) (?:exact )?clones?").expect("clone count pattern is valid")
});

pub struct PhpCpdPlugin {
    path: String,
    ignore: Vec<String>,
    phpcpd: Option<PathBuf>,
}

pub fn create(options: &PluginOptions, ctx: &PluginContext<'_>) -> Result<Box<dyn Plugin>, PluginError> {
    let build_path = ctx.build_path.display().to_string();
    let path = match options.get_str("path") {
        Some(path) => format!("{}/{}", build_path, path.trim_start_matches('/')),
        None => build_path,
    };

    let ignore = options
        .get_list("ignore")
        .filter(|list| !list.is_empty())
        .unwrap_or_else(|| ctx.ignore.to_vec());

    Ok(Box::new(PhpCpdPlugin {
        path,
        ignore,
        phpcpd: ctx.locator.find_binary(&["phpcpd", "phpcpd.phar"]),
    }))
}

/// ` --exclude <path>` for every entry, trailing slashes removed
fn exclude_flags(ignore: &[String]) -> String {
    ignore
        .iter()
        .map(|item| format!(" --exclude {}", item.trim_end_matches('/')))
        .collect()
}

#[async_trait]
impl Plugin for PhpCpdPlugin {
    async fn execute(&mut self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        let Some(phpcpd) = &self.phpcpd else {
            ctx.logger.log_failure("Could not find phpcpd.");
            return Ok(false);
        };

        let template = format!("\"{}\"%s \"%s\"", phpcpd.display());
        let excludes = exclude_flags(&self.ignore);
        let success = ctx
            .executor
            .execute(&template, &[&excludes, &self.path])
            .await?;

        if let Some(caps) = CLONES_REGEX.captures(ctx.executor.last_output()) {
            let clones: i64 = caps[1].parse().unwrap_or(0);
            ctx.build.store_meta("phpcpd-warnings", clones);
        }

        Ok(success)
    }
}
