//! PHP Mess Detector plugin
//!
//! ```yaml
//! test:
//!   php_mess_detector:
//!     path: src
//!     rules: [codesize, unusedcode]
//! ```
//!
//! The number of reported violations is stored as `phpmd-warnings`.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{Plugin, PluginContext};
use crate::engine::error::PluginError;
use crate::pipeline::PluginOptions;

const DEFAULT_RULES: [&str; 3] = ["codesize", "unusedcode", "naming"];

pub struct PhpMessDetectorPlugin {
    path: String,
    rules: Vec<String>,
    ignore: Vec<String>,
    phpmd: Option<PathBuf>,
}

pub fn create(options: &PluginOptions, ctx: &PluginContext<'_>) -> Result<Box<dyn Plugin>, PluginError> {
    let build_path = ctx.build_path.display().to_string();
    let path = match options.get_str("path") {
        Some(path) => format!("{}/{}", build_path, path.trim_start_matches('/')),
        None => build_path,
    };

    let rules = options
        .get_list("rules")
        .filter(|rules| !rules.is_empty())
        .unwrap_or_else(|| DEFAULT_RULES.iter().map(|r| r.to_string()).collect());

    Ok(Box::new(PhpMessDetectorPlugin {
        path,
        rules,
        ignore: ctx.ignore.to_vec(),
        phpmd: ctx.locator.find_binary(&["phpmd", "phpmd.phar"]),
    }))
}

#[async_trait]
impl Plugin for PhpMessDetectorPlugin {
    async fn execute(&mut self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        let Some(phpmd) = &self.phpmd else {
            ctx.logger.log_failure("Could not find phpmd.");
            return Ok(false);
        };

        let ignore = if self.ignore.is_empty() {
            String::new()
        } else {
            format!(" --exclude {}", self.ignore.join(","))
        };

        let template = format!("\"{}\" \"%s\" text %s%s", phpmd.display());
        let rules = self.rules.join(",");
        let success = ctx
            .executor
            .execute(&template, &[&self.path, &rules, &ignore])
            .await?;

        let violations = ctx
            .executor
            .last_output()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count();
        ctx.build.store_meta("phpmd-warnings", violations as u64);

        Ok(success)
    }
}
