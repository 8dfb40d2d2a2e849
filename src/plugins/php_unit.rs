//! PHPUnit plugin
//!
//! ```yaml
//! test:
//!   php_unit:
//!     config:
//!       - phpunit.xml
//!       - tests/integration.xml
//!     directory: tests/unit
//!     args: "--stop-on-failure"
//! ```
//!
//! Config files run first, then directories. Every run happens even after a
//! failure; the plugin succeeds only if all of them did. With neither option
//! set, `phpunit.xml` or `phpunit.xml.dist` at the root is used when present.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{Plugin, PluginContext};
use crate::engine::error::PluginError;
use crate::pipeline::PluginOptions;

const DEFAULT_CONFIGS: [&str; 2] = ["phpunit.xml", "phpunit.xml.dist"];

pub struct PhpUnitPlugin {
    config_files: Vec<String>,
    directories: Vec<String>,
    args: String,
    phpunit: Option<PathBuf>,
}

pub fn create(options: &PluginOptions, ctx: &PluginContext<'_>) -> Result<Box<dyn Plugin>, PluginError> {
    let mut config_files = options.get_list("config").unwrap_or_default();
    let directories = options.get_list("directory").unwrap_or_default();

    if config_files.is_empty() && directories.is_empty() {
        if let Some(found) = DEFAULT_CONFIGS
            .iter()
            .find(|name| ctx.build_path.join(name).is_file())
        {
            config_files.push(found.to_string());
        }
    }

    Ok(Box::new(PhpUnitPlugin {
        config_files,
        directories,
        args: options.get_str("args").unwrap_or_default(),
        phpunit: ctx.locator.find_binary(&["phpunit", "phpunit.phar"]),
    }))
}

impl PhpUnitPlugin {
    fn command(&self, phpunit: &str, target: &str) -> String {
        let mut command = format!("\"{}\"", phpunit);
        if !self.args.is_empty() {
            command.push(' ');
            command.push_str(&self.args);
        }
        command.push_str(target);
        command
    }
}

#[async_trait]
impl Plugin for PhpUnitPlugin {
    async fn execute(&mut self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        let Some(phpunit) = &self.phpunit else {
            ctx.logger.log_failure("Could not find phpunit.");
            return Ok(false);
        };
        let phpunit = phpunit.display().to_string();
        let build_path = ctx.build_path.display().to_string();

        if self.config_files.is_empty() && self.directories.is_empty() {
            let command = self.command(&phpunit, "");
            return Ok(ctx.executor.execute(&command, &[]).await?);
        }

        let mut success = true;

        for config in &self.config_files {
            let template = self.command(&phpunit, " -c \"%s\"");
            let path = format!("{}/{}", build_path, config.trim_start_matches('/'));
            success &= ctx.executor.execute(&template, &[&path]).await?;
        }

        for directory in &self.directories {
            let template = self.command(&phpunit, " \"%s\"");
            let path = format!("{}/{}", build_path, directory.trim_start_matches('/'));
            success &= ctx.executor.execute(&template, &[&path]).await?;
        }

        Ok(success)
    }
}
