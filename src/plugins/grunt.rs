//! Grunt plugin
//!
//! Installs npm dependencies, then runs a grunt task.
//!
//! ```yaml
//! test:
//!   grunt:
//!     directory: frontend
//!     task: build
//!     gruntfile: Gruntfile.js
//! ```

use async_trait::async_trait;

use super::{Plugin, PluginContext};
use crate::engine::error::PluginError;
use crate::pipeline::PluginOptions;

pub struct GruntPlugin {
    directory: String,
    task: String,
    grunt: Option<String>,
    gruntfile: String,
}

pub fn create(options: &PluginOptions, ctx: &PluginContext<'_>) -> Result<Box<dyn Plugin>, PluginError> {
    let build_path = ctx.build_path.display().to_string();
    let directory = match options.get_str("directory") {
        Some(dir) => format!("{}/{}", build_path, dir.trim_start_matches('/')),
        None => build_path,
    };

    let grunt = options.get_str("grunt").or_else(|| {
        ctx.locator
            .find("grunt")
            .map(|path| path.display().to_string())
    });

    Ok(Box::new(GruntPlugin {
        directory,
        task: options.get_str("task").unwrap_or_default(),
        grunt,
        gruntfile: options
            .get_str("gruntfile")
            .unwrap_or_else(|| "Gruntfile.js".to_string()),
    }))
}

#[async_trait]
impl Plugin for GruntPlugin {
    async fn execute(&mut self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        if !ctx
            .executor
            .execute("cd \"%s\" && npm install", &[&self.directory])
            .await?
        {
            return Ok(false);
        }

        let Some(grunt) = &self.grunt else {
            ctx.logger.log_failure("Could not find grunt.");
            return Ok(false);
        };

        let template = format!("cd \"%s\" && {} --no-color --gruntfile %s %s", grunt);
        Ok(ctx
            .executor
            .execute(&template, &[&self.directory, &self.gruntfile, &self.task])
            .await?)
    }
}
