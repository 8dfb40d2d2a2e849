//! Shell plugin
//!
//! Runs arbitrary commands in the working copy. Requires
//! `enable_shell_plugin` in the engine configuration.
//!
//! ```yaml
//! setup:
//!   shell:
//!     command: "composer install --prefer-dist"
//!
//! complete:
//!   shell:
//!     - "cd %BUILD_PATH% && make docs"
//!     - "echo built %COMMIT%"
//! ```

use async_trait::async_trait;

use super::{Plugin, PluginContext};
use crate::engine::error::PluginError;
use crate::pipeline::PluginOptions;

pub struct ShellPlugin {
    commands: Vec<String>,
}

pub fn create(options: &PluginOptions, ctx: &PluginContext<'_>) -> Result<Box<dyn Plugin>, PluginError> {
    let commands = if let Some(command) = options.get_str("command") {
        let build_path = ctx.build_path.display().to_string();
        vec![command.replace("%buildpath%", &build_path)]
    } else if let Some(commands) = options.as_list() {
        commands
    } else {
        return Err(PluginError::MissingOption {
            plugin: "shell".to_string(),
            option: "command".to_string(),
        });
    };

    Ok(Box::new(ShellPlugin { commands }))
}

#[async_trait]
impl Plugin for ShellPlugin {
    async fn execute(&mut self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        if !ctx.config.enable_shell_plugin {
            return Err(PluginError::Disabled("shell".to_string()));
        }

        let mut success = true;
        for command in &self.commands {
            let command = ctx.interpolator.interpolate(command);
            if !ctx.executor.execute(&command, &[]).await? {
                success = false;
            }
        }
        Ok(success)
    }
}
