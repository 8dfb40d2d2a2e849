//! Build plugins
//!
//! Plugins are registered under a snake_case name (`php_unit`) and looked up
//! through their type name (`PhpUnit`), case-insensitively, so `phpunit` and
//! `php_unit` resolve to the same plugin.
//!
//! Built-in plugins:
//! - `shell` - Run arbitrary commands
//! - `php_unit` - Run PHPUnit
//! - `grunt` - Run a grunt task
//! - `php_cpd` - Copy/paste detection
//! - `php_mess_detector` - PHP Mess Detector
//! - `php_tal_lint` - Lint PHPTAL templates

pub mod grunt;
pub mod php_cpd;
pub mod php_mess_detector;
pub mod php_tal_lint;
pub mod php_unit;
pub mod shell;

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::build::Build;
use crate::config::EngineConfig;
use crate::engine::binary::BinaryLocator;
use crate::engine::command::CommandExecutor;
use crate::engine::error::PluginError;
use crate::engine::logger::BuildLogger;
use crate::engine::result::PluginOutcome;
use crate::pipeline::{Interpolator, PluginOptions};

/// A unit of build work
#[async_trait]
pub trait Plugin: Send {
    /// Run the plugin; `Ok(false)` is an ordinary failure
    async fn execute(&mut self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError>;
}

/// Everything a plugin can reach during a build
pub struct PluginContext<'a> {
    pub executor: &'a mut CommandExecutor,
    pub locator: &'a BinaryLocator,
    pub interpolator: &'a Interpolator,
    pub logger: &'a BuildLogger,
    pub build: &'a mut Build,
    pub build_path: &'a Path,
    /// Paths to skip, relative to `build_path`
    pub ignore: &'a [String],
    pub config: &'a EngineConfig,
}

/// Builds a plugin instance from its options
pub type PluginFactory = Arc<
    dyn Fn(&PluginOptions, &PluginContext<'_>) -> Result<Box<dyn Plugin>, PluginError>
        + Send
        + Sync,
>;

/// Type name of a configured plugin: `php_cpd` becomes `PhpCpd`
pub fn plugin_type_name(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

fn lookup_key(name: &str) -> String {
    plugin_type_name(name).to_ascii_lowercase()
}

/// Name to factory table
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, (String, PluginFactory)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in plugin
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("shell", shell::create);
        registry.register("php_unit", php_unit::create);
        registry.register("grunt", grunt::create);
        registry.register("php_cpd", php_cpd::create);
        registry.register("php_mess_detector", php_mess_detector::create);
        registry.register("php_tal_lint", php_tal_lint::create);
        registry
    }

    /// Register a factory, replacing any plugin with the same type name
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PluginOptions, &PluginContext<'_>) -> Result<Box<dyn Plugin>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        let factory: PluginFactory = Arc::new(factory);
        self.factories
            .insert(lookup_key(name), (name.to_string(), factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&lookup_key(name))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.values().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Construct and run a plugin, turning every failure mode into an outcome
    pub async fn invoke(
        &self,
        name: &str,
        options: &PluginOptions,
        ctx: &mut PluginContext<'_>,
    ) -> PluginOutcome {
        let Some((_, factory)) = self.factories.get(&lookup_key(name)) else {
            warn!("Plugin does not exist: {}", name);
            ctx.logger
                .log_failure(format!("Plugin does not exist: {}", name));
            return PluginOutcome::NotFound;
        };

        debug!("Constructing plugin {} ({})", name, plugin_type_name(name));
        let constructed = std::panic::catch_unwind(AssertUnwindSafe(|| factory(options, &*ctx)));
        let mut plugin = match constructed {
            Ok(Ok(plugin)) => plugin,
            Ok(Err(e)) => return fault(ctx.logger, e.to_string()),
            Err(panic) => return fault(ctx.logger, panic_message(panic.as_ref())),
        };

        match AssertUnwindSafe(plugin.execute(ctx)).catch_unwind().await {
            Ok(Ok(true)) => PluginOutcome::Success,
            Ok(Ok(false)) => PluginOutcome::Failed,
            Ok(Err(e)) => fault(ctx.logger, e.to_string()),
            Err(panic) => fault(ctx.logger, panic_message(panic.as_ref())),
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

fn fault(logger: &BuildLogger, message: String) -> PluginOutcome {
    warn!("Plugin raised an error: {}", message);
    logger.log_failure(format!("EXCEPTION: {}", message));
    PluginOutcome::Faulted(message)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "plugin panicked".to_string()
    }
}

/// Test fixture owning everything a `PluginContext` borrows
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::build::{Project, ProjectSource};
    use std::path::PathBuf;

    pub struct Harness {
        pub dir: tempfile::TempDir,
        pub executor: CommandExecutor,
        pub locator: BinaryLocator,
        pub interpolator: Interpolator,
        pub logger: BuildLogger,
        pub build: Build,
        pub ignore: Vec<String>,
        pub config: EngineConfig,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        pub fn with_config(config: EngineConfig) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let logger = BuildLogger::new();
            let mut executor = CommandExecutor::new(logger.clone());
            executor.set_working_dir(dir.path());

            let project = Project::new(
                1,
                "Fixture",
                ProjectSource::Local {
                    path: PathBuf::from("/srv/fixture"),
                },
            );
            let build = Build::new(2, project, "abc123", "main");
            let interpolator = Interpolator::from_build(&build, dir.path(), "http://ci/build/view/2");
            for (key, value) in interpolator.env_vars() {
                executor.set_env(key, value);
            }
            let locator = BinaryLocator::new(dir.path(), &config.vendor_bin_dir, &executor);

            Self {
                dir,
                executor,
                locator,
                interpolator,
                logger,
                build,
                ignore: Vec::new(),
                config,
            }
        }

        pub fn path(&self) -> &Path {
            self.dir.path()
        }

        /// Write an executable script into the working copy
        pub fn script(&mut self, relative: &str, body: &str) -> PathBuf {
            let path = self.dir.path().join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            }
            path
        }

        pub fn ctx(&mut self) -> PluginContext<'_> {
            PluginContext {
                executor: &mut self.executor,
                locator: &self.locator,
                interpolator: &self.interpolator,
                logger: &self.logger,
                build: &mut self.build,
                build_path: self.dir.path(),
                ignore: &self.ignore,
                config: &self.config,
            }
        }

        pub async fn run(&mut self, registry: &PluginRegistry, name: &str, yaml: &str) -> PluginOutcome {
            let options: PluginOptions = serde_yaml::from_str(yaml).unwrap();
            let mut ctx = self.ctx();
            registry.invoke(name, &options, &mut ctx).await
        }
    }
}
