//! # PHPCI Builder
//!
//! Build execution engine for a self-hosted continuous integration server
//! for PHP projects.
//!
//! ## Features
//!
//! - **Working copies** - Clone remote git repositories (SSH or HTTP) or copy/symlink local directories
//! - **Declarative pipelines** - A `phpci.yml` file with `setup`, `test`, `complete`, `success` and `failure` stages
//! - **Plugins** - Shell commands, PHPUnit, Grunt, phpcpd, phpmd and PHPTAL lint built in, more can be registered
//! - **Build log** - Every command and plugin outcome recorded and saved as the build runs
//! - **Interpolation** - `%BUILD%`, `%COMMIT%`, `%BUILD_PATH%` and friends in plugin options and the child environment
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use phpci_builder::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryBuildStore::new());
//!     let project = Project::new(
//!         1,
//!         "Acme Shop",
//!         ProjectSource::Local { path: "/srv/acme-shop".into() },
//!     );
//!     store.save(&Build::new(1, project, "Manual", "main")).await?;
//!
//!     let builder = Builder::new(EngineConfig::default(), store);
//!     let result = builder.execute_by_id(1).await?;
//!
//!     println!("Build finished: {}", result.status);
//!     print!("{}", result.build.log());
//!     Ok(())
//! }
//! ```

pub mod build;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod plugins;

// Re-export main types
pub use build::{
    Build, BuildStatus, BuildStore, GitLabAccess, MemoryBuildStore, NoopPostback, Project,
    ProjectSource, Provider, PullRequest, StatusPostback, StoreError,
};
pub use config::{ConfigError, EngineConfig};
pub use engine::{
    BinaryLocator, BuildLogger, BuildResult, BuildWorker, Builder, BuilderError, CheckoutStrategy,
    CommandError, CommandExecutor, Materializer, PluginError, PluginOutcome, PluginRun, SetupError,
    WorkerReport, WorkingCopy,
};
pub use pipeline::{
    BuildSettings, Interpolator, LoadError, PipelineConfig, PipelineLoader, PluginConfig,
    PluginOptions, Stage, StagePlugins,
};
pub use plugins::{plugin_type_name, Plugin, PluginContext, PluginFactory, PluginRegistry};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::build::{
        Build, BuildStatus, BuildStore, MemoryBuildStore, Project, ProjectSource, Provider,
        PullRequest, StatusPostback,
    };
    pub use crate::config::EngineConfig;
    pub use crate::engine::{
        BuildResult, BuildWorker, Builder, BuilderError, PluginError, PluginOutcome,
    };
    pub use crate::pipeline::{PipelineConfig, PipelineLoader, PluginOptions, Stage};
    pub use crate::plugins::{Plugin, PluginContext, PluginRegistry};
}
