//! Execution result types

use std::time::Duration;

use crate::build::{Build, BuildStatus};
use crate::pipeline::{PluginOptions, Stage};

/// Outcome of one plugin invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginOutcome {
    Success,
    Failed,
    /// No plugin is registered under the configured name
    NotFound,
    /// The plugin raised an error or panicked
    Faulted(String),
}

impl PluginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PluginOutcome::Success)
    }
}

/// Record of a plugin invocation
#[derive(Debug, Clone)]
pub struct PluginRun {
    pub name: String,
    pub stage: Stage,
    pub options: PluginOptions,
    pub outcome: PluginOutcome,
}

/// Result of a build execution
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub run_id: String,
    pub build_id: u64,
    pub status: BuildStatus,
    pub plugins: Vec<PluginRun>,
    pub duration: Duration,
    /// Final build record, as saved
    pub build: Build,
}

impl BuildResult {
    pub fn success(&self) -> bool {
        self.status == BuildStatus::Success
    }

    /// Plugins that ran in `stage`, in order
    pub fn ran_in(&self, stage: Stage) -> Vec<&str> {
        self.plugins
            .iter()
            .filter(|p| p.stage == stage)
            .map(|p| p.name.as_str())
            .collect()
    }
}
