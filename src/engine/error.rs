//! Engine error types

use crate::build::{BuildStatus, StoreError};
use crate::pipeline::LoadError;

/// Errors that abort a build execution request
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("Build not found: {0}")]
    NotFound(u64),

    #[error("Build {id} cannot be executed from status {status}")]
    InvalidStatus { id: u64, status: BuildStatus },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while running an external command
///
/// A nonzero exit status is not an error; these cover processes that could
/// not be run at all.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("IO error while running command: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while materializing a working copy
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("{0}")]
    Pipeline(#[from] LoadError),

    #[error("{0}")]
    Checkout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Command(#[from] CommandError),
}

impl SetupError {
    /// Whether this is an environment fault rather than a project problem
    pub fn is_fault(&self) -> bool {
        matches!(self, SetupError::Io(_) | SetupError::Command(_))
    }
}

/// Errors raised by plugins; always converted to a failed outcome
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("{plugin} requires the '{option}' option")]
    MissingOption { plugin: String, option: String },

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("The {0} plugin is not enabled.")]
    Disabled(String),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}
