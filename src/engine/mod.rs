//! Build execution engine
//!
//! This module contains:
//! - `builder` - The build orchestrator
//! - `worker` - Runs pending builds from the store concurrently
//! - `command` - Shell command execution with captured output
//! - `binary` - Tool discovery in the working copy and on PATH
//! - `working_copy` - Checkout, copy or symlink of the project source
//! - `logger` - The per-build log buffer
//! - `error` - Engine error types
//! - `result` - Plugin and build result types

pub mod binary;
pub mod builder;
pub mod command;
pub mod error;
pub mod logger;
pub mod result;
pub mod worker;
pub mod working_copy;

pub use binary::BinaryLocator;
pub use builder::Builder;
pub use command::CommandExecutor;
pub use error::{BuilderError, CommandError, PluginError, SetupError};
pub use logger::BuildLogger;
pub use result::{BuildResult, PluginOutcome, PluginRun};
pub use worker::{BuildWorker, WorkerReport};
pub use working_copy::{CheckoutStrategy, Materializer, WorkingCopy};
