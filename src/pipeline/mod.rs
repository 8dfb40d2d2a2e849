//! Pipeline definitions
//!
//! This module contains everything read from a project's pipeline file:
//! - `config` - Stages, plugin options and build settings
//! - `loader` - Locate and parse the pipeline file
//! - `interpolation` - Build variable substitution for `%TOKEN%` syntax

pub mod config;
pub mod interpolation;
pub mod loader;

pub use config::{BuildSettings, PipelineConfig, PluginConfig, PluginOptions, Stage, StagePlugins};
pub use interpolation::Interpolator;
pub use loader::{LoadError, PipelineLoader};
