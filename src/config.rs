//! Engine configuration
//!
//! Server-side settings for the build engine, loaded from a YAML file:
//!
//! ```yaml
//! build_root: /var/lib/phpci/build
//! base_url: https://ci.example.com/
//! enable_shell_plugin: true
//! command_timeout: 3600
//! max_concurrent_builds: 4
//! extra_paths:
//!   - /opt/tools/bin
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding working copies (`project<P>-build<B>`)
    #[serde(default = "default_build_root")]
    pub build_root: PathBuf,

    /// Public URL of the CI server, used for `%BUILD_URI%`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Pipeline file expected at the working copy root
    #[serde(default = "default_pipeline_file")]
    pub pipeline_file: String,

    /// Vendored tool directory, relative to the working copy
    #[serde(default = "default_vendor_bin_dir")]
    pub vendor_bin_dir: PathBuf,

    /// Allow the `shell` plugin to run arbitrary commands
    #[serde(default)]
    pub enable_shell_plugin: bool,

    /// Maximum duration of a single command, in seconds
    #[serde(default)]
    pub command_timeout: Option<u64>,

    /// Builds the worker runs at the same time
    #[serde(default = "default_max_concurrent_builds")]
    pub max_concurrent_builds: usize,

    /// Directories prepended to PATH for every command
    #[serde(default)]
    pub extra_paths: Vec<PathBuf>,
}

fn default_build_root() -> PathBuf {
    std::env::temp_dir().join("phpci-build")
}

fn default_base_url() -> String {
    "http://localhost/".to_string()
}

fn default_pipeline_file() -> String {
    "phpci.yml".to_string()
}

fn default_vendor_bin_dir() -> PathBuf {
    PathBuf::from("vendor/bin")
}

fn default_max_concurrent_builds() -> usize {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            build_root: default_build_root(),
            base_url: default_base_url(),
            pipeline_file: default_pipeline_file(),
            vendor_bin_dir: default_vendor_bin_dir(),
            enable_shell_plugin: false,
            command_timeout: None,
            max_concurrent_builds: default_max_concurrent_builds(),
            extra_paths: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Yaml {
                file: path.display().to_string(),
                error: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_builds == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_builds must be at least 1".to_string(),
            ));
        }
        if self.pipeline_file.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "pipeline_file must not be empty".to_string(),
            ));
        }
        if self.command_timeout == Some(0) {
            return Err(ConfigError::Invalid(
                "command_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout.map(Duration::from_secs)
    }

    /// Working copy location for a build
    pub fn working_copy_path(&self, project_id: u64, build_id: u64) -> PathBuf {
        self.build_root
            .join(format!("project{}-build{}", project_id, build_id))
    }

    /// Public page of a build
    pub fn build_uri(&self, build_id: u64) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/build/view/{}", base, build_id)
    }
}
