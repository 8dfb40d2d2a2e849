//! Pipeline file loader
//!
//! Find and parse the pipeline file at the root of a working copy.

use std::path::Path;

use super::PipelineConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Project does not contain a {0} file.")]
    Missing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },
}

pub struct PipelineLoader;

impl PipelineLoader {
    /// Load `file_name` from the root of `dir`
    pub fn load_from_dir(dir: &Path, file_name: &str) -> Result<PipelineConfig, LoadError> {
        let path = dir.join(file_name);
        if !path.is_file() {
            return Err(LoadError::Missing(file_name.to_string()));
        }
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<PipelineConfig, LoadError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    /// Parse pipeline YAML; an empty document is an empty pipeline
    pub fn parse(content: &str, origin: &Path) -> Result<PipelineConfig, LoadError> {
        let yaml_error = |error| LoadError::Yaml {
            file: origin.display().to_string(),
            error,
        };

        let value: serde_yaml::Value = serde_yaml::from_str(content).map_err(yaml_error)?;
        if value.is_null() {
            return Ok(PipelineConfig::default());
        }
        serde_yaml::from_value(value).map_err(yaml_error)
    }
}
