//! Pipeline configuration types
//!
//! Mirrors the `phpci.yml` file found at the root of a working copy:
//!
//! ```yaml
//! build_settings:
//!   verbose: true
//!   ignore:
//!     - vendor
//! setup:
//!   shell:
//!     - "composer install"
//! test:
//!   php_unit:
//!     directory: tests/
//!   php_cpd:
//!     allow_failures: true
//! complete: {}
//! success: {}
//! failure: {}
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::warn;

use super::interpolation::Interpolator;

// ============================================================================
// Stage
// ============================================================================

/// A named phase of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Setup,
    Test,
    Complete,
    Success,
    Failure,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Test => "test",
            Stage::Complete => "complete",
            Stage::Success => "success",
            Stage::Failure => "failure",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Plugin options
// ============================================================================

const ALLOW_FAILURES: &str = "allow_failures";

/// Options of one plugin invocation
///
/// Usually a mapping; some plugins (e.g. `shell`) also accept a plain list.
/// Everything except `allow_failures` is opaque to the orchestrator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginOptions(Value);

impl PluginOptions {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Build options from `key: value` pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut map = Mapping::new();
        for (key, value) in pairs {
            map.insert(Value::String(key.into()), value.into());
        }
        Self(Value::Mapping(map))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match &self.0 {
            Value::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Scalar option rendered as a string; empty strings count as unset
    pub fn get_str(&self, key: &str) -> Option<String> {
        let value = match self.get(key)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!value.is_empty()).then_some(value)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Option that may be a single string or a list of strings
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            Value::Sequence(seq) => Some(seq.iter().filter_map(scalar_to_string).collect()),
            other => scalar_to_string(other).map(|s| vec![s]),
        }
    }

    /// The options themselves, when given as a plain list
    pub fn as_list(&self) -> Option<Vec<String>> {
        match &self.0 {
            Value::Sequence(seq) => Some(seq.iter().filter_map(scalar_to_string).collect()),
            _ => None,
        }
    }

    /// Whether a failure of this plugin is tolerated (test stage only)
    pub fn allow_failures(&self) -> bool {
        self.get_bool(ALLOW_FAILURES).unwrap_or(false)
    }

    /// Options with stage defaults applied
    ///
    /// In the test stage a mapping without `allow_failures` gets an explicit
    /// `allow_failures: false`.
    pub fn resolved(&self, stage: Stage) -> Self {
        let mut value = self.0.clone();
        if stage == Stage::Test {
            if let Value::Null = value {
                value = Value::Mapping(Mapping::new());
            }
            if let Value::Mapping(map) = &mut value {
                if !map.contains_key(ALLOW_FAILURES) {
                    map.insert(Value::String(ALLOW_FAILURES.to_string()), Value::Bool(false));
                }
            }
        }
        Self(value)
    }

    /// Options with `%TOKEN%` placeholders replaced in every string value
    pub fn interpolated(&self, interpolator: &Interpolator) -> Self {
        Self(interpolate_value(&self.0, interpolator))
    }
}

fn interpolate_value(value: &Value, interpolator: &Interpolator) -> Value {
    match value {
        Value::String(s) => Value::String(interpolator.interpolate(s)),
        Value::Sequence(seq) => Value::Sequence(
            seq.iter()
                .map(|item| interpolate_value(item, interpolator))
                .collect(),
        ),
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .map(|(key, item)| (key.clone(), interpolate_value(item, interpolator)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ============================================================================
// Stage plugins
// ============================================================================

/// A configured plugin: its name as written in the file, and its options
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginConfig {
    pub name: String,
    pub options: PluginOptions,
}

/// Ordered plugin list of a stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagePlugins(pub Vec<PluginConfig>);

impl StagePlugins {
    pub fn iter(&self) -> std::slice::Iter<'_, PluginConfig> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.name.as_str()).collect()
    }
}

impl Serialize for StagePlugins {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for plugin in &self.0 {
            map.serialize_entry(&plugin.name, &plugin.options)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StagePlugins {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let map = match value {
            Value::Mapping(map) => map,
            Value::Null => return Ok(StagePlugins::default()),
            other => {
                warn!("Ignoring stage that is not a mapping: {:?}", other);
                return Ok(StagePlugins::default());
            }
        };

        let mut plugins = Vec::with_capacity(map.len());
        for (key, options) in map {
            let Some(name) = scalar_to_string(&key) else {
                warn!("Ignoring plugin with non-scalar name: {:?}", key);
                continue;
            };
            plugins.push(PluginConfig {
                name,
                options: PluginOptions(options),
            });
        }
        Ok(StagePlugins(plugins))
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Build-wide settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Log command output even when commands succeed
    #[serde(default)]
    pub verbose: bool,

    /// Paths plugins should skip, relative to the working copy
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Symlink local projects instead of copying them
    #[serde(default)]
    pub prefer_symlink: bool,
}

/// A parsed pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default, deserialize_with = "deserialize_build_settings")]
    pub build_settings: BuildSettings,

    #[serde(default)]
    pub setup: StagePlugins,

    #[serde(default)]
    pub test: StagePlugins,

    #[serde(default)]
    pub complete: StagePlugins,

    #[serde(default)]
    pub success: StagePlugins,

    #[serde(default)]
    pub failure: StagePlugins,
}

fn deserialize_build_settings<'de, D>(deserializer: D) -> Result<BuildSettings, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BuildSettings>::deserialize(deserializer)?.unwrap_or_default())
}

impl PipelineConfig {
    /// Plugins configured for a stage; empty when the stage is absent
    pub fn stage(&self, stage: Stage) -> &StagePlugins {
        match stage {
            Stage::Setup => &self.setup,
            Stage::Test => &self.test,
            Stage::Complete => &self.complete,
            Stage::Success => &self.success,
            Stage::Failure => &self.failure,
        }
    }

    /// Total number of configured plugin invocations
    pub fn plugin_count(&self) -> usize {
        [
            Stage::Setup,
            Stage::Test,
            Stage::Complete,
            Stage::Success,
            Stage::Failure,
        ]
        .iter()
        .map(|s| self.stage(*s).len())
        .sum()
    }
}
