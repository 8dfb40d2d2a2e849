//! Build and project records
//!
//! This module contains the records the engine operates on:
//! - `Build` - One execution attempt of a project's pipeline
//! - `Project` - The project a build belongs to, with its source descriptor
//! - `store` - Persistence boundary (`BuildStore`) and an in-memory store
//! - `postback` - Status notification boundary (`StatusPostback`)

pub mod postback;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use postback::{NoopPostback, StatusPostback};
pub use store::{BuildStore, MemoryBuildStore, StoreError};

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl BuildStatus {
    /// Numeric code used by the persistence layer
    pub fn code(self) -> u8 {
        match self {
            BuildStatus::Pending => 0,
            BuildStatus::Running => 1,
            BuildStatus::Success => 2,
            BuildStatus::Failed => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BuildStatus::Pending),
            1 => Some(BuildStatus::Running),
            2 => Some(BuildStatus::Success),
            3 => Some(BuildStatus::Failed),
            _ => None,
        }
    }

    /// Whether the build has reached a final state
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Project
// ============================================================================

/// Hosting provider of a remote repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Github,
    Bitbucket,
    Gitlab,
    #[default]
    Git,
}

/// Where a project's source comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProjectSource {
    /// A git repository cloned over SSH (when a key is set) or HTTP(S)
    Remote {
        #[serde(default)]
        provider: Provider,
        /// Clone URL; may be left empty for GitLab projects with access details
        #[serde(default)]
        url: String,
        /// Web-facing reference, e.g. `owner/repo`
        #[serde(default)]
        reference: Option<String>,
        /// Private key for SSH clones
        #[serde(default)]
        ssh_key: Option<String>,
        /// Self-hosted GitLab instance the clone URL is composed from
        #[serde(default)]
        gitlab: Option<GitLabAccess>,
    },
    /// A directory on the build host, copied or symlinked into place
    Local { path: PathBuf },
}

impl ProjectSource {
    /// URL to clone a remote source from
    ///
    /// An explicit `url` wins; otherwise it is composed from the GitLab
    /// access details and the reference. `None` for local sources.
    pub fn clone_url(&self) -> Option<String> {
        let ProjectSource::Remote {
            url,
            reference,
            gitlab,
            ..
        } = self
        else {
            return None;
        };

        if !url.trim().is_empty() {
            return Some(url.clone());
        }
        match (gitlab, reference) {
            (Some(access), Some(reference)) => Some(access.clone_url(reference)),
            _ => None,
        }
    }
}

/// A project record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub title: String,
    pub source: ProjectSource,
}

impl Project {
    pub fn new(id: u64, title: impl Into<String>, source: ProjectSource) -> Self {
        Self {
            id,
            title: title.into(),
            source,
        }
    }
}

/// Access details for a self-hosted GitLab instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLabAccess {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub user: Option<String>,
    pub domain: String,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_protocol() -> String {
    "ssh".to_string()
}

impl GitLabAccess {
    /// Compose the clone URL for `reference` (e.g. `group/project`)
    pub fn clone_url(&self, reference: &str) -> String {
        let user = match &self.user {
            Some(user) if !user.is_empty() => format!("{}@", user),
            _ => String::new(),
        };
        let port = match self.port {
            Some(port) => format!(":{}/", port),
            None => ":".to_string(),
        };
        format!(
            "{}://{}{}{}{}.git",
            self.protocol, user, self.domain, port, reference
        )
    }
}

// ============================================================================
// Build
// ============================================================================

/// Pull request a build was triggered from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub remote_url: Option<String>,
    pub remote_branch: Option<String>,
}

/// One execution attempt of a project's pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: u64,
    pub project: Project,
    pub commit_id: String,
    pub branch: String,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    #[serde(default)]
    status: BuildStatus,
    created: DateTime<Utc>,
    #[serde(default)]
    started: Option<DateTime<Utc>>,
    #[serde(default)]
    finished: Option<DateTime<Utc>>,
    #[serde(default)]
    log: String,
    #[serde(default)]
    plugins: BTreeMap<String, bool>,
    #[serde(default)]
    meta: BTreeMap<String, serde_json::Value>,
}

impl Build {
    /// Create a pending build
    pub fn new(
        id: u64,
        project: Project,
        commit_id: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            id,
            project,
            commit_id: commit_id.into(),
            branch: branch.into(),
            pull_request: None,
            status: BuildStatus::Pending,
            created: Utc::now(),
            started: None,
            finished: None,
            log: String::new(),
            plugins: BTreeMap::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_pull_request(mut self, pull_request: PullRequest) -> Self {
        self.pull_request = Some(pull_request);
        self
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn set_status(&mut self, status: BuildStatus) {
        self.status = status;
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.started
    }

    pub fn set_started(&mut self, at: DateTime<Utc>) {
        self.started = Some(at);
    }

    pub fn finished(&self) -> Option<DateTime<Utc>> {
        self.finished
    }

    pub fn set_finished(&mut self, at: DateTime<Utc>) {
        self.finished = Some(at);
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn set_log(&mut self, log: impl Into<String>) {
        self.log = log.into();
    }

    pub fn plugin_outcomes(&self) -> &BTreeMap<String, bool> {
        &self.plugins
    }

    pub fn set_plugin_outcomes(&mut self, outcomes: BTreeMap<String, bool>) {
        self.plugins = outcomes;
    }

    /// Outcome map as the JSON blob the persistence layer stores
    pub fn plugin_outcomes_json(&self) -> String {
        serde_json::to_string(&self.plugins).unwrap_or_else(|_| "{}".to_string())
    }

    /// Store a metadata value under a namespaced key, replacing any previous value
    pub fn store_meta(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.meta.insert(key.into(), value.into());
    }

    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.meta.get(key)
    }

    pub fn all_meta(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.meta
    }

    /// Link to the build's commit on the hosting provider
    pub fn commit_link(&self) -> Option<String> {
        let (provider, base) = self.web_base()?;
        Some(match provider {
            Provider::Bitbucket => format!("{}/commits/{}", base, self.commit_id),
            _ => format!("{}/commit/{}", base, self.commit_id),
        })
    }

    /// Link to the build's branch on the hosting provider
    pub fn branch_link(&self) -> Option<String> {
        let (provider, base) = self.web_base()?;
        Some(match provider {
            Provider::Bitbucket => format!("{}/src/?at={}", base, self.branch),
            _ => format!("{}/tree/{}", base, self.branch),
        })
    }

    fn web_base(&self) -> Option<(Provider, String)> {
        let ProjectSource::Remote {
            provider,
            reference: Some(reference),
            url,
            gitlab,
            ..
        } = &self.project.source
        else {
            return None;
        };

        let domain = match provider {
            Provider::Github => "github.com".to_string(),
            Provider::Bitbucket => "bitbucket.org".to_string(),
            Provider::Gitlab => match gitlab {
                Some(access) => access.domain.clone(),
                None => remote_domain(url)?,
            },
            Provider::Git => return None,
        };
        Some((*provider, format!("https://{}/{}", domain, reference)))
    }
}

/// Extract the host from `scheme://[user@]host[:port]/...` or `user@host:path`
fn remote_domain(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let rest = rest.rsplit_once('@').map(|(_, r)| r).unwrap_or(rest);
    let host = rest.split(|c| c == '/' || c == ':').next()?;
    (!host.is_empty()).then(|| host.to_string())
}
