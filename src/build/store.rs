//! Build persistence boundary
//!
//! The engine only needs to load a build, save it at checkpoints, and find
//! builds by status. Durable storage lives outside this crate; the
//! in-memory store backs the CLI and the tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Build, BuildStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Build not found: {0}")]
    NotFound(u64),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Persistence layer for build records
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Load a build by id
    async fn get(&self, id: u64) -> Result<Option<Build>, StoreError>;

    /// Insert or replace a build record
    async fn save(&self, build: &Build) -> Result<(), StoreError>;

    /// All builds currently in `status`, ordered by id
    async fn by_status(&self, status: BuildStatus) -> Result<Vec<Build>, StoreError>;
}

/// In-memory build store
#[derive(Debug, Clone, Default)]
pub struct MemoryBuildStore {
    builds: Arc<RwLock<HashMap<u64, Build>>>,
    saves: Arc<RwLock<usize>>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far
    pub async fn save_count(&self) -> usize {
        *self.saves.read().await
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn get(&self, id: u64) -> Result<Option<Build>, StoreError> {
        Ok(self.builds.read().await.get(&id).cloned())
    }

    async fn save(&self, build: &Build) -> Result<(), StoreError> {
        self.builds.write().await.insert(build.id, build.clone());
        *self.saves.write().await += 1;
        Ok(())
    }

    async fn by_status(&self, status: BuildStatus) -> Result<Vec<Build>, StoreError> {
        let builds = self.builds.read().await;
        let mut matching: Vec<Build> = builds
            .values()
            .filter(|b| b.status() == status)
            .cloned()
            .collect();
        matching.sort_by_key(|b| b.id);
        Ok(matching)
    }
}
