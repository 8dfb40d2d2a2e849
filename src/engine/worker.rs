//! Build worker
//!
//! Picks up pending builds from the store and runs them, at most
//! `max_concurrent_builds` at a time. Each build has its own working copy,
//! so builds never share state.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

use super::builder::Builder;
use super::error::BuilderError;
use super::result::BuildResult;
use crate::build::BuildStatus;

/// Outcome of one worker pass
#[derive(Debug, Default)]
pub struct WorkerReport {
    pub results: Vec<BuildResult>,
    /// Builds that could not be executed, with the reason
    pub errors: Vec<(u64, String)>,
}

impl WorkerReport {
    /// Whether every build ran and succeeded
    pub fn success(&self) -> bool {
        self.errors.is_empty() && self.results.iter().all(|r| r.success())
    }
}

pub struct BuildWorker {
    builder: Builder,
    max_concurrent: usize,
}

impl BuildWorker {
    pub fn new(builder: Builder) -> Self {
        let max_concurrent = builder.config().max_concurrent_builds.max(1);
        Self {
            builder,
            max_concurrent,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    /// Run every build currently pending
    pub async fn run_pending(&self) -> Result<WorkerReport, BuilderError> {
        let pending = self.builder.store().by_status(BuildStatus::Pending).await?;
        if pending.is_empty() {
            info!("No pending builds");
            return Ok(WorkerReport::default());
        }
        info!(
            "Running {} pending build(s), {} at a time",
            pending.len(),
            self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let runs = pending.into_iter().map(|build| {
            let semaphore = semaphore.clone();
            async move {
                let id = build.id;
                let result = match semaphore.acquire().await {
                    Ok(_permit) => self.builder.execute(build).await,
                    Err(e) => Err(BuilderError::Internal(e.to_string())),
                };
                (id, result)
            }
        });

        let mut report = WorkerReport::default();
        for (id, result) in join_all(runs).await {
            match result {
                Ok(result) => report.results.push(result),
                Err(e) => {
                    error!("Build {} could not be executed: {}", id, e);
                    report.errors.push((id, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}
