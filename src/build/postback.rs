//! Status postback boundary
//!
//! Fired when a build starts and when it finishes. The transport (commit
//! status APIs, chat hooks, ...) is provided by the embedding server.

use async_trait::async_trait;

use super::Build;

#[derive(Debug, thiserror::Error)]
#[error("Status postback failed: {0}")]
pub struct PostbackError(pub String);

/// Receives build status changes
#[async_trait]
pub trait StatusPostback: Send + Sync {
    async fn send_status(&self, build: &Build) -> Result<(), PostbackError>;
}

/// Postback that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPostback;

#[async_trait]
impl StatusPostback for NoopPostback {
    async fn send_status(&self, _build: &Build) -> Result<(), PostbackError> {
        Ok(())
    }
}
