//! Worker hosts: where jobs run when they leave the calling task.

use async_trait::async_trait;

use super::compute::handle_message;

/// Error type for worker hosts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    /// No worker is available.
    #[error("Worker unavailable")]
    Unavailable,
    /// The worker died while handling a message.
    #[error("Worker crashed: {0}")]
    Crashed(String),
}

/// A host that answers JSON job messages with JSON output messages.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Send one message and wait for the reply.
    async fn call(&self, message: String) -> Result<String, WorkerError>;
}

/// Worker host backed by tokio's blocking thread pool.
///
/// Messages still cross the JSON boundary, so this host exercises the same
/// encoding a process or thread worker would.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadWorkerHost;

impl ThreadWorkerHost {
    /// Create a host.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerHost for ThreadWorkerHost {
    async fn call(&self, message: String) -> Result<String, WorkerError> {
        tokio::task::spawn_blocking(move || handle_message(&message))
            .await
            .map_err(|e| WorkerError::Crashed(e.to_string()))
    }
}
