//! Job executors.
//!
//! ```text
//! FallbackExecutor
//!   ├─ primary: RemoteExecutor<WorkerHost>   (timeout + retries)
//!   └─ fallback: LocalExecutor               (always answers)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::compute::{run, ComputeJob, ComputeOutput};
use super::worker::{WorkerError, WorkerHost};

/// Error type for executors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// The worker host failed.
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
    /// The worker did not answer in time.
    #[error("Worker timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// The reply could not be decoded.
    #[error("Undecodable worker reply: {0}")]
    Decode(String),
    /// The reply was the wrong shape for the job.
    #[error("Expected reply to {expected} job, got {actual}")]
    FormatMismatch {
        /// Job kind.
        expected: &'static str,
        /// Output kind received.
        actual: &'static str,
    },
    /// The worker reported a failure.
    #[error("Worker failed: {0}")]
    Failed(String),
}

/// Something that runs compute jobs.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a job.
    async fn execute(&self, job: &ComputeJob) -> Result<ComputeOutput, ExecutorError>;
}

/// Runs jobs in the calling task.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, job: &ComputeJob) -> Result<ComputeOutput, ExecutorError> {
        Ok(run(job))
    }
}

/// Runs jobs on a [`WorkerHost`] over the JSON boundary.
#[derive(Debug)]
pub struct RemoteExecutor<H: WorkerHost> {
    host: Arc<H>,
}

impl<H: WorkerHost> RemoteExecutor<H> {
    /// Wrap a worker host.
    pub fn new(host: Arc<H>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl<H: WorkerHost> Executor for RemoteExecutor<H> {
    async fn execute(&self, job: &ComputeJob) -> Result<ComputeOutput, ExecutorError> {
        let message = serde_json::to_string(job).map_err(|e| ExecutorError::Decode(e.to_string()))?;
        let reply = self.host.call(message).await?;
        let output: ComputeOutput =
            serde_json::from_str(&reply).map_err(|e| ExecutorError::Decode(e.to_string()))?;

        match output {
            ComputeOutput::Failed { message } => Err(ExecutorError::Failed(message)),
            output if output.answers(job) => Ok(output),
            output => Err(ExecutorError::FormatMismatch {
                expected: job.kind(),
                actual: output.kind(),
            }),
        }
    }
}

/// Tries a primary executor with a timeout and retries, then runs the job
/// locally. Every local fallback after a primary failure is counted.
pub struct FallbackExecutor {
    primary: Option<Arc<dyn Executor>>,
    local: LocalExecutor,
    timeout: Duration,
    retries: u32,
    fallbacks: AtomicU64,
}

impl std::fmt::Debug for FallbackExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackExecutor")
            .field("has_primary", &self.primary.is_some())
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("fallbacks", &self.fallback_count())
            .finish()
    }
}

impl FallbackExecutor {
    /// Local-only executor.
    pub fn local() -> Self {
        Self {
            primary: None,
            local: LocalExecutor,
            timeout: Duration::ZERO,
            retries: 0,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Primary executor with timeout and retry count.
    pub fn with_primary(primary: Arc<dyn Executor>, timeout: Duration, retries: u32) -> Self {
        Self {
            primary: Some(primary),
            local: LocalExecutor,
            timeout,
            retries,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Whether a primary executor is configured.
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Number of jobs that fell back to local execution.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    async fn attempt(&self, primary: &dyn Executor, job: &ComputeJob) -> Result<ComputeOutput, ExecutorError> {
        match tokio::time::timeout(self.timeout, primary.execute(job)).await {
            Ok(Ok(output)) if output.answers(job) => Ok(output),
            Ok(Ok(output)) => Err(ExecutorError::FormatMismatch {
                expected: job.kind(),
                actual: output.kind(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ExecutorError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl Executor for FallbackExecutor {
    async fn execute(&self, job: &ComputeJob) -> Result<ComputeOutput, ExecutorError> {
        let Some(primary) = &self.primary else {
            return self.local.execute(job).await;
        };

        for attempt in 0..=self.retries {
            match self.attempt(primary.as_ref(), job).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    tracing::warn!(
                        job = job.kind(),
                        attempt = attempt + 1,
                        error = %e,
                        "Worker attempt failed"
                    );
                }
            }
        }

        let fallbacks = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(job = job.kind(), fallbacks, "Falling back to local execution");
        self.local.execute(job).await
    }
}
