//! Worker boundary: tagged JSON jobs and their outputs.
//!
//! The same pure functions run in-process and behind a [`super::WorkerHost`].
//! [`handle_message`] is the worker entry point.

use serde::{Deserialize, Serialize};

use crate::builder::{BuildInput, BuildParams, GraphBuilder};
use crate::bundler::{BundleResult, EdgeBundler, ZoomBand};
use crate::diff::{DiffEngine, DiffSnapshot};
use crate::types::Snapshot;

/// A unit of work for the builder, diff engine or bundler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputeJob {
    /// Build a snapshot.
    #[serde(rename_all = "camelCase")]
    Build {
        /// Records and filters.
        input: BuildInput,
        /// Builder coefficients.
        params: BuildParams,
    },
    /// Diff two snapshots.
    #[serde(rename_all = "camelCase")]
    Diff {
        /// Base snapshot.
        base: Snapshot,
        /// Compare snapshot.
        compare: Snapshot,
    },
    /// Bundle edges for a zoom band.
    #[serde(rename_all = "camelCase")]
    Bundle {
        /// Snapshot to bundle.
        snapshot: Snapshot,
        /// Target band.
        zoom_band: ZoomBand,
    },
}

impl ComputeJob {
    /// Stable job name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Build { .. } => "build",
            Self::Diff { .. } => "diff",
            Self::Bundle { .. } => "bundle",
        }
    }

    /// Input of a build job.
    pub fn build_input(&self) -> Option<&BuildInput> {
        match self {
            Self::Build { input, .. } => Some(input),
            _ => None,
        }
    }
}

/// Result of a [`ComputeJob`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputeOutput {
    /// Output of [`ComputeJob::Build`].
    Built {
        /// Built snapshot.
        snapshot: Snapshot,
    },
    /// Output of [`ComputeJob::Diff`].
    Diffed {
        /// Diff result.
        diff: DiffSnapshot,
    },
    /// Output of [`ComputeJob::Bundle`].
    Bundled {
        /// Bundle result.
        bundle: BundleResult,
    },
    /// The message could not be handled.
    Failed {
        /// Failure description.
        message: String,
    },
}

impl ComputeOutput {
    /// Stable output name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Built { .. } => "built",
            Self::Diffed { .. } => "diffed",
            Self::Bundled { .. } => "bundled",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether this output is the right shape for `job`.
    pub fn answers(&self, job: &ComputeJob) -> bool {
        matches!(
            (job, self),
            (ComputeJob::Build { .. }, Self::Built { .. })
                | (ComputeJob::Diff { .. }, Self::Diffed { .. })
                | (ComputeJob::Bundle { .. }, Self::Bundled { .. })
        )
    }
}

/// Run a job in the current thread.
pub fn run(job: &ComputeJob) -> ComputeOutput {
    match job {
        ComputeJob::Build { input, params } => ComputeOutput::Built {
            snapshot: GraphBuilder::new(params.clone()).build(input),
        },
        ComputeJob::Diff { base, compare } => ComputeOutput::Diffed {
            diff: DiffEngine::default().diff(base, compare),
        },
        ComputeJob::Bundle { snapshot, zoom_band } => ComputeOutput::Bundled {
            bundle: EdgeBundler::new().bundle(snapshot, *zoom_band),
        },
    }
}

/// Worker entry point: decode a job, run it, encode the output.
///
/// Never panics on bad input; undecodable messages produce a
/// [`ComputeOutput::Failed`] reply.
pub fn handle_message(message: &str) -> String {
    let output = match serde_json::from_str::<ComputeJob>(message) {
        Ok(job) => run(&job),
        Err(e) => ComputeOutput::Failed {
            message: format!("invalid job: {e}"),
        },
    };
    match serde_json::to_string(&output) {
        Ok(reply) => reply,
        Err(e) => serde_json::json!({ "kind": "failed", "message": e.to_string() }).to_string(),
    }
}
