//! Build parameters: the tunable coefficients behind derived metrics.
//!
//! ## Float Normalization for Deterministic Hashing
//!
//! Parameters are part of the scope key. Floats are quantized to integers
//! before hashing (see [`crate::canonical::quantize`]) so that the hash does
//! not depend on float formatting.

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_hash_hex, quantize};
use crate::BUILD_PARAMS_VERSION;

/// Default half-life for recency weighting: three days.
pub const DEFAULT_HOT_HALF_LIFE_MS: i64 = 3 * 24 * 60 * 60 * 1000;

/// Coefficients for the graph builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildParams {
    /// Pseudo-count in the sample confidence `n / (n + prior)`.
    pub sample_prior: f64,
    /// Half-life of an activity event for the hot score.
    pub hot_half_life_ms: i64,
    /// Decayed activity at or above which a node is hot.
    pub hot_threshold: f64,
    /// Maximum evidence case ids kept per node.
    pub max_evidence_ids: usize,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            sample_prior: 5.0,
            hot_half_life_ms: DEFAULT_HOT_HALF_LIFE_MS,
            hot_threshold: 3.0,
            max_evidence_ids: 50,
        }
    }
}

impl BuildParams {
    /// Parameter-set identifier.
    pub fn params_id(&self) -> &'static str {
        BUILD_PARAMS_VERSION
    }

    /// Deterministic hash of the parameters.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(&QuantizedBuildParams {
            version: BUILD_PARAMS_VERSION.to_string(),
            sample_prior: quantize(self.sample_prior),
            hot_half_life_ms: self.hot_half_life_ms,
            hot_threshold: quantize(self.hot_threshold),
            max_evidence_ids: self.max_evidence_ids,
        })
    }
}

/// Quantized parameters for deterministic hashing.
#[derive(Serialize)]
struct QuantizedBuildParams {
    version: String,
    sample_prior: i64,
    hot_half_life_ms: i64,
    hot_threshold: i64,
    max_evidence_ids: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_hash_determinism() {
        assert_eq!(BuildParams::default().params_hash(), BuildParams::default().params_hash());
    }

    #[test]
    fn test_params_hash_changes_with_params() {
        let mut changed = BuildParams::default();
        changed.hot_threshold = 4.0;
        assert_ne!(BuildParams::default().params_hash(), changed.params_hash());
    }

    #[test]
    fn test_float_noise_does_not_change_hash() {
        let mut a = BuildParams::default();
        let mut b = BuildParams::default();
        a.sample_prior = 0.1 + 0.2;
        b.sample_prior = 0.3;
        assert_eq!(a.params_hash(), b.params_hash());
    }
}
