//! Derived node metrics.
//!
//! Formulas:
//! ```text
//! sample_confidence = n / (n + prior)
//! impact            = confidence * ln(1 + n) * (1 + |skew|) / 2,  skew = (wins - losses) / n
//! recency(t)        = 0.5 ^ ((reference - t) / half_life)
//! hot               = sum(recency(t) for t in activity) >= threshold
//! ```
//!
//! Impact is monotonic in confidence and in sample size. All outputs are
//! rounded with [`round_metric`] before they are stored.

use crate::canonical::round_metric;
use crate::types::Outcome;

use super::params::BuildParams;

/// Outcome counts over a set of cases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Winning cases.
    pub wins: u64,
    /// Losing cases.
    pub losses: u64,
    /// Breakeven or open cases.
    pub other: u64,
}

impl Tally {
    /// Count one outcome.
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Breakeven | Outcome::Open => self.other += 1,
        }
    }

    /// Total cases.
    pub fn total(&self) -> u64 {
        self.wins + self.losses + self.other
    }

    /// Outcome skew in [-1, 1]; zero for an empty tally.
    pub fn skew(&self) -> f64 {
        let n = self.total();
        if n == 0 {
            return 0.0;
        }
        (self.wins as f64 - self.losses as f64) / n as f64
    }

    /// Win rate over decided cases.
    pub fn win_rate(&self) -> Option<f64> {
        let decided = self.wins + self.losses;
        if decided == 0 {
            None
        } else {
            Some(round_metric(self.wins as f64 / decided as f64))
        }
    }
}

/// Confidence earned by sample size alone.
pub fn sample_confidence(n: u64, params: &BuildParams) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let prior = params.sample_prior.max(0.0);
    round_metric(n as f64 / (n as f64 + prior))
}

/// Confidence-weighted impact of a node's evidence set.
pub fn impact_score(confidence: f64, n: u64, skew: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let confidence = clamp_unit(confidence);
    let skew = if skew.is_finite() { skew.abs().min(1.0) } else { 0.0 };
    round_metric(confidence * (1.0 + n as f64).ln() * (1.0 + skew) / 2.0)
}

/// Recency weight of an event relative to the reference time.
pub fn recency_weight(ts_ms: i64, reference_ms: i64, half_life_ms: i64) -> f64 {
    if half_life_ms <= 0 {
        return if ts_ms >= reference_ms { 1.0 } else { 0.0 };
    }
    let age = (reference_ms - ts_ms).max(0) as f64;
    0.5f64.powf(age / half_life_ms as f64)
}

/// Sum of recency weights over activity timestamps.
pub fn activity_score(timestamps: &[i64], reference_ms: i64, params: &BuildParams) -> f64 {
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    let total: f64 = sorted
        .iter()
        .map(|&ts| recency_weight(ts, reference_ms, params.hot_half_life_ms))
        .sum();
    round_metric(total)
}

/// Whether decayed activity reaches the hot threshold.
pub fn is_hot(timestamps: &[i64], reference_ms: i64, params: &BuildParams) -> bool {
    !timestamps.is_empty() && activity_score(timestamps, reference_ms, params) >= params.hot_threshold
}

/// Mean of a slice, `None` when empty. Summed in sorted order so the result
/// does not depend on input order.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(round_metric(sorted.iter().sum::<f64>() / sorted.len() as f64))
}

/// Clamp to [0, 1]; non-finite values become 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally() {
        let mut tally = Tally::default();
        for _ in 0..10 {
            tally.record(Outcome::Win);
        }
        for _ in 0..5 {
            tally.record(Outcome::Loss);
        }
        tally.record(Outcome::Open);
        assert_eq!(tally.total(), 16);
        assert_eq!(tally.win_rate(), Some(0.666667));
        assert!((tally.skew() - 5.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_impact_monotonic_in_confidence() {
        assert!(impact_score(0.9, 10, 0.2) > impact_score(0.5, 10, 0.2));
    }

    #[test]
    fn test_impact_monotonic_in_sample_size() {
        assert!(impact_score(0.7, 20, 0.2) > impact_score(0.7, 10, 0.2));
        assert_eq!(impact_score(0.7, 0, 0.2), 0.0);
    }

    #[test]
    fn test_sample_confidence() {
        let params = BuildParams::default();
        assert_eq!(sample_confidence(15, &params), 0.75);
        assert_eq!(sample_confidence(0, &params), 0.0);
    }

    #[test]
    fn test_recency_halves_per_half_life() {
        let w = recency_weight(0, 1000, 1000);
        assert!((w - 0.5).abs() < 1e-12);
        assert_eq!(recency_weight(2000, 1000, 1000), 1.0);
    }

    #[test]
    fn test_hot_threshold() {
        let params = BuildParams::default();
        let recent = vec![1_000; 3];
        assert!(is_hot(&recent, 1_000, &params));
        assert!(!is_hot(&recent[..2], 1_000, &params));
        assert!(!is_hot(&[], 1_000, &params));
    }
}
