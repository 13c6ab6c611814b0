//! Engine configuration.
//!
//! Environment variables:
//! - `LESSON_GRAPH_WORKER_ENABLED`: offload builds to the worker (default: true)
//! - `LESSON_GRAPH_WORKER_TIMEOUT_MS`: per-attempt worker timeout (default: 5000)
//! - `LESSON_GRAPH_WORKER_RETRIES`: worker retries before falling back (default: 1)
//! - `LESSON_GRAPH_CACHE_ENTRIES`: snapshot cache capacity (default: 32)
//! - `LESSON_GRAPH_ROUTE_STEPS`: router step budget (default: 6)

use std::time::Duration;

use crate::builder::BuildParams;
use crate::router::{RouterParams, DEFAULT_MAX_STEPS};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whether builds are sent to the worker host first.
    pub worker_enabled: bool,
    /// Timeout for one worker attempt.
    pub worker_timeout_ms: u64,
    /// Worker retries after the first failed attempt.
    pub worker_retries: u32,
    /// Maximum number of cached snapshots.
    pub cache_entries: usize,
    /// Builder coefficients.
    pub build_params: BuildParams,
    /// Router coefficients.
    pub router_params: RouterParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            worker_timeout_ms: 5_000,
            worker_retries: 1,
            cache_entries: 32,
            build_params: BuildParams::default(),
            router_params: RouterParams::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything missing or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_enabled: std::env::var("LESSON_GRAPH_WORKER_ENABLED")
                .ok()
                .and_then(|s| parse_flag(&s))
                .unwrap_or(defaults.worker_enabled),
            worker_timeout_ms: std::env::var("LESSON_GRAPH_WORKER_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.worker_timeout_ms),
            worker_retries: std::env::var("LESSON_GRAPH_WORKER_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.worker_retries),
            cache_entries: std::env::var("LESSON_GRAPH_CACHE_ENTRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.cache_entries),
            build_params: defaults.build_params,
            router_params: RouterParams {
                max_steps: std::env::var("LESSON_GRAPH_ROUTE_STEPS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_STEPS),
                ..defaults.router_params
            },
        }
    }

    /// Disable the worker host.
    pub fn without_worker(mut self) -> Self {
        self.worker_enabled = false;
        self
    }

    /// Worker timeout as a [`Duration`].
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.worker_enabled);
        assert_eq!(config.worker_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.router_params.max_steps, DEFAULT_MAX_STEPS);
        assert!(!config.without_worker().worker_enabled);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
