//! Engine configuration that downstream crates can serialize/deserialize.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity (rows) of every bounded row channel in threaded mode.
    pub rowset_capacity: usize,

    /// How long a step with several inputs waits on one channel before
    /// moving to the next one.
    pub poll_interval_ms: u64,

    /// Row-level errors a step may divert before it fails. Steps may override.
    pub default_error_tolerance: u64,

    /// Check every written row against its schema (types, not only arity).
    pub safe_mode: bool,

    /// Optional stack size for step threads.
    pub thread_stack_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rowset_capacity: 10_000,
            poll_interval_ms: 20,
            default_error_tolerance: 0,
            safe_mode: false,
            thread_stack_size: None,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `ROWFLOW_ROWSET_CAPACITY`: rows per bounded channel
    /// - `ROWFLOW_POLL_INTERVAL_MS`: fan-in poll interval
    /// - `ROWFLOW_ERROR_TOLERANCE`: default error tolerance
    /// - `ROWFLOW_SAFE_MODE`: `true`/`false`
    /// - `ROWFLOW_THREAD_STACK_SIZE`: step thread stack size in bytes
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("ROWFLOW_ROWSET_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.rowset_capacity = v;
            }
        }

        if let Ok(s) = std::env::var("ROWFLOW_POLL_INTERVAL_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.poll_interval_ms = v;
            }
        }

        if let Ok(s) = std::env::var("ROWFLOW_ERROR_TOLERANCE") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.default_error_tolerance = v;
            }
        }

        if let Ok(s) = std::env::var("ROWFLOW_SAFE_MODE") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.safe_mode = v;
            }
        }

        if let Ok(s) = std::env::var("ROWFLOW_THREAD_STACK_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.thread_stack_size = Some(v);
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.rowset_capacity == 0 {
            return Err(Error::Config("rowset_capacity must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_error_tolerance, 0);
    }

    #[test]
    fn zero_capacity_rejected() {
        let cfg = EngineConfig {
            rowset_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"rowset_capacity": 5}"#).unwrap();
        assert_eq!(cfg.rowset_capacity, 5);
        assert_eq!(cfg.poll_interval_ms, 20);
    }
}
