//! Runtime configuration
//!
//! All resource bounds and tuning knobs for the cognitive loop. Defaults
//! match the documented contract; `load` layers an optional TOML file and
//! `DAWN_`-prefixed environment variables on top.

use crate::error::{DawnError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the cognitive runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Shortest allowed tick interval
    ///
    /// Default: 100 ms
    #[serde(with = "humantime_serde")]
    pub tick_interval_min: Duration,

    /// Longest allowed tick interval
    ///
    /// Default: 5 s
    #[serde(with = "humantime_serde")]
    pub tick_interval_max: Duration,

    /// Trailing window for entropy profiles
    ///
    /// Default: 50 samples
    pub volatility_window: usize,

    /// Chaos score at which stabilization is recommended
    ///
    /// Default: 0.7
    pub chaos_threshold: f64,

    /// Per-bloom entropy ring capacity
    ///
    /// Default: 1000 samples
    pub entropy_ring_capacity: usize,

    /// Maximum live sigils; overflow drops the lowest priority
    ///
    /// Default: 128
    pub sigil_capacity: usize,

    /// Working memory pool capacity (LRU)
    ///
    /// Default: 50
    pub working_capacity: usize,

    /// Recent memory pool capacity (FIFO)
    ///
    /// Default: 200
    pub recent_capacity: usize,

    /// Soft cap on the significant pool; lowest importance evicted beyond it
    ///
    /// Default: 5000
    pub significant_soft_cap: usize,

    /// Maximum blooms before dormant pruning
    ///
    /// Default: 5000
    pub bloom_capacity: usize,

    /// Bounded intervention log length
    ///
    /// Default: 10000
    pub intervention_log_capacity: usize,

    /// Interval between memory checkpoints (also written on stop)
    ///
    /// Default: 300 s
    #[serde(with = "humantime_serde")]
    pub checkpoint_interval: Duration,

    /// Deadline for subsystem callbacks (routing, persistence)
    ///
    /// Default: 250 ms
    #[serde(with = "humantime_serde")]
    pub callback_timeout: Duration,

    /// Root directory for persisted state
    ///
    /// Default: `./dawn_state`
    pub state_root: PathBuf,

    /// Session identifier for the memory log; generated when absent
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_min: Duration::from_millis(100),
            tick_interval_max: Duration::from_secs(5),
            volatility_window: 50,
            chaos_threshold: 0.7,
            entropy_ring_capacity: 1000,
            sigil_capacity: 128,
            working_capacity: 50,
            recent_capacity: 200,
            significant_soft_cap: 5000,
            bloom_capacity: 5000,
            intervention_log_capacity: 10_000,
            checkpoint_interval: Duration::from_secs(300),
            callback_timeout: Duration::from_millis(250),
            state_root: PathBuf::from("./dawn_state"),
            session_id: None,
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state root directory.
    pub fn with_state_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.state_root = root.into();
        self
    }

    /// Set the session identifier.
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Set the tick interval bounds.
    pub fn with_interval_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.tick_interval_min = min;
        self.tick_interval_max = max;
        self
    }

    /// Set the entropy profile window.
    pub fn with_volatility_window(mut self, window: usize) -> Self {
        self.volatility_window = window;
        self
    }

    /// Set the chaos threshold.
    pub fn with_chaos_threshold(mut self, threshold: f64) -> Self {
        self.chaos_threshold = threshold;
        self
    }

    /// Set the checkpoint interval.
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Set the callback deadline.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Layer defaults, an optional TOML file, and `DAWN_` environment
    /// variables (e.g. `DAWN_CHAOS_THRESHOLD=0.8`).
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Self::default())
                .map_err(|e| DawnError::Config(format!("defaults failed to serialize: {e}")))?,
        );

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let cfg = builder
            .add_source(config::Environment::with_prefix("DAWN"))
            .build()
            .map_err(|e| DawnError::Config(e.to_string()))?
            .try_deserialize::<Self>()
            .map_err(|e| DawnError::Config(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration bounds.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_min < Duration::from_millis(10) {
            return Err(DawnError::Config(
                "tick_interval_min must be at least 10 ms".to_string(),
            ));
        }

        if self.tick_interval_max <= self.tick_interval_min {
            return Err(DawnError::Config(
                "tick_interval_max must exceed tick_interval_min".to_string(),
            ));
        }

        if self.volatility_window < 2 {
            return Err(DawnError::Config(
                "volatility_window must be at least 2".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.chaos_threshold) || self.chaos_threshold == 0.0 {
            return Err(DawnError::Config(
                "chaos_threshold must be in (0, 1]".to_string(),
            ));
        }

        if self.entropy_ring_capacity == 0
            || self.sigil_capacity == 0
            || self.working_capacity == 0
            || self.recent_capacity == 0
            || self.bloom_capacity == 0
            || self.intervention_log_capacity == 0
        {
            return Err(DawnError::Config(
                "resource capacities must be greater than 0".to_string(),
            ));
        }

        if self.callback_timeout.is_zero() {
            return Err(DawnError::Config(
                "callback_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Interval bounds as seconds, for the interval law.
    pub fn interval_bounds_secs(&self) -> (f64, f64) {
        (
            self.tick_interval_min.as_secs_f64(),
            self.tick_interval_max.as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.volatility_window, 50);
        assert_eq!(config.sigil_capacity, 128);
        assert_eq!(config.checkpoint_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_pattern() {
        let config = RuntimeConfig::new()
            .with_state_root("/tmp/dawn")
            .with_session_id("test-session")
            .with_chaos_threshold(0.8)
            .with_volatility_window(25);

        assert_eq!(config.state_root, PathBuf::from("/tmp/dawn"));
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
        assert_eq!(config.chaos_threshold, 0.8);
        assert_eq!(config.volatility_window, 25);
    }

    #[test]
    fn test_validation_rejects_inverted_bounds() {
        let config = RuntimeConfig::default()
            .with_interval_bounds(Duration::from_secs(5), Duration::from_millis(100));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_chaos_threshold() {
        let config = RuntimeConfig::default().with_chaos_threshold(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_tiny_min_interval() {
        let config = RuntimeConfig::default()
            .with_interval_bounds(Duration::from_millis(1), Duration::from_secs(5));
        assert!(config.validate().is_err());
    }
}
