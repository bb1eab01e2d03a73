//! Core types for the cognitive runtime
//!
//! Value types exchanged between subsystems. Mutable state lives inside the
//! owning component; everything here is passed by value as per-tick
//! snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Qualitative heat band derived from the pulse scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Zone {
    /// heat < 40
    Calm,
    /// 40 <= heat < 60
    Active,
    /// heat >= 60
    Surge,
}

impl Zone {
    /// Zone is a pure function of heat.
    pub fn from_heat(heat: f64) -> Self {
        if heat < 40.0 {
            Self::Calm
        } else if heat < 60.0 {
            Self::Active
        } else {
            Self::Surge
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Calm => "CALM",
            Self::Active => "ACTIVE",
            Self::Surge => "SURGE",
        };
        write!(f, "{}", s)
    }
}

/// Result of one heat update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseDelta {
    /// Heat before the update
    pub previous: f64,
    /// Heat after the update
    pub current: f64,
    /// Applied delta (bounded to +/-15 per update)
    pub delta: f64,
    /// Zone after the update
    pub zone: Zone,
    /// Whether the update crossed a zone boundary
    pub zone_changed: bool,
}

/// Read-only view of the pulse state handed to subsystems each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseSnapshot {
    /// Cognitive load in [0, 100]
    pub heat: f64,
    /// Derived heat band
    pub zone: Zone,
    /// Semantic coherence under pressure, in [0, 1]
    pub scup: f64,
    /// Qualitative mood label derived from heat
    pub mood: String,
    /// Remaining grace seconds (0 when no grace is open)
    pub grace_remaining_secs: f64,
    /// Whether a surge is currently open
    pub surge_active: bool,
}

/// Pulse context frozen into a stored memory chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseState {
    /// Heat at store time
    pub heat: f64,
    /// Entropy sampled during the originating tick
    pub entropy: f64,
    /// Coherence at store time
    pub scup: f64,
    /// Mood label at store time
    pub mood: String,
    /// Zone at store time
    pub zone: Zone,
    /// Error recorded during the originating tick, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entropy measurement for a bloom. Immutable; appended into a bounded
/// per-bloom ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropySample {
    /// Bloom the sample belongs to
    pub bloom_id: String,
    /// Entropy in [0, 1]
    pub entropy: f64,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Origin tag (e.g. `tick`, `ingest`, `rebloom`)
    pub source: String,
}

/// Direction of an entropy series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// No significant slope
    Stable,
    /// Rising
    Increasing,
    /// Falling
    Decreasing,
    /// Alternating sign changes dominate
    Oscillating,
}

/// Derived statistics over a bloom's trailing entropy window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyProfile {
    /// Window mean
    pub mean: f64,
    /// Window variance
    pub variance: f64,
    /// Window standard deviation
    pub std_dev: f64,
    /// Series direction
    pub trend: Trend,
    /// Normalized dispersion in [0, 1]
    pub volatility: f64,
    /// Composite instability prediction in [0, 1]
    pub chaos_score: f64,
    /// Pearson correlation with recent heat, in [-1, 1]
    pub thermal_correlation: f64,
    /// Samples contributing to the window
    pub sample_count: usize,
}

impl Default for EntropyProfile {
    fn default() -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            std_dev: 0.0,
            trend: Trend::Stable,
            volatility: 0.0,
            chaos_score: 0.0,
            thermal_correlation: 0.0,
            sample_count: 0,
        }
    }
}

/// Risk band assigned to a chaos score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    /// chaos < 0.7
    Low,
    /// 0.7 <= chaos < 0.8
    Medium,
    /// 0.8 <= chaos < 0.9
    High,
    /// chaos >= 0.9
    Critical,
}

impl RiskBand {
    /// Band for a chaos score.
    pub fn from_chaos(chaos: f64) -> Self {
        if chaos >= 0.9 {
            Self::Critical
        } else if chaos >= 0.8 {
            Self::High
        } else if chaos >= 0.7 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Stabilization recommendation for an unstable bloom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosAlert {
    /// Bloom predicted to destabilize
    pub bloom_id: String,
    /// Composite chaos score
    pub chaos_score: f64,
    /// Risk band of the score
    pub risk: RiskBand,
    /// Literal sigil names recommended as countermeasures
    pub recommended_actions: Vec<String>,
    /// When the alert was raised
    pub timestamp: DateTime<Utc>,
}

/// A z-score outlier in a bloom's entropy ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Bloom the outlier belongs to
    pub bloom_id: String,
    /// Index into the ring at detection time
    pub index: usize,
    /// Outlier value
    pub entropy: f64,
    /// Z-score against the full ring
    pub z_score: f64,
    /// Sample timestamp
    pub timestamp: DateTime<Utc>,
}

/// Atomic memory record of one event or tick. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryChunk {
    /// Unique identifier
    pub id: Uuid,
    /// When the chunk was created
    pub timestamp: DateTime<Utc>,
    /// Originating speaker (`dawn`, `system`, `user`, ...)
    pub speaker: String,
    /// Optional topic tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Chunk payload
    pub content: String,
    /// Pulse context frozen at store time
    pub pulse_state: PulseState,
    /// Sigil names associated with the originating tick
    #[serde(default)]
    pub sigils: Vec<String>,
}

/// Which pools a chunk was routed into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSet {
    /// Working pool (cap 50, LRU)
    pub working: bool,
    /// Recent pool (cap 200, FIFO)
    pub recent: bool,
    /// Significant pool (importance-evicted over soft cap)
    pub significant: bool,
}

/// A sigil fired during a tick, as reported in [`TickResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredSigil {
    /// Sigil id
    pub id: String,
    /// Sigil name
    pub name: String,
    /// Routing house
    pub house: String,
    /// Target tag the execution was routed to
    pub routed_to: String,
}

/// Pulse summary embedded in [`TickResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickPulse {
    /// Heat after the tick
    pub heat: f64,
    /// Zone after the tick
    pub zone: Zone,
    /// Interval that will precede the next tick, seconds
    pub interval_secs: f64,
}

/// Entropy summary embedded in [`TickResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEntropy {
    /// Highest entropy sampled during the tick, if any sample arrived
    pub current: Option<f64>,
    /// Profile of the bloom that produced the current sample
    pub profile: Option<EntropyProfile>,
}

/// Outcome of one cognitive cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickResult {
    /// Monotonic tick number
    pub tick_number: u64,
    /// When the tick started
    pub timestamp: DateTime<Utc>,
    /// Pulse after the tick
    pub pulse: TickPulse,
    /// Entropy view of the tick
    pub entropy_snapshot: TickEntropy,
    /// Sigils executed this tick (at most one, plus emergency paths)
    pub sigils_fired: Vec<FiredSigil>,
    /// Intervention commands issued this tick, in order
    pub interventions_triggered: Vec<String>,
    /// Chunk emitted for this cycle
    pub memory_chunk_id: Option<Uuid>,
    /// Cycle duration in milliseconds
    pub duration_ms: u64,
    /// First error recorded during the cycle, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate scheduler state, cheap to copy out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the loop is currently running
    pub running: bool,
    /// Ticks completed so far
    pub tick_count: u64,
    /// Duration of the last completed tick, milliseconds
    pub last_duration_ms: u64,
    /// Seconds since construction
    pub uptime_secs: u64,
    /// Interval that will precede the next tick, seconds
    pub current_interval_secs: f64,
    /// Consecutive failed cycles (resets on success)
    pub consecutive_failures: u32,
    /// Chunks stored since start
    pub chunks_stored: u64,
    /// Sigils executed since start
    pub sigils_executed: u64,
    /// Interventions issued since start
    pub interventions_issued: u64,
    /// Samples or chunks rejected by validation since start
    pub validation_rejects: u64,
}

/// Kind of an externally ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestKind {
    /// Free-form user input, stored as a chunk
    UserInput,
    /// Structured external signal (scup / entropy / heat overrides)
    ExternalSignal,
}

/// Externally ingested event, queued and drained at the next tick boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    /// Event kind
    pub kind: IngestKind,
    /// Kind-specific payload
    pub payload: serde_json::Value,
    /// When the event was accepted
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.0, Zone::Calm; "floor is calm")]
    #[test_case(39.999, Zone::Calm; "just below active")]
    #[test_case(40.0, Zone::Active; "active boundary")]
    #[test_case(59.999, Zone::Active; "just below surge")]
    #[test_case(60.0, Zone::Surge; "surge boundary")]
    #[test_case(100.0, Zone::Surge; "ceiling is surge")]
    fn test_zone_boundaries(heat: f64, expected: Zone) {
        assert_eq!(Zone::from_heat(heat), expected);
    }

    #[test]
    fn test_risk_bands() {
        assert_eq!(RiskBand::from_chaos(0.5), RiskBand::Low);
        assert_eq!(RiskBand::from_chaos(0.7), RiskBand::Medium);
        assert_eq!(RiskBand::from_chaos(0.8), RiskBand::High);
        assert_eq!(RiskBand::from_chaos(0.95), RiskBand::Critical);
    }

    #[test]
    fn test_chunk_serialization_roundtrip() {
        let chunk = MemoryChunk {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            speaker: "dawn".to_string(),
            topic: Some("tick".to_string()),
            content: "cycle 1 complete".to_string(),
            pulse_state: PulseState {
                heat: 42.0,
                entropy: 0.3,
                scup: 0.8,
                mood: "focused".to_string(),
                zone: Zone::Active,
                error: None,
            },
            sigils: vec!["ENTROPY_REGULATION".to_string()],
        };

        let json = serde_json::to_string(&chunk).unwrap();
        let back: MemoryChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(chunk, back);
    }
}
