//! # State Snapshot - Export & Import
//!
//! Assembles the exportable bundle: current system state, a short-horizon
//! forecast, recent memory, the intervention tail, and active blooms,
//! packed into a `DAWN_snapshot_YYYYMMDD-HHMMSS.zip` archive. The import
//! path reads the same bundle back for warm restarts.

pub mod archive;

use crate::bloom::Bloom;
use crate::error::{DawnError, Result};
use crate::reflex::InterventionRecord;
use crate::sigil::{InterventionSigil, Sigil};
use crate::types::{EntropyProfile, MemoryChunk, PulseSnapshot, SchedulerStatus, Zone};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Chunks included in a snapshot.
pub const SNAPSHOT_CHUNKS: usize = 20;

/// Intervention entries included in a snapshot.
pub const SNAPSHOT_INTERVENTIONS: usize = 50;

/// Forecast horizons, shortest first.
pub const FORECAST_WINDOWS: [(&str, f64, f64); 4] = [
    ("next_1h", 0.9, 1.0),
    ("next_24h", 0.7, 1.5),
    ("next_week", 0.5, 2.0),
    ("next_month", 0.3, 2.5),
];

/// `system_state.json`: the live control-loop state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// Current pulse
    pub pulse: PulseSnapshot,
    /// Latest entropy profiles by bloom
    pub entropy_profiles: HashMap<String, EntropyProfile>,
    /// Full sigil table
    pub sigil_table: Vec<Sigil>,
    /// Scheduler status
    pub scheduler: SchedulerStatus,
}

/// Entropy projection inside a forecast window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyProjection {
    /// Entropy now
    pub current: f64,
    /// `[lo, hi]` projected band
    pub projected_range: [f64; 2],
    /// Expected volatility over the window
    pub volatility_forecast: f64,
}

/// One horizon of `forecast.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastWindow {
    /// Window label (`next_1h`, `next_24h`, `next_week`, `next_month`)
    pub window: String,
    /// Confidence in [0.1, 0.95]; shrinks with horizon and entropy
    pub confidence: f64,
    /// Interventions the system is likely to issue
    pub likely_actions: Vec<String>,
    /// Blooms most at risk of destabilizing
    pub risk_nodes: Vec<String>,
    /// Projected entropy band
    pub entropy_projection: EntropyProjection,
}

/// Aggregate counts recorded in `snapshot_metadata.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    /// Chunks bundled
    pub chunks: usize,
    /// Sigils in the table
    pub sigils: usize,
    /// Active blooms bundled
    pub blooms: usize,
    /// Intervention entries bundled
    pub interventions: usize,
}

/// `snapshot_metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Crate version that produced the snapshot
    pub version: String,
    /// Export time
    pub created_at: DateTime<Utc>,
    /// Bundle counts
    pub counts: SnapshotCounts,
}

/// The full exportable bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Live control-loop state
    pub system_state: SystemState,
    /// Short-horizon forecast
    pub forecast: Vec<ForecastWindow>,
    /// Up to the last 20 chunks
    pub memory_chunks: Vec<MemoryChunk>,
    /// Last 50 intervention entries
    pub intervention_log: Vec<InterventionRecord>,
    /// Active blooms
    pub bloom_snapshot: Vec<Bloom>,
    /// Bundle metadata
    pub metadata: SnapshotMetadata,
}

impl StateSnapshot {
    /// Write the bundle as `DAWN_snapshot_YYYYMMDD-HHMMSS.zip` under `dir`.
    pub fn write_zip(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let stamp = self.metadata.created_at;
        let path = dir.join(format!(
            "DAWN_snapshot_{}.zip",
            stamp.format("%Y%m%d-%H%M%S")
        ));

        let entries = vec![
            (
                "system_state.json".to_string(),
                serde_json::to_vec_pretty(&self.system_state)?,
            ),
            (
                "forecast.json".to_string(),
                serde_json::to_vec_pretty(&self.forecast)?,
            ),
            (
                "memory_chunks.json".to_string(),
                serde_json::to_vec_pretty(&self.memory_chunks)?,
            ),
            (
                "intervention_log.json".to_string(),
                serde_json::to_vec_pretty(&self.intervention_log)?,
            ),
            (
                "bloom_snapshot.json".to_string(),
                serde_json::to_vec_pretty(&self.bloom_snapshot)?,
            ),
            (
                "snapshot_metadata.json".to_string(),
                serde_json::to_vec_pretty(&self.metadata)?,
            ),
        ];

        archive::write_archive(&path, &entries, stamp)?;
        Ok(path)
    }

    /// Read a bundle written by [`Self::write_zip`].
    pub fn read_zip(path: &Path) -> Result<Self> {
        let entries: HashMap<String, Vec<u8>> =
            archive::read_archive(path)?.into_iter().collect();

        let get = |name: &str| -> Result<&Vec<u8>> {
            entries
                .get(name)
                .ok_or_else(|| DawnError::Snapshot(format!("snapshot missing entry {name}")))
        };

        Ok(Self {
            system_state: serde_json::from_slice(get("system_state.json")?)?,
            forecast: serde_json::from_slice(get("forecast.json")?)?,
            memory_chunks: serde_json::from_slice(get("memory_chunks.json")?)?,
            intervention_log: serde_json::from_slice(get("intervention_log.json")?)?,
            bloom_snapshot: serde_json::from_slice(get("bloom_snapshot.json")?)?,
            metadata: serde_json::from_slice(get("snapshot_metadata.json")?)?,
        })
    }
}

/// Build the four-horizon forecast from the current state. Confidence is
/// `clamp(0.1, 0.95, base * (1 - 0.5*entropy))`; the projected band and
/// volatility widen with the horizon.
pub fn build_forecast(
    pulse: &PulseSnapshot,
    current_entropy: f64,
    volatility: f64,
    risk_nodes: Vec<String>,
) -> Vec<ForecastWindow> {
    let likely_actions = likely_actions(pulse, current_entropy);

    FORECAST_WINDOWS
        .iter()
        .map(|(window, base, spread)| {
            let confidence = (base * (1.0 - 0.5 * current_entropy)).clamp(0.1, 0.95);
            let widened = (volatility * spread).min(1.0);

            ForecastWindow {
                window: (*window).to_string(),
                confidence,
                likely_actions: likely_actions.clone(),
                risk_nodes: risk_nodes.clone(),
                entropy_projection: EntropyProjection {
                    current: current_entropy,
                    projected_range: [
                        (current_entropy - widened).max(0.0),
                        (current_entropy + widened).min(1.0),
                    ],
                    volatility_forecast: widened,
                },
            }
        })
        .collect()
}

fn likely_actions(pulse: &PulseSnapshot, current_entropy: f64) -> Vec<String> {
    let mut actions = Vec::new();

    if pulse.zone == Zone::Surge {
        actions.push(InterventionSigil::StabilizeProtocol.name().to_string());
        actions.push("slow_tick".to_string());
    }
    if current_entropy > 0.75 {
        actions.push(InterventionSigil::EntropyRegulation.name().to_string());
        actions.push("suppress_rebloom".to_string());
    }
    if pulse.scup < 0.5 && !actions.iter().any(|a| a == "slow_tick") {
        actions.push("slow_tick".to_string());
    }
    if actions.is_empty() {
        // A quiet system consolidates and explores.
        actions.push(InterventionSigil::MemoryConsolidation.name().to_string());
        actions.push(InterventionSigil::ExplorationMode.name().to_string());
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pulse(heat: f64, scup: f64) -> PulseSnapshot {
        PulseSnapshot {
            heat,
            zone: Zone::from_heat(heat),
            scup,
            mood: "calm".to_string(),
            grace_remaining_secs: 0.0,
            surge_active: false,
        }
    }

    fn status() -> SchedulerStatus {
        SchedulerStatus {
            running: false,
            tick_count: 20,
            last_duration_ms: 3,
            uptime_secs: 60,
            current_interval_secs: 1.0,
            consecutive_failures: 0,
            chunks_stored: 20,
            sigils_executed: 5,
            interventions_issued: 2,
            validation_rejects: 0,
        }
    }

    #[test]
    fn test_forecast_confidence_decays_with_window_and_entropy() {
        let calm = build_forecast(&pulse(20.0, 0.8), 0.1, 0.05, vec![]);
        let tense = build_forecast(&pulse(20.0, 0.8), 0.9, 0.05, vec![]);

        assert_eq!(calm.len(), 4);
        for pair in calm.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        for (c, t) in calm.iter().zip(tense.iter()) {
            assert!(c.confidence > t.confidence);
            assert!((0.1..=0.95).contains(&t.confidence));
        }
    }

    #[test]
    fn test_forecast_band_widens_with_horizon() {
        let forecast = build_forecast(&pulse(20.0, 0.8), 0.5, 0.1, vec![]);
        for pair in forecast.windows(2) {
            let near = pair[0].entropy_projection.projected_range;
            let far = pair[1].entropy_projection.projected_range;
            assert!(far[1] - far[0] >= near[1] - near[0]);
        }
    }

    #[test]
    fn test_forecast_actions_reflect_state() {
        let quiet = build_forecast(&pulse(20.0, 0.8), 0.1, 0.05, vec![]);
        assert!(quiet[0]
            .likely_actions
            .contains(&"MEMORY_CONSOLIDATION".to_string()));

        let surging = build_forecast(&pulse(80.0, 0.8), 0.9, 0.3, vec!["b1".to_string()]);
        assert!(surging[0]
            .likely_actions
            .contains(&"STABILIZE_PROTOCOL".to_string()));
        assert!(surging[0]
            .likely_actions
            .contains(&"ENTROPY_REGULATION".to_string()));
        assert_eq!(surging[0].risk_nodes, vec!["b1".to_string()]);
    }

    #[test]
    fn test_zip_roundtrip() {
        let dir = TempDir::new().unwrap();

        let snapshot = StateSnapshot {
            system_state: SystemState {
                pulse: pulse(42.0, 0.7),
                entropy_profiles: HashMap::new(),
                sigil_table: Vec::new(),
                scheduler: status(),
            },
            forecast: build_forecast(&pulse(42.0, 0.7), 0.3, 0.1, vec![]),
            memory_chunks: Vec::new(),
            intervention_log: Vec::new(),
            bloom_snapshot: Vec::new(),
            metadata: SnapshotMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                created_at: Utc::now(),
                counts: SnapshotCounts {
                    chunks: 0,
                    sigils: 0,
                    blooms: 0,
                    interventions: 0,
                },
            },
        };

        let path = snapshot.write_zip(dir.path()).unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("DAWN_snapshot_"));

        let restored = StateSnapshot::read_zip(&path).unwrap();
        assert_eq!(restored.system_state, snapshot.system_state);
        assert_eq!(restored.forecast, snapshot.forecast);
        assert_eq!(restored.metadata.counts, snapshot.metadata.counts);
    }

    #[test]
    fn test_missing_entry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("DAWN_snapshot_bad.zip");

        archive::write_archive(
            &path,
            &[("system_state.json".to_string(), b"{}".to_vec())],
            Utc::now(),
        )
        .unwrap();

        assert!(StateSnapshot::read_zip(&path).is_err());
    }
}
