//! # Meta-Reflex - Threshold Supervision
//!
//! Watches each tick's pulse and entropy snapshot and, when thresholds are
//! crossed, issues ordered intervention commands back into the scheduler and
//! the sigil engine. Every intervention lands in a bounded append-only log
//! mirrored to `intervention.log`.

use crate::clock::SharedClock;
use crate::error::Result;
use crate::sigil::InterventionSigil;
use crate::types::{PulseSnapshot, Zone};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Scup below which `LOW_SCUP` fires.
pub const SCUP_THRESHOLD: f64 = 0.5;

/// Sampled entropy above which `HIGH_ENTROPY` fires.
pub const ENTROPY_THRESHOLD: f64 = 0.75;

/// Ticks the memory router ignores rebloom lookups after `suppress_rebloom`.
pub const REBLOOM_SUPPRESSION_TICKS: u64 = 10;

/// Heat target of the combined-trigger emergency cooldown.
pub const COOLDOWN_TARGET: f64 = 25.0;

/// A crossed threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// scup < 0.5
    LowScup,
    /// Sampled entropy > 0.75
    HighEntropy,
    /// Zone is SURGE
    ZoneSurge,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LowScup => "LOW_SCUP",
            Self::HighEntropy => "HIGH_ENTROPY",
            Self::ZoneSurge => "ZONE_SURGE",
        };
        write!(f, "{}", s)
    }
}

/// An intervention command, applied by the scheduler in issue order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReflexCommand {
    /// Multiply the next tick interval by 1.5 (bounded at 5 s)
    SlowTick,
    /// Ignore rebloom lookups for the next 10 ticks
    SuppressRebloom,
    /// Drop never-executed sigils outside `{meta, monitor}`
    PruneSigils,
    /// Register a named intervention sigil
    Register(InterventionSigil),
    /// Force heat to the target and open a cooldown grace
    EmergencyCooldown(f64),
}

impl ReflexCommand {
    /// Stable label used in logs, events, and tick results.
    pub fn label(&self) -> String {
        match self {
            Self::SlowTick => "slow_tick".to_string(),
            Self::SuppressRebloom => "suppress_rebloom".to_string(),
            Self::PruneSigils => "prune_sigils".to_string(),
            Self::Register(kind) => format!("register({})", kind.name()),
            Self::EmergencyCooldown(target) => format!("emergency_cooldown({target})"),
        }
    }
}

/// Outcome of evaluating one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflexOutcome {
    /// Triggers that fired, in evaluation order
    pub triggers: Vec<Trigger>,
    /// Commands to apply, in issue order
    pub commands: Vec<ReflexCommand>,
}

/// One entry in the intervention log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionRecord {
    /// Unique identifier
    pub id: Uuid,
    /// Tick the intervention was issued in
    pub tick: u64,
    /// Triggers that produced it
    pub triggers: Vec<String>,
    /// Command label
    pub command: String,
    /// When it was issued
    pub timestamp: DateTime<Utc>,
}

/// Threshold watcher and intervention generator.
pub struct MetaReflex {
    log: VecDeque<InterventionRecord>,
    log_capacity: usize,
    log_path: PathBuf,
    clock: SharedClock,
}

impl MetaReflex {
    /// Create a reflex logging to `<state_root>/intervention.log`.
    pub fn new(log_capacity: usize, state_root: &Path, clock: SharedClock) -> Result<Self> {
        fs::create_dir_all(state_root)?;
        Ok(Self {
            log: VecDeque::new(),
            log_capacity,
            log_path: state_root.join("intervention.log"),
            clock,
        })
    }

    /// Evaluate a tick. Commands come out ordered: scheduler and table
    /// effects first, then registrations, then the combined-trigger
    /// cooldown.
    pub fn evaluate(
        &self,
        snapshot: &PulseSnapshot,
        current_entropy: Option<f64>,
    ) -> ReflexOutcome {
        let mut triggers = Vec::new();

        if snapshot.scup < SCUP_THRESHOLD {
            triggers.push(Trigger::LowScup);
        }
        if current_entropy.map(|e| e > ENTROPY_THRESHOLD).unwrap_or(false) {
            triggers.push(Trigger::HighEntropy);
        }
        if snapshot.zone == Zone::Surge {
            triggers.push(Trigger::ZoneSurge);
        }

        if triggers.is_empty() {
            return ReflexOutcome {
                triggers,
                commands: Vec::new(),
            };
        }

        let low_scup = triggers.contains(&Trigger::LowScup);
        let high_entropy = triggers.contains(&Trigger::HighEntropy);
        let zone_surge = triggers.contains(&Trigger::ZoneSurge);

        let mut commands = Vec::new();

        if low_scup || zone_surge {
            commands.push(ReflexCommand::SlowTick);
        }
        if high_entropy {
            commands.push(ReflexCommand::SuppressRebloom);
        }
        if zone_surge {
            commands.push(ReflexCommand::PruneSigils);
        }

        if zone_surge {
            commands.push(ReflexCommand::Register(InterventionSigil::StabilizeProtocol));
        }
        if high_entropy {
            commands.push(ReflexCommand::Register(InterventionSigil::EntropyRegulation));
        }
        if triggers.len() >= 2 {
            commands.push(ReflexCommand::Register(InterventionSigil::DeepReflection));
        }
        if triggers.len() == 3 {
            commands.push(ReflexCommand::EmergencyCooldown(COOLDOWN_TARGET));
        }

        debug!(?triggers, count = commands.len(), "reflex evaluation");
        ReflexOutcome { triggers, commands }
    }

    /// Record an issued intervention. The log is bounded; the file mirror is
    /// best-effort.
    pub fn record(&mut self, tick: u64, triggers: &[Trigger], command: &ReflexCommand) {
        let record = InterventionRecord {
            id: Uuid::new_v4(),
            tick,
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            command: command.label(),
            timestamp: self.clock.now(),
        };

        if let Err(e) = self.append_to_file(&record) {
            warn!(error = %e, "intervention log append failed");
        }

        self.log.push_back(record);
        while self.log.len() > self.log_capacity {
            self.log.pop_front();
        }
    }

    /// Last `n` log entries, oldest first.
    pub fn last_entries(&self, n: usize) -> Vec<InterventionRecord> {
        let skip = self.log.len().saturating_sub(n);
        self.log.iter().skip(skip).cloned().collect()
    }

    /// Entries recorded so far (bounded by capacity).
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Restore log entries from an imported snapshot.
    pub fn restore(&mut self, entries: Vec<InterventionRecord>) {
        for entry in entries {
            self.log.push_back(entry);
        }
        while self.log.len() > self.log_capacity {
            self.log.pop_front();
        }
    }

    fn append_to_file(&self, record: &InterventionRecord) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn reflex() -> (MetaReflex, TempDir) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let reflex = MetaReflex::new(10_000, dir.path(), clock).unwrap();
        (reflex, dir)
    }

    fn snapshot(heat: f64, scup: f64) -> PulseSnapshot {
        PulseSnapshot {
            heat,
            zone: Zone::from_heat(heat),
            scup,
            mood: "focused".to_string(),
            grace_remaining_secs: 0.0,
            surge_active: false,
        }
    }

    #[test]
    fn test_quiet_tick_issues_nothing() {
        let (reflex, _dir) = reflex();
        let outcome = reflex.evaluate(&snapshot(30.0, 0.8), Some(0.3));
        assert!(outcome.triggers.is_empty());
        assert!(outcome.commands.is_empty());
    }

    #[test]
    fn test_low_scup_slows_tick() {
        let (reflex, _dir) = reflex();
        let outcome = reflex.evaluate(&snapshot(30.0, 0.3), Some(0.3));
        assert_eq!(outcome.triggers, vec![Trigger::LowScup]);
        assert_eq!(outcome.commands, vec![ReflexCommand::SlowTick]);
    }

    #[test]
    fn test_high_entropy_mapping() {
        let (reflex, _dir) = reflex();
        let outcome = reflex.evaluate(&snapshot(30.0, 0.8), Some(0.8));
        assert_eq!(outcome.triggers, vec![Trigger::HighEntropy]);
        assert_eq!(
            outcome.commands,
            vec![
                ReflexCommand::SuppressRebloom,
                ReflexCommand::Register(InterventionSigil::EntropyRegulation),
            ]
        );
    }

    #[test]
    fn test_zone_surge_mapping() {
        let (reflex, _dir) = reflex();
        let outcome = reflex.evaluate(&snapshot(70.0, 0.8), Some(0.3));
        assert_eq!(outcome.triggers, vec![Trigger::ZoneSurge]);
        assert_eq!(
            outcome.commands,
            vec![
                ReflexCommand::SlowTick,
                ReflexCommand::PruneSigils,
                ReflexCommand::Register(InterventionSigil::StabilizeProtocol),
            ]
        );
    }

    #[test]
    fn test_two_triggers_add_deep_reflection() {
        let (reflex, _dir) = reflex();
        let outcome = reflex.evaluate(&snapshot(30.0, 0.3), Some(0.9));
        assert_eq!(outcome.triggers.len(), 2);
        assert_eq!(
            outcome.commands.last(),
            Some(&ReflexCommand::Register(InterventionSigil::DeepReflection))
        );
        assert!(!outcome
            .commands
            .iter()
            .any(|c| matches!(c, ReflexCommand::EmergencyCooldown(_))));
    }

    #[test]
    fn test_triple_trigger_command_order() {
        let (reflex, _dir) = reflex();
        // scup 0.3, entropy 0.85, SURGE
        let outcome = reflex.evaluate(&snapshot(70.0, 0.3), Some(0.85));

        assert_eq!(outcome.triggers.len(), 3);
        let labels: Vec<String> = outcome.commands.iter().map(|c| c.label()).collect();
        assert_eq!(
            labels,
            vec![
                "slow_tick",
                "suppress_rebloom",
                "prune_sigils",
                "register(STABILIZE_PROTOCOL)",
                "register(ENTROPY_REGULATION)",
                "register(DEEP_REFLECTION)",
                "emergency_cooldown(25)",
            ]
        );
    }

    #[test]
    fn test_no_sample_means_no_entropy_trigger() {
        let (reflex, _dir) = reflex();
        let outcome = reflex.evaluate(&snapshot(30.0, 0.8), None);
        assert!(outcome.triggers.is_empty());
    }

    #[test]
    fn test_log_is_bounded_and_mirrored() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let mut reflex = MetaReflex::new(5, dir.path(), clock).unwrap();

        for tick in 0..8 {
            reflex.record(tick, &[Trigger::LowScup], &ReflexCommand::SlowTick);
        }

        assert_eq!(reflex.len(), 5);
        let entries = reflex.last_entries(3);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].tick, 7);

        let raw = fs::read_to_string(dir.path().join("intervention.log")).unwrap();
        assert_eq!(raw.lines().count(), 8);
    }
}
