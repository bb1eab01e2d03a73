//! # Tick Scheduler - Cognitive Loop Orchestration
//!
//! Owns every subsystem and drives one cognitive cycle per tick interval:
//!
//! 1. Snapshot pulse and entropy (draining queued ingest events first)
//! 2. Run the meta-reflex and apply its commands in order
//! 3. Decay sigils
//! 4. Execute at most one sigil
//! 5. Emit one memory chunk describing the cycle
//! 6. Recompute the tick interval from the pulse
//!
//! Errors never escape a cycle except `Fatal`. Three consecutive failed
//! cycles force an emergency reset; three consecutive transient errors of
//! the same kind escalate to an invariant violation.

use crate::bloom::BloomManager;
use crate::bus::{DawnEvent, EventBus};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::config::RuntimeConfig;
use crate::entropy::EntropyAnalyzer;
use crate::error::{DawnError, ErrorKind, Result};
use crate::memory::MemoryRouter;
use crate::pulse::PulseController;
use crate::reflex::{MetaReflex, ReflexCommand, Trigger, REBLOOM_SUPPRESSION_TICKS};
use crate::sigil::{House, InterventionSigil, SigilEngine};
use crate::snapshot::{
    build_forecast, SnapshotCounts, SnapshotMetadata, StateSnapshot, SystemState,
    SNAPSHOT_CHUNKS, SNAPSHOT_INTERVENTIONS,
};
use crate::types::{
    FiredSigil, IngestEvent, IngestKind, MemoryChunk, PulseState, SchedulerStatus, TickEntropy,
    TickPulse, TickResult, Zone,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Heat the emergency reset forces.
const EMERGENCY_RESET_HEAT: f64 = 25.0;

/// Failed cycles before the emergency reset fires.
const FAILURE_ESCALATION: u32 = 3;

/// Same-kind transient errors before escalation to invariant.
const TRANSIENT_ESCALATION: u32 = 3;

/// Ticks between diagnostic chunks of the intervention tail.
const DIAGNOSTIC_PERIOD: u64 = 50;

/// Queued ingest events kept before the oldest are dropped.
const INBOX_CAPACITY: usize = 1024;

/// Handle for requesting a stop from another task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request a graceful halt; the in-flight cycle completes first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// The cognitive loop. Single-threaded and cooperative: one cycle runs to
/// completion before the next starts, and every other component only ever
/// sees per-tick snapshots.
pub struct TickScheduler {
    config: RuntimeConfig,
    clock: SharedClock,
    bus: EventBus,
    pulse: PulseController,
    entropy: EntropyAnalyzer,
    sigils: SigilEngine,
    memory: MemoryRouter,
    reflex: MetaReflex,
    blooms: BloomManager,
    running: Arc<AtomicBool>,
    tick_counter: u64,
    interval_secs: f64,
    slow_tick_pending: bool,
    consecutive_failures: u32,
    transient_streak: Option<(&'static str, u32)>,
    inbox: VecDeque<IngestEvent>,
    started_at: DateTime<Utc>,
    last_duration_ms: u64,
    last_result: Option<TickResult>,
    chunks_stored: u64,
    sigils_executed: u64,
    interventions_issued: u64,
}

impl TickScheduler {
    /// Create a scheduler on the system clock.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a scheduler on an explicit clock (tests use a manual one).
    pub fn with_clock(config: RuntimeConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::default();
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| format!("session-{}", Uuid::new_v4()));

        let pulse = PulseController::new(25.0, clock.clone(), bus.clone());
        let entropy = EntropyAnalyzer::new(
            config.entropy_ring_capacity,
            config.volatility_window,
            config.chaos_threshold,
            clock.clone(),
        );
        let sigils = SigilEngine::new(config.sigil_capacity, config.callback_timeout, clock.clone());
        let memory = MemoryRouter::new(
            &config.state_root,
            &session_id,
            config.working_capacity,
            config.recent_capacity,
            config.significant_soft_cap,
            config.checkpoint_interval,
            clock.clone(),
        )?;
        let reflex = MetaReflex::new(
            config.intervention_log_capacity,
            &config.state_root,
            clock.clone(),
        )?;
        let blooms = BloomManager::new(config.bloom_capacity, clock.clone());

        let (min_secs, max_secs) = config.interval_bounds_secs();
        let started_at = clock.now();

        info!(session_id, state_root = %config.state_root.display(), "runtime initialized");

        Ok(Self {
            config,
            clock,
            bus,
            pulse,
            entropy,
            sigils,
            memory,
            reflex,
            blooms,
            running: Arc::new(AtomicBool::new(false)),
            tick_counter: 0,
            interval_secs: max_secs.min(1.0).max(min_secs),
            slow_tick_pending: false,
            consecutive_failures: 0,
            transient_streak: None,
            inbox: VecDeque::new(),
            started_at,
            last_duration_ms: 0,
            last_result: None,
            chunks_stored: 0,
            sigils_executed: 0,
            interventions_issued: 0,
        })
    }

    /// Run the loop until stopped or `max_ticks` cycles complete. Only
    /// `Fatal` errors propagate.
    pub async fn start(
        &mut self,
        max_ticks: Option<u64>,
        interval: Option<Duration>,
    ) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DawnError::Scheduler("loop already running".to_string()));
        }

        if let Some(interval) = interval {
            let (min_secs, max_secs) = self.config.interval_bounds_secs();
            self.interval_secs = interval.as_secs_f64().clamp(min_secs, max_secs);
        }

        let stop_at = max_ticks.map(|n| self.tick_counter + n);
        info!(interval_secs = self.interval_secs, ?max_ticks, "cognitive loop started");

        let outcome = loop {
            if !self.running.load(Ordering::SeqCst) {
                break Ok(());
            }
            if let Some(stop_at) = stop_at {
                if self.tick_counter >= stop_at {
                    break Ok(());
                }
            }

            // Never sleep through a grace deadline: idle it out, then cycle
            // (the cycle itself skips decay and execution while grace holds).
            let grace = self.pulse.apply_grace_period();
            if grace > 0.0 {
                debug!(grace_secs = grace, "idling through grace period");
                self.interruptible_sleep(grace).await;
                if !self.running.load(Ordering::SeqCst) {
                    break Ok(());
                }
            }

            match self.execute_single_tick().await {
                Ok(result) => {
                    debug!(
                        tick = result.tick_number,
                        duration_ms = result.duration_ms,
                        "cycle completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "fatal error, stopping loop");
                    break Err(e);
                }
            }

            self.interruptible_sleep(self.interval_secs).await;
        };

        self.running.store(false, Ordering::SeqCst);
        self.shutdown_flush();
        info!(ticks = self.tick_counter, "cognitive loop stopped");
        outcome
    }

    /// Request a graceful halt; `start` returns after the in-flight cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Cloneable handle for stopping the loop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    /// Queue an external event; it takes effect at the next tick boundary.
    pub fn ingest_event(&mut self, kind: IngestKind, payload: serde_json::Value) {
        if self.inbox.len() >= INBOX_CAPACITY {
            warn!("ingest queue full, dropping oldest event");
            self.inbox.pop_front();
        }
        self.inbox.push_back(IngestEvent {
            kind,
            payload,
            received_at: self.clock.now(),
        });
    }

    /// Subscribe to the runtime event bus.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DawnEvent> {
        self.bus.subscribe()
    }

    /// Run exactly one cognitive cycle. Returns `Err` only for `Fatal`.
    pub async fn execute_single_tick(&mut self) -> Result<TickResult> {
        self.tick_counter += 1;
        let tick = self.tick_counter;
        let timestamp = self.clock.now();
        let wall_start = std::time::Instant::now();

        let mut cycle_error: Option<DawnError> = None;

        self.pulse.begin_tick(tick);
        self.entropy.begin_tick();

        // Stage 1: drain ingest (effects published in tick N-1 become
        // visible here, in tick N).
        let queued: Vec<IngestEvent> = self.inbox.drain(..).collect();
        for event in queued {
            if let Err(e) = self.apply_ingest(event) {
                note_error(&mut cycle_error, e);
            }
        }

        // Ambient sample: the system's own entropy, derived from thermal
        // load and sigil pressure.
        let ambient = (0.6 * self.pulse.heat() / 100.0
            + 0.4 * self.sigils.len() as f64 / self.config.sigil_capacity as f64)
            .clamp(0.0, 1.0);
        if let Err(e) = self.entropy.add_sample("system", ambient, "tick") {
            note_error(&mut cycle_error, e);
        }

        let peak = self
            .entropy
            .tick_peak()
            .map(|(id, e)| (id.to_string(), e));
        let current_entropy = peak.as_ref().map(|(_, e)| *e);
        let snapshot = self.pulse.snapshot(current_entropy.unwrap_or(0.0));

        // Stage 2: meta-reflex.
        let outcome = self.reflex.evaluate(&snapshot, current_entropy);
        let mut registered: Vec<String> = Vec::new();
        let mut interventions: Vec<String> = Vec::new();
        for command in &outcome.commands {
            interventions.push(command.label());
            if let Err(e) = self.apply_command(tick, &outcome.triggers, command, &mut registered)
            {
                note_error(&mut cycle_error, e);
            }
        }

        for alert in self.entropy.recommend_stabilization() {
            self.bus.publish(DawnEvent::ChaosAlert { tick, alert });
        }

        // Stages 3 and 4: decay, then execute at most one sigil. Both are
        // suspended while a grace period holds (including one opened by the
        // reflex just above).
        let mut fired: Vec<FiredSigil> = Vec::new();
        if !self.pulse.in_grace() {
            let expired = self.sigils.decay(self.pulse.heat());
            if !expired.is_empty() {
                debug!(count = expired.len(), "sigils expired");
            }

            match self.sigils.execute_next(false).await {
                Ok(Some(execution)) => {
                    if let Some(cb) = &execution.callback_error {
                        note_error(
                            &mut cycle_error,
                            DawnError::Sigil(format!("routing callback: {cb}")),
                        );
                    }

                    let target = self.pulse.heat() + execution.heat_generated;
                    if let Err(e) = self.pulse.regulate_heat(target, 1.0) {
                        note_error(&mut cycle_error, e);
                    }
                    self.entropy.inject_thermal_awareness(self.pulse.heat());

                    self.bus.publish(DawnEvent::SigilExecuted {
                        tick,
                        sigil_id: execution.sigil_id.clone(),
                        name: execution.name.clone(),
                        house: execution.house.to_string(),
                        routed_to: execution.routed_to.clone(),
                    });

                    fired.push(FiredSigil {
                        id: execution.sigil_id,
                        name: execution.name,
                        house: execution.house.to_string(),
                        routed_to: execution.routed_to,
                    });
                    self.sigils_executed += 1;
                }
                Ok(None) => {}
                Err(e) => note_error(&mut cycle_error, e),
            }
        }

        // Escalation before the cycle chunk, so the chunk reflects it.
        let mut reset_fired = false;
        let error_kind = cycle_error.as_ref().map(|e| e.kind());
        let error_label = cycle_error.as_ref().map(|e| e.label());
        match error_kind {
            Some(ErrorKind::Fatal) => {
                let e = cycle_error.take().expect("fatal error present");
                self.write_crash_artifacts(&e);
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
            Some(ErrorKind::Invariant) => {
                self.invariant_response(&mut cycle_error);
            }
            Some(ErrorKind::Transient) => {
                let label = error_label.expect("transient error present");
                let streak = match self.transient_streak {
                    Some((prev, n)) if prev == label => n + 1,
                    _ => 1,
                };
                self.transient_streak = Some((label, streak));
                if streak >= TRANSIENT_ESCALATION {
                    warn!(label, streak, "transient streak escalated to invariant");
                    self.invariant_response(&mut cycle_error);
                    self.transient_streak = None;
                }
            }
            Some(ErrorKind::Validation) => {}
            None => {
                self.transient_streak = None;
            }
        }

        self.consecutive_failures = if cycle_error.is_some() {
            self.consecutive_failures + 1
        } else {
            0
        };
        if self.consecutive_failures >= FAILURE_ESCALATION {
            self.emergency_reset();
            reset_fired = true;
        }

        // Stage 5: natural decay, then the cycle chunk.
        self.pulse.natural_decay();

        let entropy_value = current_entropy.unwrap_or(0.0);
        let topic = if reset_fired {
            "emergency_reset"
        } else if outcome.triggers.contains(&Trigger::HighEntropy) {
            "entropy_spike"
        } else {
            "tick"
        };

        let mut chunk_sigils = registered;
        for f in &fired {
            if !chunk_sigils.contains(&f.name) {
                chunk_sigils.push(f.name.clone());
            }
        }

        let chunk = MemoryChunk {
            id: Uuid::new_v4(),
            timestamp,
            speaker: "dawn".to_string(),
            topic: Some(topic.to_string()),
            content: format!(
                "tick {tick}: zone {}, heat {:.1}, {} intervention(s), {} sigil(s) fired",
                self.pulse.zone(),
                self.pulse.heat(),
                interventions.len(),
                fired.len()
            ),
            pulse_state: PulseState {
                heat: self.pulse.heat(),
                entropy: entropy_value,
                scup: self.pulse.scup(entropy_value),
                mood: self.pulse.mood().to_string(),
                zone: self.pulse.zone(),
                error: cycle_error.as_ref().map(|e| e.to_string()),
            },
            sigils: chunk_sigils,
        };

        let memory_chunk_id = match self.memory.store(chunk.clone()) {
            Ok(pools) => {
                self.chunks_stored += 1;
                self.bus.publish(DawnEvent::ChunkStored {
                    tick,
                    chunk_id: chunk.id,
                    pools,
                });
                Some(chunk.id)
            }
            Err(e) => {
                note_error(&mut cycle_error, e);
                None
            }
        };

        if tick % DIAGNOSTIC_PERIOD == 0 && !self.reflex.is_empty() {
            self.emit_diagnostic_chunk(tick);
        }

        self.blooms.decay_resonance();

        if let Err(e) = self.memory.checkpoint(false) {
            note_error(&mut cycle_error, e);
        }

        // Stage 6: recompute the interval from the pulse.
        self.recompute_interval();

        let duration_ms = wall_start.elapsed().as_millis() as u64;
        if (duration_ms as f64 / 1000.0) > self.interval_secs {
            warn!(
                duration_ms,
                interval_secs = self.interval_secs,
                "cycle overran the tick interval"
            );
        }

        let result = TickResult {
            tick_number: tick,
            timestamp,
            pulse: TickPulse {
                heat: self.pulse.heat(),
                zone: self.pulse.zone(),
                interval_secs: self.interval_secs,
            },
            entropy_snapshot: TickEntropy {
                current: current_entropy,
                profile: peak
                    .as_ref()
                    .and_then(|(id, _)| self.entropy.profile(id).cloned()),
            },
            sigils_fired: fired,
            interventions_triggered: interventions,
            memory_chunk_id,
            duration_ms,
            error: cycle_error.map(|e| e.to_string()),
        };

        self.last_duration_ms = duration_ms;
        self.last_result = Some(result.clone());
        Ok(result)
    }

    /// Current aggregate state.
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            tick_count: self.tick_counter,
            last_duration_ms: self.last_duration_ms,
            uptime_secs: (self.clock.now() - self.started_at).num_seconds().max(0) as u64,
            current_interval_secs: self.interval_secs,
            consecutive_failures: self.consecutive_failures,
            chunks_stored: self.chunks_stored,
            sigils_executed: self.sigils_executed,
            interventions_issued: self.interventions_issued,
            validation_rejects: self.entropy.validation_rejects()
                + self.memory.validation_rejects(),
        }
    }

    /// Assemble the exportable state bundle.
    pub fn export_state(&self) -> StateSnapshot {
        let current_entropy = self
            .entropy
            .last_sample()
            .map(|s| s.entropy)
            .unwrap_or(0.0);
        let pulse = self.pulse.snapshot(current_entropy);

        let volatility = self
            .entropy
            .last_sample()
            .and_then(|s| self.entropy.profile(&s.bloom_id))
            .map(|p| p.volatility)
            .unwrap_or(0.0);
        let risk_nodes = self.entropy.get_hot_blooms(0.7);

        let memory_chunks = self.memory.recent_chunks(SNAPSHOT_CHUNKS);
        let intervention_log = self.reflex.last_entries(SNAPSHOT_INTERVENTIONS);
        let bloom_snapshot: Vec<_> =
            self.blooms.active_blooms().into_iter().cloned().collect();
        let sigil_table = self.sigils.table();

        let counts = SnapshotCounts {
            chunks: memory_chunks.len(),
            sigils: sigil_table.len(),
            blooms: bloom_snapshot.len(),
            interventions: intervention_log.len(),
        };

        StateSnapshot {
            forecast: build_forecast(&pulse, current_entropy, volatility, risk_nodes),
            system_state: SystemState {
                pulse,
                entropy_profiles: self.entropy.profiles().clone(),
                sigil_table,
                scheduler: self.status(),
            },
            memory_chunks,
            intervention_log,
            bloom_snapshot,
            metadata: SnapshotMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                created_at: self.clock.now(),
                counts,
            },
        }
    }

    /// Export and write the bundle under `<state_root>/snapshots/`.
    pub fn export_snapshot(&self) -> Result<PathBuf> {
        let snapshot = self.export_state();
        snapshot.write_zip(&self.config.state_root.join("snapshots"))
    }

    /// Restore state from a bundle (warm restart).
    pub fn import_state(&mut self, snapshot: StateSnapshot) -> Result<()> {
        let state = snapshot.system_state;

        self.pulse.restore_heat(state.pulse.heat);
        self.pulse.set_scup_override(state.pulse.scup)?;
        self.sigils.restore(state.sigil_table);
        self.entropy.restore_profiles(state.entropy_profiles);
        self.memory.restore(snapshot.memory_chunks)?;
        self.reflex.restore(snapshot.intervention_log);
        self.blooms.restore(snapshot.bloom_snapshot);

        self.tick_counter = state.scheduler.tick_count;
        self.chunks_stored = state.scheduler.chunks_stored;
        self.sigils_executed = state.scheduler.sigils_executed;
        self.interventions_issued = state.scheduler.interventions_issued;
        self.interval_secs = state.scheduler.current_interval_secs;

        info!(tick = self.tick_counter, "state imported");
        Ok(())
    }

    /// Read a bundle from disk and restore it.
    pub fn import_snapshot(&mut self, path: &std::path::Path) -> Result<()> {
        self.import_state(StateSnapshot::read_zip(path)?)
    }

    /// Pulse controller (snapshot injection for hosts and tests).
    pub fn pulse_mut(&mut self) -> &mut PulseController {
        &mut self.pulse
    }

    /// Entropy analyzer.
    pub fn entropy_mut(&mut self) -> &mut EntropyAnalyzer {
        &mut self.entropy
    }

    /// Entropy analyzer, read-only.
    pub fn entropy(&self) -> &EntropyAnalyzer {
        &self.entropy
    }

    /// Sigil engine.
    pub fn sigils_mut(&mut self) -> &mut SigilEngine {
        &mut self.sigils
    }

    /// Sigil engine, read-only.
    pub fn sigils(&self) -> &SigilEngine {
        &self.sigils
    }

    /// Memory router.
    pub fn memory_mut(&mut self) -> &mut MemoryRouter {
        &mut self.memory
    }

    /// Memory router, read-only.
    pub fn memory(&self) -> &MemoryRouter {
        &self.memory
    }

    /// Bloom manager.
    pub fn blooms_mut(&mut self) -> &mut BloomManager {
        &mut self.blooms
    }

    /// Pulse controller, read-only.
    pub fn pulse(&self) -> &PulseController {
        &self.pulse
    }

    fn apply_ingest(&mut self, event: IngestEvent) -> Result<()> {
        match event.kind {
            IngestKind::UserInput => {
                let content = event
                    .payload
                    .get("text")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| event.payload.to_string());

                let entropy_now = self.entropy.last_sample().map(|s| s.entropy).unwrap_or(0.0);
                let chunk = MemoryChunk {
                    id: Uuid::new_v4(),
                    timestamp: event.received_at,
                    speaker: "user".to_string(),
                    topic: event
                        .payload
                        .get("topic")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    content,
                    pulse_state: PulseState {
                        heat: self.pulse.heat(),
                        entropy: entropy_now,
                        scup: self.pulse.scup(entropy_now),
                        mood: self.pulse.mood().to_string(),
                        zone: self.pulse.zone(),
                        error: None,
                    },
                    sigils: Vec::new(),
                };
                self.memory.store(chunk)?;
                self.chunks_stored += 1;
            }
            IngestKind::ExternalSignal => {
                if let Some(scup) = event.payload.get("scup").and_then(|v| v.as_f64()) {
                    self.pulse.set_scup_override(scup)?;
                }
                if let Some(entropy) = event.payload.get("entropy").and_then(|v| v.as_f64()) {
                    let bloom_id = event
                        .payload
                        .get("bloom_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("external");
                    self.entropy.add_sample(bloom_id, entropy, "ingest")?;
                }
                if let Some(heat) = event.payload.get("heat").and_then(|v| v.as_f64()) {
                    self.pulse.update_heat(heat)?;
                    self.entropy.inject_thermal_awareness(self.pulse.heat());
                }
            }
        }
        Ok(())
    }

    fn apply_command(
        &mut self,
        tick: u64,
        triggers: &[Trigger],
        command: &ReflexCommand,
        registered: &mut Vec<String>,
    ) -> Result<()> {
        match command {
            ReflexCommand::SlowTick => {
                self.slow_tick_pending = true;
            }
            ReflexCommand::SuppressRebloom => {
                self.memory
                    .suppress_rebloom_until(tick + REBLOOM_SUPPRESSION_TICKS);
            }
            ReflexCommand::PruneSigils => {
                let pruned = self
                    .sigils
                    .prune_unexecuted_outside(&[House::Meta, House::Monitor]);
                debug!(pruned, "sigils pruned by reflex");
            }
            ReflexCommand::Register(kind) => {
                self.sigils.register_named(*kind)?;
                registered.push(kind.name().to_string());
            }
            ReflexCommand::EmergencyCooldown(target) => {
                self.pulse.emergency_cooldown(*target);
                self.entropy.inject_thermal_awareness(self.pulse.heat());
            }
        }

        self.reflex.record(tick, triggers, command);
        self.interventions_issued += 1;
        self.bus.publish(DawnEvent::InterventionIssued {
            tick,
            command: command.label(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
        });
        Ok(())
    }

    /// Invariant response: emergency cooldown plus an EMERGENCY_RESET sigil.
    fn invariant_response(&mut self, cycle_error: &mut Option<DawnError>) {
        self.pulse.emergency_cooldown(EMERGENCY_RESET_HEAT);
        if let Err(e) = self.sigils.register_named(InterventionSigil::EmergencyReset) {
            note_error(cycle_error, e);
        }
        error!("invariant violation, cooldown applied");
    }

    /// Full reset after repeated cycle failures: heat to 25, sigil table
    /// cleared down to the meta house, a tagged chunk emitted.
    fn emergency_reset(&mut self) {
        error!(
            failures = self.consecutive_failures,
            "consecutive failures, emergency reset"
        );

        self.pulse.emergency_cooldown(EMERGENCY_RESET_HEAT);
        let dropped = self.sigils.clear_except_meta();
        self.consecutive_failures = 0;

        let entropy_now = self.entropy.last_sample().map(|s| s.entropy).unwrap_or(0.0);
        let chunk = MemoryChunk {
            id: Uuid::new_v4(),
            timestamp: self.clock.now(),
            speaker: "system".to_string(),
            topic: Some("emergency_reset".to_string()),
            content: format!(
                "emergency reset at tick {}: heat forced to {EMERGENCY_RESET_HEAT}, {dropped} sigil(s) dropped",
                self.tick_counter
            ),
            pulse_state: PulseState {
                heat: self.pulse.heat(),
                entropy: entropy_now,
                scup: self.pulse.scup(entropy_now),
                mood: self.pulse.mood().to_string(),
                zone: self.pulse.zone(),
                error: None,
            },
            sigils: vec![InterventionSigil::EmergencyReset.name().to_string()],
        };

        if let Ok(pools) = self.memory.store(chunk.clone()) {
            self.chunks_stored += 1;
            self.bus.publish(DawnEvent::ChunkStored {
                tick: self.tick_counter,
                chunk_id: chunk.id,
                pools,
            });
        }
    }

    /// Every 50 ticks, fold the intervention tail into a diagnostic chunk.
    fn emit_diagnostic_chunk(&mut self, tick: u64) {
        let entries = self.reflex.last_entries(5);
        let content = match serde_json::to_string(&entries) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "diagnostic serialization failed");
                return;
            }
        };

        let entropy_now = self.entropy.last_sample().map(|s| s.entropy).unwrap_or(0.0);
        let chunk = MemoryChunk {
            id: Uuid::new_v4(),
            timestamp: self.clock.now(),
            speaker: "system".to_string(),
            topic: Some("diagnostics".to_string()),
            content,
            pulse_state: PulseState {
                heat: self.pulse.heat(),
                entropy: entropy_now,
                scup: self.pulse.scup(entropy_now),
                mood: self.pulse.mood().to_string(),
                zone: self.pulse.zone(),
                error: None,
            },
            sigils: Vec::new(),
        };

        if let Ok(pools) = self.memory.store(chunk.clone()) {
            self.chunks_stored += 1;
            self.bus.publish(DawnEvent::ChunkStored {
                tick,
                chunk_id: chunk.id,
                pools,
            });
        }
    }

    /// `interval = clamp(min, max, max * exp(-4*heat/100) + min)` with a
    /// zone modifier (SURGE x0.8, CALM x1.2) and the one-shot slow-tick
    /// multiplier.
    fn recompute_interval(&mut self) {
        let (min_secs, max_secs) = self.config.interval_bounds_secs();
        let heat = self.pulse.heat();

        let mut interval = max_secs * (-4.0 * heat / 100.0).exp() + min_secs;
        interval *= match self.pulse.zone() {
            Zone::Surge => 0.8,
            Zone::Calm => 1.2,
            Zone::Active => 1.0,
        };

        if self.slow_tick_pending {
            interval = (interval * 1.5).min(max_secs);
            self.slow_tick_pending = false;
        }

        self.interval_secs = interval.clamp(min_secs, max_secs);
    }

    fn write_crash_artifacts(&self, cause: &DawnError) {
        error!(error = %cause, "writing crash artifacts");

        if let Err(e) = self.export_state().write_zip(&self.config.state_root.join("snapshots")) {
            error!(error = %e, "crash snapshot failed");
        }
        if let Some(result) = &self.last_result {
            let path = self.config.state_root.join("crash_tick.json");
            if let Ok(json) = serde_json::to_vec_pretty(result) {
                let _ = std::fs::write(path, json);
            }
        }
    }

    fn shutdown_flush(&mut self) {
        if let Err(e) = self.memory.checkpoint(true) {
            warn!(error = %e, "shutdown checkpoint failed");
        }
        if let Err(e) = self.blooms.persist_all(&self.config.state_root) {
            warn!(error = %e, "bloom persistence failed");
        }
    }

    /// Sleep in short slices so `stop()` stays responsive.
    async fn interruptible_sleep(&self, secs: f64) {
        let mut remaining = secs;
        while remaining > 0.0 && self.running.load(Ordering::SeqCst) {
            let slice = remaining.min(0.1);
            tokio::time::sleep(Duration::from_secs_f64(slice)).await;
            remaining -= slice;
        }
    }
}

fn note_error(slot: &mut Option<DawnError>, e: DawnError) {
    warn!(error = %e, "cycle stage error");
    if slot.is_none() {
        *slot = Some(e);
    }
}
