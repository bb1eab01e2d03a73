//! # Sigil Engine - Symbolic Command Lifecycle
//!
//! Maintains the table of live sigils: registration with house-prefixed ids,
//! a priority queue, time- and heat-driven decay, and at most one execution
//! per tick routed by house.
//!
//! ## Responsibilities
//!
//! - Register sigils and compute their lifespans
//! - Keep the table bounded (overflow drops the lowest priority)
//! - Decay accumulators against current heat; reap dead sigils
//! - Execute the highest-priority sigil and route it by house
//! - Suspend execution during grace periods
//! - Provide the named intervention sigils consumed by the meta-reflex

use crate::clock::SharedClock;
use crate::error::{DawnError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decay added to a sigil's accumulator on execution.
const EXECUTION_DECAY: f64 = 0.1;

/// Base decay rate per decay pass.
const BASE_DECAY_RATE: f64 = 0.05;

/// Routing house of a sigil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum House {
    /// Storage and recall
    Memory,
    /// Pattern and logic work
    Analysis,
    /// Generative combination
    Synthesis,
    /// Focus control
    Attention,
    /// Context weaving
    Integration,
    /// Self-observation
    Meta,
    /// Output and decisions
    Action,
    /// System health
    Monitor,
    /// Divergent ideation
    Creative,
    /// Sequencing and rhythm
    Temporal,
}

impl House {
    /// All houses, in routing-table order.
    pub const ALL: [House; 10] = [
        House::Memory,
        House::Analysis,
        House::Synthesis,
        House::Attention,
        House::Integration,
        House::Meta,
        House::Action,
        House::Monitor,
        House::Creative,
        House::Temporal,
    ];

    /// Id prefix for sigils of this house.
    pub fn prefix(&self) -> &'static str {
        match self {
            House::Memory => "MEM",
            House::Analysis => "ANL",
            House::Synthesis => "SYN",
            House::Attention => "ATT",
            House::Integration => "INT",
            House::Meta => "MET",
            House::Action => "ACT",
            House::Monitor => "MON",
            House::Creative => "CRE",
            House::Temporal => "TMP",
        }
    }

    /// Routing targets as `[standard, priority, specialist]`.
    pub fn routing_targets(&self) -> [&'static str; 3] {
        match self {
            House::Memory => ["memory_banks", "recall_system", "consolidation_unit"],
            House::Analysis => ["deep_processor", "pattern_analyzer", "logic_engine"],
            House::Synthesis => ["creative_engine", "synthesis_chamber", "ideation_core"],
            House::Attention => ["focus_director", "attention_filter", "priority_manager"],
            House::Integration => ["data_weaver", "context_builder", "coherence_engine"],
            House::Meta => ["self_monitor", "cognitive_observer", "awareness_tracker"],
            House::Action => ["execution_unit", "decision_engine", "output_formatter"],
            House::Monitor => ["system_monitor", "performance_tracker", "health_checker"],
            House::Creative => ["inspiration_core", "innovation_lab", "artistic_engine"],
            House::Temporal => ["time_keeper", "sequence_manager", "rhythm_controller"],
        }
    }

    /// Select a routing target for the given convolution and temperature:
    /// specialist at convolution >= 8, priority at temp >= 75, else standard.
    pub fn route(&self, convolution: u8, temp: f64) -> &'static str {
        let [standard, priority, specialist] = self.routing_targets();
        if convolution >= 8 {
            specialist
        } else if temp >= 75.0 {
            priority
        } else {
            standard
        }
    }
}

impl std::fmt::Display for House {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            House::Memory => "memory",
            House::Analysis => "analysis",
            House::Synthesis => "synthesis",
            House::Attention => "attention",
            House::Integration => "integration",
            House::Meta => "meta",
            House::Action => "action",
            House::Monitor => "monitor",
            House::Creative => "creative",
            House::Temporal => "temporal",
        };
        write!(f, "{}", s)
    }
}

/// Named intervention sigils with fixed parameters, so every issuer produces
/// identical routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterventionSigil {
    /// Damp a surge
    StabilizeProtocol,
    /// Counteract rising entropy
    EntropyRegulation,
    /// Last-resort reset
    EmergencyReset,
    /// Introspection after combined triggers
    DeepReflection,
    /// Widen the search when the system stagnates
    ExplorationMode,
    /// Fold recent memory into long-term pools
    MemoryConsolidation,
}

impl InterventionSigil {
    /// Canonical sigil name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StabilizeProtocol => "STABILIZE_PROTOCOL",
            Self::EntropyRegulation => "ENTROPY_REGULATION",
            Self::EmergencyReset => "EMERGENCY_RESET",
            Self::DeepReflection => "DEEP_REFLECTION",
            Self::ExplorationMode => "EXPLORATION_MODE",
            Self::MemoryConsolidation => "MEMORY_CONSOLIDATION",
        }
    }

    /// Fixed `(house, convolution, temp_seed)` for this intervention.
    pub fn parameters(&self) -> (House, u8, f64) {
        match self {
            Self::StabilizeProtocol => (House::Meta, 7, 30.0),
            Self::EntropyRegulation => (House::Monitor, 6, 45.0),
            Self::EmergencyReset => (House::Meta, 9, 80.0),
            Self::DeepReflection => (House::Meta, 8, 25.0),
            Self::ExplorationMode => (House::Creative, 5, 60.0),
            Self::MemoryConsolidation => (House::Memory, 6, 35.0),
        }
    }
}

/// A live symbolic command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sigil {
    /// House-prefixed identifier
    pub id: String,
    /// Command name
    pub name: String,
    /// Temperature in [0, 100]
    pub temp: f64,
    /// Routing house
    pub house: House,
    /// Convolution level in [1, 10]
    pub convolution_level: u8,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Base lifespan in seconds
    pub base_lifespan_secs: f64,
    /// Accumulated decay; dead at 1.0
    pub decay_accumulator: f64,
    /// Times executed
    pub execution_count: u64,
    /// Last execution time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
}

impl Sigil {
    /// `max(5, (10 + 5*convolution) * (1 - temp/200))` seconds.
    pub fn lifespan_secs(temp: f64, convolution: u8) -> f64 {
        ((10.0 + 5.0 * convolution as f64) * (1.0 - temp / 200.0)).max(5.0)
    }

    /// Seconds since creation.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    /// Alive iff the accumulator is below 1.0 and the sigil has not outlived
    /// twice its base lifespan.
    pub fn is_alive(&self, now: DateTime<Utc>) -> bool {
        self.decay_accumulator < 1.0 && self.age_secs(now) < 2.0 * self.base_lifespan_secs
    }

    /// `convolution + temp/100 + meta_bonus - age_penalty`.
    pub fn priority(&self, now: DateTime<Utc>) -> f64 {
        let meta_bonus = if self.house == House::Meta {
            self.execution_count as f64 / 25.0
        } else {
            0.0
        };
        let age_penalty = (self.age_secs(now) / 60.0).min(1.0);
        self.convolution_level as f64 + self.temp / 100.0 + meta_bonus - age_penalty
    }
}

/// Read-only queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigilView {
    /// Sigil id
    pub id: String,
    /// Sigil name
    pub name: String,
    /// Routing house
    pub house: House,
    /// Priority at queue time
    pub priority: f64,
    /// Temperature
    pub temp: f64,
    /// Convolution level
    pub convolution_level: u8,
    /// Times executed
    pub execution_count: u64,
}

/// Outcome of executing one sigil.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Executed sigil id
    pub sigil_id: String,
    /// Executed sigil name
    pub name: String,
    /// Routing house
    pub house: House,
    /// Target tag selected by the routing table
    pub routed_to: String,
    /// Heat the execution feeds back into the pulse (`temp / 10`)
    pub heat_generated: f64,
    /// Routing callback failure, if one was configured and failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_error: Option<String>,
}

/// Arguments handed to a routing callback.
#[derive(Debug, Clone)]
pub struct RoutedSigil {
    /// Executed sigil id
    pub sigil_id: String,
    /// Executed sigil name
    pub name: String,
    /// Routing house
    pub house: House,
    /// Selected target tag
    pub target: &'static str,
}

/// Future returned by a routing callback.
pub type RoutingFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Routing callback. Absent means routing is a no-op that still emits the
/// target tag.
pub type RoutingFn = Arc<dyn Fn(RoutedSigil) -> RoutingFuture + Send + Sync>;

/// Table of live sigils plus execution machinery.
///
/// The ready queue holds this tick's execution candidates: `decay` refills
/// it from the live table, `register` enqueues new arrivals, and
/// `execute_next` pops at most one entry per call. A drained queue stays
/// empty until the next refill.
pub struct SigilEngine {
    sigils: HashMap<String, Sigil>,
    ready: VecDeque<String>,
    counter: u64,
    capacity: usize,
    callback: Option<RoutingFn>,
    callback_timeout: Duration,
    clock: SharedClock,
}

impl SigilEngine {
    /// Create an engine bounded at `capacity` live sigils.
    pub fn new(capacity: usize, callback_timeout: Duration, clock: SharedClock) -> Self {
        Self {
            sigils: HashMap::new(),
            ready: VecDeque::new(),
            counter: 0,
            capacity,
            callback: None,
            callback_timeout,
            clock,
        }
    }

    /// Install a routing callback.
    pub fn set_routing_callback(&mut self, callback: RoutingFn) {
        self.callback = Some(callback);
    }

    /// Register a sigil. Overflow beyond the table capacity drops the
    /// current lowest-priority sigil.
    pub fn register(
        &mut self,
        name: &str,
        temp: f64,
        house: House,
        convolution: u8,
    ) -> Result<String> {
        if !(0.0..=100.0).contains(&temp) || !temp.is_finite() {
            return Err(DawnError::Validation(format!(
                "sigil temp must be in [0, 100], got {temp}"
            )));
        }
        if !(1..=10).contains(&convolution) {
            return Err(DawnError::Validation(format!(
                "convolution must be in [1, 10], got {convolution}"
            )));
        }

        while self.sigils.len() >= self.capacity {
            self.drop_lowest_priority();
        }

        self.counter += 1;
        let id = format!("{}{:04}", house.prefix(), self.counter % 10_000);
        let now = self.clock.now();

        let sigil = Sigil {
            id: id.clone(),
            name: name.to_string(),
            temp,
            house,
            convolution_level: convolution,
            created_at: now,
            base_lifespan_secs: Sigil::lifespan_secs(temp, convolution),
            decay_accumulator: 0.0,
            execution_count: 0,
            last_executed: None,
        };

        debug!(id = %sigil.id, name, %house, convolution, "sigil registered");
        self.sigils.insert(id.clone(), sigil);
        self.ready.push_back(id.clone());
        self.sort_ready();
        Ok(id)
    }

    /// Register a named intervention. A live sigil with the same name is
    /// reused rather than duplicated, so repeated triggers do not flood the
    /// table.
    pub fn register_named(&mut self, kind: InterventionSigil) -> Result<String> {
        let now = self.clock.now();
        if let Some(existing) = self
            .sigils
            .values()
            .find(|s| s.name == kind.name() && s.is_alive(now))
        {
            return Ok(existing.id.clone());
        }

        let (house, convolution, temp) = kind.parameters();
        self.register(kind.name(), temp, house, convolution)
    }

    /// Live sigils sorted by non-increasing priority.
    pub fn priority_queue(&self) -> Vec<SigilView> {
        let now = self.clock.now();
        let mut views: Vec<SigilView> = self
            .sigils
            .values()
            .filter(|s| s.is_alive(now))
            .map(|s| SigilView {
                id: s.id.clone(),
                name: s.name.clone(),
                house: s.house,
                priority: s.priority(now),
                temp: s.temp,
                convolution_level: s.convolution_level,
                execution_count: s.execution_count,
            })
            .collect();
        views.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        views
    }

    /// Pop and execute the highest-priority entry of the ready queue. A
    /// no-op during grace; the queue is left unchanged. A drained queue
    /// returns `None` until `decay` (or a registration) refills it.
    pub async fn execute_next(&mut self, in_grace: bool) -> Result<Option<ExecutionResult>> {
        if in_grace {
            debug!("grace period open, sigil execution suspended");
            return Ok(None);
        }

        let now = self.clock.now();
        let id = loop {
            match self.ready.pop_front() {
                Some(id) => {
                    if self.sigils.get(&id).map(|s| s.is_alive(now)).unwrap_or(false) {
                        break id;
                    }
                    // Stale entry for a reaped or expired sigil.
                }
                None => return Ok(None),
            }
        };

        let (name, house, target, heat_generated) = {
            let sigil = self
                .sigils
                .get_mut(&id)
                .ok_or_else(|| DawnError::Fatal("sigil table lost a live entry".to_string()))?;

            let target = sigil.house.route(sigil.convolution_level, sigil.temp);
            sigil.execution_count += 1;
            sigil.last_executed = Some(now);
            sigil.decay_accumulator += EXECUTION_DECAY;

            (sigil.name.clone(), sigil.house, target, sigil.temp / 10.0)
        };

        let callback_error = match &self.callback {
            Some(callback) => {
                let routed = RoutedSigil {
                    sigil_id: id.clone(),
                    name: name.clone(),
                    house,
                    target,
                };
                match tokio::time::timeout(self.callback_timeout, callback(routed)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => {
                        warn!(sigil = %id, error = %e, "routing callback failed");
                        Some(e.to_string())
                    }
                    Err(_) => {
                        warn!(sigil = %id, "routing callback timed out");
                        Some(
                            DawnError::CallbackTimeout {
                                stage: "routing".to_string(),
                                timeout_ms: self.callback_timeout.as_millis() as u64,
                            }
                            .to_string(),
                        )
                    }
                }
            }
            None => None,
        };

        debug!(sigil = %id, %name, target, "sigil executed");

        Ok(Some(ExecutionResult {
            sigil_id: id,
            name,
            house,
            routed_to: target.to_string(),
            heat_generated,
            callback_error,
        }))
    }

    /// Decay every sigil against the current heat, reap the dead, and
    /// refill the ready queue from the survivors.
    /// `delta = 0.05 * (1 + heat/100) / (1 + convolution/20)`.
    pub fn decay(&mut self, current_heat: f64) -> Vec<Sigil> {
        let now = self.clock.now();

        for sigil in self.sigils.values_mut() {
            let delta = BASE_DECAY_RATE * (1.0 + current_heat / 100.0)
                / (1.0 + sigil.convolution_level as f64 / 20.0);
            sigil.decay_accumulator += delta;
        }

        let dead: Vec<String> = self
            .sigils
            .values()
            .filter(|s| !s.is_alive(now))
            .map(|s| s.id.clone())
            .collect();

        let mut removed = Vec::with_capacity(dead.len());
        for id in dead {
            if let Some(sigil) = self.sigils.remove(&id) {
                debug!(sigil = %sigil.id, name = %sigil.name, "sigil expired");
                removed.push(sigil);
            }
        }

        self.ready = self
            .sigils
            .values()
            .filter(|s| s.is_alive(now))
            .map(|s| s.id.clone())
            .collect();
        self.sort_ready();

        removed
    }

    /// Remove never-executed sigils outside the given houses. Returns how
    /// many were pruned.
    pub fn prune_unexecuted_outside(&mut self, keep: &[House]) -> usize {
        let before = self.sigils.len();
        self.sigils
            .retain(|_, s| s.execution_count > 0 || keep.contains(&s.house));
        before - self.sigils.len()
    }

    /// Drop everything except `house = meta` (emergency reset path).
    pub fn clear_except_meta(&mut self) -> usize {
        let before = self.sigils.len();
        self.sigils.retain(|_, s| s.house == House::Meta);
        before - self.sigils.len()
    }

    /// Number of sigils in the table.
    pub fn len(&self) -> usize {
        self.sigils.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sigils.is_empty()
    }

    /// Sigil by id.
    pub fn get(&self, id: &str) -> Option<&Sigil> {
        self.sigils.get(id)
    }

    /// Live sigil by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Sigil> {
        let now = self.clock.now();
        self.sigils
            .values()
            .find(|s| s.name == name && s.is_alive(now))
    }

    /// Full table, sorted by id (snapshot export).
    pub fn table(&self) -> Vec<Sigil> {
        let mut table: Vec<Sigil> = self.sigils.values().cloned().collect();
        table.sort_by(|a, b| a.id.cmp(&b.id));
        table
    }

    /// Replace the table from an imported snapshot.
    pub fn restore(&mut self, table: Vec<Sigil>) {
        let now = self.clock.now();
        self.counter = table.len() as u64;
        self.sigils = table.into_iter().map(|s| (s.id.clone(), s)).collect();
        self.ready = self
            .sigils
            .values()
            .filter(|s| s.is_alive(now))
            .map(|s| s.id.clone())
            .collect();
        self.sort_ready();
    }

    /// Keep the ready queue ordered by non-increasing priority.
    fn sort_ready(&mut self) {
        let now = self.clock.now();
        let mut ids: Vec<String> = self.ready.drain(..).collect();
        ids.sort_by(|a, b| {
            let pa = self.sigils.get(a).map(|s| s.priority(now)).unwrap_or(f64::MIN);
            let pb = self.sigils.get(b).map(|s| s.priority(now)).unwrap_or(f64::MIN);
            pb.total_cmp(&pa)
        });
        self.ready = ids.into();
    }

    fn drop_lowest_priority(&mut self) {
        let now = self.clock.now();
        if let Some(id) = self
            .sigils
            .values()
            .min_by(|a, b| a.priority(now).total_cmp(&b.priority(now)))
            .map(|s| s.id.clone())
        {
            warn!(sigil = %id, "sigil table full, dropping lowest priority");
            self.sigils.remove(&id);
        }
    }
}
