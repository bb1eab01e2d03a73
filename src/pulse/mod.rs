//! # Pulse Controller - Thermal Regulation
//!
//! Owns the `heat` scalar, the derived zone, and surge bookkeeping. All heat
//! mutation funnels through this component; everything else reads per-tick
//! snapshots.
//!
//! ## Responsibilities
//!
//! - Smooth and rate-limit heat updates (+/-15 per update)
//! - Derive the zone (CALM < 40, ACTIVE [40, 60), SURGE >= 60)
//! - Track surge open/close and compute post-surge grace periods
//! - Apply emergency cooldown and targeted regulation
//! - Decay heat naturally on idle ticks
//! - Own the scup coherence scalar and the mood label

use crate::bus::{DawnEvent, EventBus};
use crate::clock::SharedClock;
use crate::error::{DawnError, Result};
use crate::types::{PulseDelta, PulseSnapshot, Zone};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Per-update heat delta bound.
pub const MAX_HEAT_DELTA: f64 = 15.0;

/// Smoothing factor applied to incoming heat targets.
const SMOOTHING: f64 = 0.2;

/// Multiplier applied on idle ticks.
const NATURAL_DECAY_FACTOR: f64 = 0.85;

/// Base grace period after a surge closes, seconds.
const GRACE_BASE_SECS: f64 = 30.0;

/// Upper bound on any grace period, seconds.
const GRACE_MAX_SECS: f64 = 300.0;

/// Window over which repeat surges compound the grace period, seconds.
const SURGE_WINDOW_SECS: i64 = 600;

/// Grace opened by an emergency cooldown, seconds.
const COOLDOWN_GRACE_SECS: i64 = 60;

/// A surge that is currently open.
#[derive(Debug, Clone, Copy)]
struct OpenSurge {
    started_at: DateTime<Utc>,
}

/// A surge that has closed, kept for the repeat-surge window.
#[derive(Debug, Clone, Copy)]
struct ClosedSurge {
    ended_at: DateTime<Utc>,
}

/// Thermal regulator owning heat, zone, scup, and grace state.
pub struct PulseController {
    heat: f64,
    zone: Zone,
    scup_override: Option<f64>,
    current_surge: Option<OpenSurge>,
    closed_surges: VecDeque<ClosedSurge>,
    grace_until: Option<DateTime<Utc>>,
    heat_updated_this_tick: bool,
    current_tick: u64,
    clock: SharedClock,
    bus: EventBus,
}

impl PulseController {
    /// Create a controller at the given initial heat.
    pub fn new(initial_heat: f64, clock: SharedClock, bus: EventBus) -> Self {
        let heat = initial_heat.clamp(0.0, 100.0);
        Self {
            heat,
            zone: Zone::from_heat(heat),
            scup_override: None,
            current_surge: None,
            closed_surges: VecDeque::new(),
            grace_until: None,
            heat_updated_this_tick: false,
            current_tick: 0,
            clock,
            bus,
        }
    }

    /// Mark the start of a tick. Resets the per-tick update flag used by
    /// [`Self::natural_decay`].
    pub fn begin_tick(&mut self, tick: u64) {
        self.current_tick = tick;
        self.heat_updated_this_tick = false;
    }

    /// Current heat.
    pub fn heat(&self) -> f64 {
        self.heat
    }

    /// Current zone.
    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// Smooth a requested heat value toward the current one, bound the delta
    /// to +/-15, and apply it.
    pub fn update_heat(&mut self, new: f64) -> Result<PulseDelta> {
        if !new.is_finite() {
            return Err(DawnError::Validation(format!(
                "heat update is not finite: {new}"
            )));
        }

        let previous = self.heat;
        let smoothed = SMOOTHING * new.clamp(0.0, 100.0) + (1.0 - SMOOTHING) * previous;
        let delta = (smoothed - previous).clamp(-MAX_HEAT_DELTA, MAX_HEAT_DELTA);

        let zone_changed = self.apply_heat(previous + delta);
        self.heat_updated_this_tick = true;

        let result = PulseDelta {
            previous,
            current: self.heat,
            delta: self.heat - previous,
            zone: self.zone,
            zone_changed,
        };

        self.bus.publish(DawnEvent::PulseDelta {
            tick: self.current_tick,
            delta: result,
        });

        Ok(result)
    }

    /// Remaining grace seconds; 0.0 when no grace is open.
    pub fn apply_grace_period(&self) -> f64 {
        match self.grace_until {
            Some(until) => {
                let remaining = (until - self.clock.now()).num_milliseconds() as f64 / 1000.0;
                remaining.max(0.0)
            }
            None => 0.0,
        }
    }

    /// Whether a grace period is currently open.
    pub fn in_grace(&self) -> bool {
        self.apply_grace_period() > 0.0
    }

    /// Force heat to `target`, bypassing smoothing and the per-update rate
    /// limit, and open a 60 s grace regardless of zone. An existing longer
    /// grace is never shortened.
    pub fn emergency_cooldown(&mut self, target: f64) -> PulseDelta {
        let previous = self.heat;
        let zone_changed = self.apply_heat(target);
        self.heat_updated_this_tick = true;

        let until = self.clock.now() + ChronoDuration::seconds(COOLDOWN_GRACE_SECS);
        self.extend_grace(until);

        info!(
            previous,
            target,
            grace_secs = COOLDOWN_GRACE_SECS,
            "emergency cooldown applied"
        );

        let result = PulseDelta {
            previous,
            current: self.heat,
            delta: self.heat - previous,
            zone: self.zone,
            zone_changed,
        };

        self.bus.publish(DawnEvent::PulseDelta {
            tick: self.current_tick,
            delta: result,
        });

        result
    }

    /// One regulation step toward `target`, skipping smoothing but honoring
    /// the +/-15 per-update bound.
    pub fn regulate_heat(&mut self, target: f64, speed: f64) -> Result<PulseDelta> {
        if !(0.0..=1.0).contains(&speed) || speed == 0.0 {
            return Err(DawnError::Pulse(format!(
                "regulation speed must be in (0, 1], got {speed}"
            )));
        }
        if !target.is_finite() {
            return Err(DawnError::Validation(format!(
                "regulation target is not finite: {target}"
            )));
        }

        let previous = self.heat;
        let step = ((target.clamp(0.0, 100.0) - previous) * speed)
            .clamp(-MAX_HEAT_DELTA, MAX_HEAT_DELTA);
        let zone_changed = self.apply_heat(previous + step);
        self.heat_updated_this_tick = true;

        Ok(PulseDelta {
            previous,
            current: self.heat,
            delta: self.heat - previous,
            zone: self.zone,
            zone_changed,
        })
    }

    /// Decay heat on an idle tick. A tick that saw any heat update keeps its
    /// value; the scheduler calls this at most once per tick.
    pub fn natural_decay(&mut self) {
        if self.heat_updated_this_tick {
            return;
        }

        let decayed = self.heat * NATURAL_DECAY_FACTOR;
        if (decayed - self.heat).abs() > f64::EPSILON {
            debug!(from = self.heat, to = decayed, "natural decay");
            self.apply_heat(decayed);
        }
    }

    /// Override the derived scup value until cleared.
    pub fn set_scup_override(&mut self, scup: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&scup) {
            return Err(DawnError::Validation(format!(
                "scup must be in [0, 1], got {scup}"
            )));
        }
        self.scup_override = Some(scup);
        Ok(())
    }

    /// Drop any scup override; subsequent snapshots derive it again.
    pub fn clear_scup_override(&mut self) {
        self.scup_override = None;
    }

    /// Scup for the current state, given the tick's sampled entropy.
    pub fn scup(&self, current_entropy: f64) -> f64 {
        match self.scup_override {
            Some(v) => v,
            None => ((1.0 - 0.5 * current_entropy) * (1.0 - self.heat / 200.0)).clamp(0.0, 1.0),
        }
    }

    /// Immutable snapshot handed to subsystems for this tick.
    pub fn snapshot(&self, current_entropy: f64) -> PulseSnapshot {
        PulseSnapshot {
            heat: self.heat,
            zone: self.zone,
            scup: self.scup(current_entropy),
            mood: self.mood().to_string(),
            grace_remaining_secs: self.apply_grace_period(),
            surge_active: self.current_surge.is_some(),
        }
    }

    /// Qualitative mood label derived from heat.
    pub fn mood(&self) -> &'static str {
        match self.zone {
            Zone::Calm => "calm",
            Zone::Active => "focused",
            Zone::Surge => {
                if self.heat < 80.0 {
                    "agitated"
                } else {
                    "frenetic"
                }
            }
        }
    }

    /// Restore heat directly (snapshot import). No events, no grace changes.
    pub fn restore_heat(&mut self, heat: f64) {
        self.heat = heat.clamp(0.0, 100.0);
        self.zone = Zone::from_heat(self.heat);
    }

    /// Apply a new heat value, recompute the zone, and run surge
    /// bookkeeping. Returns whether a zone boundary was crossed.
    fn apply_heat(&mut self, new_heat: f64) -> bool {
        let clamped = if new_heat.is_finite() {
            new_heat.clamp(0.0, 100.0)
        } else {
            warn!("non-finite heat value rejected, holding current heat");
            self.heat
        };

        let old_zone = self.zone;
        self.heat = clamped;
        self.zone = Zone::from_heat(self.heat);

        if self.zone == old_zone {
            return false;
        }

        debug!(from = %old_zone, to = %self.zone, heat = self.heat, "zone transition");

        if self.zone == Zone::Surge {
            self.open_surge();
        } else if old_zone == Zone::Surge {
            self.close_surge();
        }

        self.bus.publish(DawnEvent::ZoneTransition {
            tick: self.current_tick,
            from: old_zone,
            to: self.zone,
            heat: self.heat,
        });

        true
    }

    fn open_surge(&mut self) {
        let now = self.clock.now();
        self.current_surge = Some(OpenSurge { started_at: now });
        info!(heat = self.heat, "surge opened");
    }

    /// Close the open surge and compute the grace period:
    /// `clamp(30, 300, 30 * 1.5^(n-1) * (1 + duration/60))` where `n` counts
    /// surges within the last 10 minutes.
    fn close_surge(&mut self) {
        let Some(open) = self.current_surge.take() else {
            return;
        };

        let now = self.clock.now();
        let duration_secs = (now - open.started_at).num_milliseconds() as f64 / 1000.0;

        self.closed_surges.push_back(ClosedSurge { ended_at: now });
        let window_start = now - ChronoDuration::seconds(SURGE_WINDOW_SECS);
        while let Some(front) = self.closed_surges.front() {
            if front.ended_at < window_start {
                self.closed_surges.pop_front();
            } else {
                break;
            }
        }

        let surge_count = self.closed_surges.len().max(1) as i32;
        let grace_secs = (GRACE_BASE_SECS
            * 1.5_f64.powi(surge_count - 1)
            * (1.0 + duration_secs / 60.0))
            .clamp(GRACE_BASE_SECS, GRACE_MAX_SECS);

        let until = now + ChronoDuration::milliseconds((grace_secs * 1000.0) as i64);
        self.extend_grace(until);

        info!(
            duration_secs,
            surge_count, grace_secs, "surge closed, grace opened"
        );
    }

    /// Extend-to-max: never shorten an already open grace.
    fn extend_grace(&mut self, until: DateTime<Utc>) {
        self.grace_until = Some(match self.grace_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }
}
