//! Typed event bus
//!
//! Every subsystem publishes typed events through a bounded broadcast
//! channel. Publishing is best-effort: events are ordered within a tick,
//! carry the originating tick number, and a subscriber that falls behind
//! loses old events rather than blocking the loop.

use crate::types::{ChaosAlert, PoolSet, PulseDelta, Zone};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default per-subscriber queue depth.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Events emitted by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DawnEvent {
    /// Heat changed
    PulseDelta {
        /// Originating tick
        tick: u64,
        /// The applied delta
        delta: PulseDelta,
    },
    /// The heat crossed a zone boundary
    ZoneTransition {
        /// Originating tick
        tick: u64,
        /// Zone before the transition
        from: Zone,
        /// Zone after the transition
        to: Zone,
        /// Heat after the transition
        heat: f64,
    },
    /// A bloom was nominated for stabilization
    ChaosAlert {
        /// Originating tick
        tick: u64,
        /// The alert
        alert: ChaosAlert,
    },
    /// A sigil executed
    SigilExecuted {
        /// Originating tick
        tick: u64,
        /// Sigil id
        sigil_id: String,
        /// Sigil name
        name: String,
        /// Routing house
        house: String,
        /// Target tag
        routed_to: String,
    },
    /// The meta-reflex issued an intervention command
    InterventionIssued {
        /// Originating tick
        tick: u64,
        /// Command label
        command: String,
        /// Trigger(s) that produced the command
        triggers: Vec<String>,
    },
    /// A chunk was routed into memory pools
    ChunkStored {
        /// Originating tick
        tick: u64,
        /// Chunk id
        chunk_id: Uuid,
        /// Pools the chunk landed in
        pools: PoolSet,
    },
}

impl DawnEvent {
    /// Tick the event originated from.
    pub fn tick(&self) -> u64 {
        match self {
            Self::PulseDelta { tick, .. }
            | Self::ZoneTransition { tick, .. }
            | Self::ChaosAlert { tick, .. }
            | Self::SigilExecuted { tick, .. }
            | Self::InterventionIssued { tick, .. }
            | Self::ChunkStored { tick, .. } => *tick,
        }
    }
}

/// Bounded lossy fan-out for [`DawnEvent`].
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DawnEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with the given per-subscriber queue depth.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Succeeds whether or not anyone is listening.
    pub fn publish(&self, event: DawnEvent) {
        // send only fails when there are no receivers
        let _ = self.sender.send(event);
    }

    /// Subscribe to events from this point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<DawnEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(DawnEvent::ZoneTransition {
            tick: 1,
            from: Zone::Calm,
            to: Zone::Active,
            heat: 45.0,
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        for tick in 1..=3 {
            bus.publish(DawnEvent::InterventionIssued {
                tick,
                command: "slow_tick".to_string(),
                triggers: vec!["ZONE_SURGE".to_string()],
            });
        }

        for expected in 1..=3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.tick(), expected);
        }
    }

    #[tokio::test]
    async fn test_lagging_subscriber_drops_oldest() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for tick in 0..32 {
            bus.publish(DawnEvent::InterventionIssued {
                tick,
                command: "slow_tick".to_string(),
                triggers: vec![],
            });
        }

        // The first recv reports the lag instead of blocking the publisher.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {:?}", other),
        }
    }
}
