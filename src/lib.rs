//! # DAWN - Autonomous Cognitive Runtime
//!
//! A closed control loop that gathers scalar system signals, forecasts
//! short-horizon behavior, reacts by issuing symbolic commands, and commits
//! each cycle to a multi-pool memory store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Tick Scheduler                       │
//! │                                                          │
//! │  Pulse (heat/zone) → Entropy (sample) → Meta-Reflex      │
//! │        ↑                                     ↓           │
//! │  interval law                        intervention cmds   │
//! │        ↑                                     ↓           │
//! │  Memory Router  ←  cycle chunk  ←  Sigil Engine (decay,  │
//! │  (working/recent/significant)      execute one, route)   │
//! │                                                          │
//! │          Bloom Manager (lineage, resonance)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! One cycle per tick: snapshot the pulse and entropy, run the meta-reflex,
//! decay sigils, execute at most one sigil, emit a memory chunk, recompute
//! the interval. Backpressure comes from grace periods (post-surge execution
//! freezes), decay (sigils and bloom resonance), and the meta-reflex's
//! self-interventions.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dawn::{RuntimeConfig, TickScheduler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RuntimeConfig::default().with_state_root("./dawn_state");
//!     let mut scheduler = TickScheduler::new(config)?;
//!
//!     // Run 100 cognitive cycles, then export a snapshot.
//!     scheduler.start(Some(100), None).await?;
//!     let path = scheduler.export_snapshot()?;
//!     println!("snapshot written to {}", path.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bloom;
pub mod bus;
pub mod clock;
pub mod config;
pub mod entropy;
pub mod error;
pub mod memory;
pub mod pulse;
pub mod reflex;
pub mod scheduler;
pub mod sigil;
pub mod snapshot;
pub mod types;

pub use bus::{DawnEvent, EventBus};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::RuntimeConfig;
pub use error::{DawnError, ErrorKind, Result};
pub use scheduler::{StopHandle, TickScheduler};
pub use snapshot::StateSnapshot;
pub use types::{
    IngestKind, MemoryChunk, PulseSnapshot, SchedulerStatus, TickResult, Zone,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shortest tick interval, seconds.
pub const MIN_TICK_INTERVAL_SECS: f64 = 0.1;

/// Longest tick interval, seconds.
pub const MAX_TICK_INTERVAL_SECS: f64 = 5.0;

/// Default trailing window for entropy profiles.
pub const DEFAULT_VOLATILITY_WINDOW: usize = 50;

/// Default chaos score threshold for stabilization alerts.
pub const DEFAULT_CHAOS_THRESHOLD: f64 = 0.7;
