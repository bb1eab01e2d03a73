//! End-to-end scenarios for the cognitive loop.

use chrono::Duration as ChronoDuration;
use dawn::clock::ManualClock;
use dawn::memory::MemoryRouter;
use dawn::sigil::{House, SigilEngine};
use dawn::types::{IngestKind, MemoryChunk, PulseState, Zone};
use dawn::{RuntimeConfig, TickScheduler};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

fn scheduler() -> (TickScheduler, Arc<ManualClock>, TempDir) {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let config = RuntimeConfig::default()
        .with_state_root(dir.path())
        .with_session_id("scenario");
    let scheduler = TickScheduler::with_clock(config, clock.clone()).unwrap();
    (scheduler, clock, dir)
}

/// Scenario A: an entropy spike raises HIGH_ENTROPY, registers
/// ENTROPY_REGULATION in the monitor house, executes it, and stores a
/// tagged chunk.
#[tokio::test]
async fn scenario_entropy_spike() {
    let (mut scheduler, clock, _dir) = scheduler();
    scheduler.pulse_mut().restore_heat(30.0);
    assert_eq!(scheduler.pulse().zone(), Zone::Calm);

    let samples = [0.4, 0.5, 0.78, 0.82, 0.9];
    let mut results = Vec::new();

    for entropy in samples {
        scheduler.ingest_event(
            IngestKind::ExternalSignal,
            serde_json::json!({"entropy": entropy, "bloom_id": "b1"}),
        );
        results.push(scheduler.execute_single_tick().await.unwrap());
        clock.advance_secs(1);
    }

    // Quiet until the third sample crosses 0.75.
    assert!(results[0].interventions_triggered.is_empty());
    assert!(results[1].interventions_triggered.is_empty());
    assert!(results[2]
        .interventions_triggered
        .contains(&"register(ENTROPY_REGULATION)".to_string()));

    // The sigil lives in the monitor house and fired within the tick.
    let sigil = scheduler
        .sigils()
        .find_by_name("ENTROPY_REGULATION")
        .expect("intervention sigil registered");
    assert_eq!(sigil.house, House::Monitor);

    let fired = &results[2].sigils_fired;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].name, "ENTROPY_REGULATION");
    assert_eq!(fired[0].house, "monitor");
    assert_eq!(fired[0].routed_to, "system_monitor");

    // Heat rose by temp_seed/10 = 4.5 over the previous tick.
    let rise = results[2].pulse.heat - results[1].pulse.heat;
    assert!((rise - 4.5).abs() < 1e-6, "heat rise was {rise}");

    // The cycle chunk is tagged and carries the sigil.
    let chunk_id = results[2].memory_chunk_id.unwrap();
    let chunk = scheduler.memory().get(&chunk_id).unwrap();
    assert_eq!(chunk.topic.as_deref(), Some("entropy_spike"));
    assert!(chunk.sigils.contains(&"ENTROPY_REGULATION".to_string()));
}

/// Scenario B: repeated hot updates open a surge; closing it opens a grace
/// of at least 30 s during which nothing executes.
#[tokio::test]
async fn scenario_surge_and_grace() {
    let (mut scheduler, clock, _dir) = scheduler();
    scheduler.pulse_mut().restore_heat(55.0);

    let mut previous = 55.0;
    for i in 0..3 {
        scheduler.ingest_event(IngestKind::ExternalSignal, serde_json::json!({"heat": 80.0}));
        let result = scheduler.execute_single_tick().await.unwrap();
        clock.advance_secs(1);

        // Bounded by the +/-15 update cap plus the executed sigil's feedback.
        assert!(result.pulse.heat - previous <= 15.0 + 10.0);
        previous = result.pulse.heat;

        if i == 0 {
            assert_eq!(result.pulse.zone, Zone::Surge);
        }
    }
    assert_eq!(scheduler.pulse().zone(), Zone::Surge);

    // Drive the heat back down until the surge closes.
    let mut grace_tick = None;
    for _ in 0..10 {
        scheduler.ingest_event(IngestKind::ExternalSignal, serde_json::json!({"heat": 0.0}));
        let result = scheduler.execute_single_tick().await.unwrap();
        clock.advance_secs(1);

        if result.pulse.zone != Zone::Surge {
            grace_tick = Some(result);
            break;
        }
    }

    let closing = grace_tick.expect("surge should close");
    // Grace of at least 30 s opened; the closing tick executed nothing.
    assert!(scheduler.pulse().apply_grace_period() > 0.0);
    assert!(closing.sigils_fired.is_empty());

    // Every tick under grace stays execution-free.
    let under_grace = scheduler.execute_single_tick().await.unwrap();
    assert!(under_grace.sigils_fired.is_empty());
}

/// Scenario C: all three triggers issue the full ordered command sequence,
/// slow the next tick, and force heat to 25 before anything executes.
#[tokio::test]
async fn scenario_triple_trigger() {
    let (mut scheduler, _clock, _dir) = scheduler();
    scheduler.pulse_mut().restore_heat(70.0);

    let interval_before = scheduler.status().current_interval_secs;

    scheduler.ingest_event(
        IngestKind::ExternalSignal,
        serde_json::json!({"scup": 0.3, "entropy": 0.85, "bloom_id": "b1"}),
    );
    let result = scheduler.execute_single_tick().await.unwrap();

    assert_eq!(
        result.interventions_triggered,
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

    // Heat forced to 25; the cooldown grace kept every sigil unexecuted.
    assert_eq!(result.pulse.heat, 25.0);
    assert!(result.sigils_fired.is_empty());
    for name in ["STABILIZE_PROTOCOL", "ENTROPY_REGULATION", "DEEP_REFLECTION"] {
        let sigil = scheduler.sigils().find_by_name(name).expect(name);
        assert_eq!(sigil.execution_count, 0);
    }

    // Next-tick interval slowed by at least 1.5x.
    assert!(result.pulse.interval_secs >= 1.5 * interval_before);
}

/// Scenario D: pool routing over a spread of importances.
#[test]
fn scenario_memory_routing() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let mut router = MemoryRouter::new(
        dir.path(),
        "routing",
        50,
        200,
        5000,
        Duration::from_secs(300),
        clock,
    )
    .unwrap();

    let speakers = ["dawn", "user", "system"];
    let mut ids = Vec::new();

    for i in 0..60u32 {
        let mut chunk = MemoryChunk {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            speaker: speakers[i as usize % 3].to_string(),
            topic: None,
            content: format!("event number {i}"),
            pulse_state: PulseState {
                heat: (i * 13 % 101) as f64,
                entropy: (i * 17 % 100) as f64 / 100.0,
                scup: 0.7,
                mood: "focused".to_string(),
                zone: Zone::from_heat((i * 13 % 101) as f64),
                error: None,
            },
            sigils: Vec::new(),
        };
        if i % 3 == 0 {
            chunk.sigils.push("MEMORY_CONSOLIDATION".to_string());
        }

        ids.push(chunk.id);
        router.store(chunk).unwrap();
    }

    // Recent holds all 60, FIFO order.
    assert_eq!(router.recent_ids(), ids);

    // Working holds the most recent qualifiers (importance >= 0.5), cap 50.
    let qualifying: Vec<Uuid> = ids
        .iter()
        .filter(|id| router.importance_of(id).unwrap() >= 0.5)
        .copied()
        .collect();
    let expected_working: Vec<Uuid> = qualifying
        .iter()
        .skip(qualifying.len().saturating_sub(50))
        .copied()
        .collect();
    assert_eq!(router.working_ids(), expected_working);

    // Significant holds exactly the chunks at or above 0.75.
    let expected_significant: Vec<Uuid> = ids
        .iter()
        .filter(|id| router.importance_of(id).unwrap() >= 0.75)
        .copied()
        .collect();
    let mut significant = router.significant_ids();
    significant.sort();
    let mut expected = expected_significant.clone();
    expected.sort();
    assert_eq!(significant, expected);
    assert!(!expected.is_empty());
}

/// Scenario E: decay kills a mid-convolution sigil within ceil(1/0.06)
/// once-per-second passes at constant heat 50.
#[test]
fn scenario_sigil_decay() {
    let clock = Arc::new(ManualClock::starting_now());
    let mut engine = SigilEngine::new(128, Duration::from_millis(250), clock.clone());

    let id = engine.register("X", 50.0, House::Memory, 5).unwrap();

    // First pass adds 0.05 * 1.5 / 1.25 = 0.06.
    clock.advance_secs(1);
    engine.decay(50.0);
    let accumulator = engine.get(&id).unwrap().decay_accumulator;
    assert!((accumulator - 0.06).abs() < 1e-9);

    let mut calls = 1;
    while engine.get(&id).is_some() {
        clock.advance_secs(1);
        engine.decay(50.0);
        calls += 1;
        assert!(calls <= 17, "sigil outlived the decay bound");
    }
    assert_eq!(calls, 17);
}

/// Scenario F: export, import into a fresh instance, re-export; state is
/// equal modulo timestamps.
#[tokio::test]
async fn scenario_snapshot_roundtrip() {
    let (mut scheduler, clock, _dir) = scheduler();

    for i in 0..20 {
        scheduler.ingest_event(
            IngestKind::ExternalSignal,
            serde_json::json!({"entropy": 0.3 + 0.02 * i as f64, "bloom_id": "b1"}),
        );
        scheduler.execute_single_tick().await.unwrap();
        clock.advance_secs(1);
    }

    // Leave a live sigil in the table for the export.
    scheduler
        .sigils_mut()
        .register("EXPORT_MARKER", 60.0, House::Meta, 6)
        .unwrap();

    let exported = scheduler.export_state();
    let zip_path = scheduler.export_snapshot().unwrap();
    assert!(zip_path.exists());

    // Fresh instance, fresh state root.
    let dir2 = TempDir::new().unwrap();
    let clock2 = Arc::new(ManualClock::starting_now());
    let config2 = RuntimeConfig::default()
        .with_state_root(dir2.path())
        .with_session_id("scenario-b");
    let mut restored = TickScheduler::with_clock(config2, clock2).unwrap();
    restored.import_snapshot(&zip_path).unwrap();

    assert_eq!(restored.status().tick_count, 20);
    assert_eq!(
        restored.status().chunks_stored,
        exported.system_state.scheduler.chunks_stored
    );

    let reexported = restored.export_state();
    assert_eq!(reexported.system_state.pulse, exported.system_state.pulse);
    assert_eq!(
        reexported.system_state.sigil_table,
        exported.system_state.sigil_table
    );
    assert_eq!(
        reexported.system_state.entropy_profiles,
        exported.system_state.entropy_profiles
    );
    assert_eq!(reexported.memory_chunks, exported.memory_chunks);
    assert_eq!(reexported.intervention_log, exported.intervention_log);
    assert_eq!(
        reexported.system_state.scheduler.tick_count,
        exported.system_state.scheduler.tick_count
    );
}

/// Boundary: zone at the exact thresholds.
#[test]
fn boundary_zone_thresholds() {
    assert_eq!(Zone::from_heat(40.0), Zone::Active);
    assert_eq!(Zone::from_heat(60.0), Zone::Surge);
}

/// Boundary: the loop keeps ticking and stays in bounds over a long run
/// mixing quiet and noisy phases.
#[tokio::test]
async fn long_run_stays_bounded() {
    let (mut scheduler, clock, _dir) = scheduler();

    for i in 0..120u64 {
        if i % 7 == 0 {
            scheduler.ingest_event(
                IngestKind::ExternalSignal,
                serde_json::json!({"entropy": (i % 10) as f64 / 10.0, "bloom_id": "noisy"}),
            );
        }
        if i % 11 == 0 {
            scheduler.ingest_event(
                IngestKind::ExternalSignal,
                serde_json::json!({"heat": (i % 100) as f64}),
            );
        }

        let result = scheduler.execute_single_tick().await.unwrap();
        assert!((0.1..=5.0).contains(&result.pulse.interval_secs));
        assert!((0.0..=100.0).contains(&result.pulse.heat));
        clock.advance(ChronoDuration::milliseconds(500));
    }

    let status = scheduler.status();
    assert_eq!(status.tick_count, 120);
    assert!(status.chunks_stored >= 120);
    assert!(scheduler.sigils().len() <= 128);
}
