//! Property tests for the runtime invariants.

use chrono::Utc;
use dawn::bloom::BloomManager;
use dawn::bus::EventBus;
use dawn::clock::ManualClock;
use dawn::entropy::EntropyAnalyzer;
use dawn::memory::MemoryRouter;
use dawn::pulse::PulseController;
use dawn::sigil::{House, SigilEngine};
use dawn::types::{MemoryChunk, PulseState, Zone};
use dawn::{RuntimeConfig, TickScheduler};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_now())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariant 2: every heat update moves heat by at most 15.
    #[test]
    fn heat_updates_bounded(updates in prop::collection::vec(0.0f64..=100.0, 1..50)) {
        let clock = manual_clock();
        let mut pulse = PulseController::new(50.0, clock, EventBus::default());

        for target in updates {
            let before = pulse.heat();
            let delta = pulse.update_heat(target).unwrap();
            prop_assert!((delta.current - before).abs() <= 15.0 + 1e-9);
            prop_assert!((0.0..=100.0).contains(&pulse.heat()));
        }
    }

    /// Invariant 3: zone is a pure function of heat.
    #[test]
    fn zone_is_pure(heat in 0.0f64..=100.0) {
        prop_assert_eq!(Zone::from_heat(heat), Zone::from_heat(heat));
        let expected = if heat < 40.0 {
            Zone::Calm
        } else if heat < 60.0 {
            Zone::Active
        } else {
            Zone::Surge
        };
        prop_assert_eq!(Zone::from_heat(heat), expected);
    }

    /// Invariant 4: every bloom sits exactly one level below its parent.
    #[test]
    fn bloom_depths_consistent(ops in prop::collection::vec(0usize..5, 1..40)) {
        let clock = manual_clock();
        let mut manager = BloomManager::new(5000, clock);
        let mut ids = vec![
            manager.spawn("root", 0.5, Default::default(), Default::default()).unwrap(),
        ];

        for op in ops {
            let parent = ids[op % ids.len()].clone();
            let child = manager.rebloom(&parent, "mutation", 0.05).unwrap();
            ids.push(child);
        }

        for id in &ids {
            let bloom = manager.get(id).unwrap();
            match &bloom.parent_id {
                None => prop_assert_eq!(bloom.depth, 0),
                Some(parent_id) => {
                    let parent = manager.get(parent_id).unwrap();
                    prop_assert_eq!(bloom.depth, parent.depth + 1);
                }
            }
        }
    }

    /// Invariant 5: no sigil survives past twice its base lifespan.
    #[test]
    fn sigil_lifespan_bounded(
        temp in 0.0f64..=100.0,
        convolution in 1u8..=10,
        heat in 0.0f64..=100.0,
    ) {
        let clock = manual_clock();
        let mut engine = SigilEngine::new(128, Duration::from_millis(250), clock.clone());

        let id = engine.register("probe", temp, House::Analysis, convolution).unwrap();
        let lifespan = engine.get(&id).unwrap().base_lifespan_secs;

        clock.advance_secs((2.0 * lifespan).ceil() as i64 + 1);
        engine.decay(heat);

        prop_assert!(engine.get(&id).is_none());
    }

    /// Invariant 6: the priority queue is monotonically non-increasing.
    #[test]
    fn priority_queue_sorted(
        sigils in prop::collection::vec((0.0f64..=100.0, 1u8..=10), 1..40)
    ) {
        let clock = manual_clock();
        let mut engine = SigilEngine::new(128, Duration::from_millis(250), clock);

        for (i, (temp, convolution)) in sigils.iter().enumerate() {
            engine
                .register(&format!("s{i}"), *temp, House::Action, *convolution)
                .unwrap();
        }

        let queue = engine.priority_queue();
        for pair in queue.windows(2) {
            prop_assert!(pair[0].priority >= pair[1].priority);
        }
    }

    /// Invariant 7: a chunk routed into working is also in recent.
    #[test]
    fn working_subset_of_recent(
        chunks in prop::collection::vec((0.0f64..=100.0, 0.0f64..=1.0, any::<bool>()), 1..80)
    ) {
        let dir = TempDir::new().unwrap();
        let clock = manual_clock();
        let mut router = MemoryRouter::new(
            dir.path(), "prop", 50, 200, 5000, Duration::from_secs(300), clock,
        ).unwrap();

        for (i, (heat, entropy, sigiled)) in chunks.iter().enumerate() {
            let mut chunk = MemoryChunk {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                speaker: "dawn".to_string(),
                topic: None,
                content: format!("chunk {i}"),
                pulse_state: PulseState {
                    heat: *heat,
                    entropy: *entropy,
                    scup: 0.5,
                    mood: "focused".to_string(),
                    zone: Zone::from_heat(*heat),
                    error: None,
                },
                sigils: Vec::new(),
            };
            if *sigiled {
                chunk.sigils.push("PROBE".to_string());
            }
            router.store(chunk).unwrap();
        }

        let recent: HashSet<Uuid> = router.recent_ids().into_iter().collect();
        for id in router.working_ids() {
            prop_assert!(recent.contains(&id));
        }
    }

    /// Invariant 9: the chaos score stays in [0, 1] for any sample stream.
    #[test]
    fn chaos_score_in_unit_range(
        samples in prop::collection::vec(0.0f64..=1.0, 1..120),
        heats in prop::collection::vec(0.0f64..=100.0, 1..120),
    ) {
        let clock = manual_clock();
        let mut analyzer = EntropyAnalyzer::new(1000, 50, 0.7, clock.clone());

        for (i, entropy) in samples.iter().enumerate() {
            analyzer.inject_thermal_awareness(heats[i % heats.len()]);
            let profile = analyzer.add_sample("p", *entropy, "prop").unwrap();
            prop_assert!((0.0..=1.0).contains(&profile.chaos_score));
            prop_assert!((0.0..=1.0).contains(&profile.volatility));
            prop_assert!((-1.0..=1.0).contains(&profile.thermal_correlation));
            clock.advance_secs(1);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Invariant 1: the tick interval stays inside [0.1, 5.0] for any heat
    /// trajectory.
    #[test]
    fn tick_interval_bounded(heats in prop::collection::vec(0.0f64..=100.0, 1..12)) {
        tokio_test::block_on(async move {
            let dir = TempDir::new().unwrap();
            let clock = manual_clock();
            let config = RuntimeConfig::default()
                .with_state_root(dir.path())
                .with_session_id("prop");
            let mut scheduler = TickScheduler::with_clock(config, clock.clone()).unwrap();

            for heat in heats {
                scheduler.pulse_mut().restore_heat(heat);
                let result = scheduler.execute_single_tick().await.unwrap();
                assert!(
                    (0.1..=5.0).contains(&result.pulse.interval_secs),
                    "interval {} out of bounds",
                    result.pulse.interval_secs
                );
                clock.advance_secs(1);
            }
        });
    }
}
