//! Control loop tests over small in-memory tables

#[cfg(test)]
mod control_loop_tests {
    use crate::apply::{ApplyOutcome, SettingsApplier};
    use crate::config::Settings;
    use crate::control::{
        decide, draw_key, run_live_training, run_training, run_training_worker, training_step,
        ControlContext, Decision, InferenceController, InferenceCounters, InferenceOutcome,
        SearchParams, TrainingStep, MAX_CONSECUTIVE_MISSES,
    };
    use crate::engine::{shared, ApproxFunction, ValueTable};
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::{Labels, LoadSample, TuningProfile, WeightsReference};
    use crate::observability::{StructuredLogger, TunerMetrics};
    use crate::stats::SharedStats;
    use anyhow::Result;
    use arc_swap::ArcSwap;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    fn settings(accuracy: f64, grace_minutes: u64) -> Settings {
        Settings {
            max_learning_values: 0,
            saving_loop: 1000,
            accuracy,
            approx_function: ApproxFunction::Identity,
            grace_period: Duration::from_secs(grace_minutes * 60),
            stats_collection_period: Duration::from_millis(10),
            inference_loop_period: Duration::from_millis(10),
            plugins_path: PathBuf::new(),
            weights: WeightsReference::default(),
            labels: Labels::default(),
        }
    }

    fn table(keys: &[u64], capacity: usize) -> ValueTable {
        let mut table = ValueTable::with_capacity(capacity);
        for &key in keys {
            table
                .insert(TuningProfile {
                    transfer_rate: key,
                    rx_ring_size: 512,
                    net_core_somaxconn: 1024,
                    ..Default::default()
                })
                .unwrap();
        }
        table
    }

    fn context(table: ValueTable, settings: Settings) -> ControlContext {
        ControlContext::new(
            shared(table),
            Arc::new(ArcSwap::from_pointee(settings)),
            Arc::new(SharedStats::new()),
            StructuredLogger::new("test0"),
        )
    }

    fn keys(ctx: &ControlContext) -> Vec<u64> {
        ctx.read_table().iter().map(|p| p.transfer_rate).collect()
    }

    fn live(transfer_rate: u64) -> LoadSample {
        LoadSample {
            transfer_rate,
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct RecordingApplier {
        applied: Mutex<Vec<u64>>,
        fail: bool,
    }

    #[async_trait]
    impl SettingsApplier for RecordingApplier {
        async fn apply(&self, _interface: &str, profile: &TuningProfile) -> Result<ApplyOutcome> {
            if self.fail {
                anyhow::bail!("sysctl not found");
            }
            self.applied.lock().unwrap().push(profile.transfer_rate);
            Ok(ApplyOutcome::DryRun { commands: 4 })
        }
    }

    // Decisions

    #[test]
    fn test_decide_small_delta() {
        let decision = decide(515.0, 510.0, 51.0, Duration::from_secs(1), Duration::ZERO);
        assert!(matches!(decision, Decision::SkipSmallDelta { .. }));
    }

    #[test]
    fn test_decide_grace_period_holds_lower_score() {
        let grace = Duration::from_secs(600);
        assert!(matches!(
            decide(100.0, 510.0, 10.0, Duration::from_secs(30), grace),
            Decision::SkipGracePeriod { .. }
        ));
        assert_eq!(
            decide(100.0, 510.0, 10.0, Duration::from_secs(601), grace),
            Decision::Search
        );
    }

    #[test]
    fn test_decide_higher_score_ignores_grace_period() {
        let grace = Duration::from_secs(600);
        assert_eq!(
            decide(900.0, 510.0, 10.0, Duration::ZERO, grace),
            Decision::Search
        );
    }

    // Training

    #[test]
    fn test_draw_key_in_range() {
        let table = table(&[100, 500, 900], 10);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let key = draw_key(&mut rng, &table).unwrap();
            assert!((1..900).contains(&key) || key == 100);
        }
        assert_eq!(draw_key(&mut rng, &ValueTable::with_capacity(1)), None);
    }

    #[test]
    fn test_training_step_outcomes() {
        let settings = settings(0.5, 0);
        let metrics = TunerMetrics::new();
        let mut table = table(&[100, 500, 900], 4);

        let params = SearchParams::for_score(500.0, &settings);
        assert_eq!(
            training_step(&mut table, 500, &params, &settings, &metrics, None),
            TrainingStep::Duplicate(500)
        );

        let params = SearchParams::for_score(510.0, &settings);
        assert_eq!(
            training_step(&mut table, 510, &params, &settings, &metrics, None),
            TrainingStep::Inserted { index: 2, key: 510 }
        );

        let params = SearchParams::for_score(3000.0, &settings);
        assert!(matches!(
            training_step(&mut table, 3000, &params, &settings, &metrics, None),
            TrainingStep::Full
        ));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_training_step_miss_keeps_table() {
        let settings = settings(0.5, 0);
        let mut table = table(&[100, 500, 900], 10);
        let params = SearchParams::for_score(3000.0, &settings);

        let step = training_step(&mut table, 3000, &params, &settings, &TunerMetrics::new(), None);
        assert_eq!(
            step,
            TrainingStep::Miss {
                key: 3000,
                closest: Some(2)
            }
        );
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_worker_stops_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(table(&[1_000, 50_000, 200_000], 100), settings(0.0, 0));
        let (tx, mut rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let summary = run_training_worker(
            &ctx,
            &temp_dir.path().join("t_trained_data.csv"),
            0,
            &mut rng,
            &mut rx,
        );
        assert_eq!(summary.inserted, 0);
        assert_eq!(ctx.read_table().len(), 3);
    }

    #[test]
    fn test_worker_on_empty_table_returns() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(ValueTable::with_capacity(5), settings(0.0, 0));
        let (_tx, mut rx) = broadcast::channel(1);

        let mut rng = StdRng::seed_from_u64(1);
        let summary = run_training_worker(&ctx, &temp_dir.path().join("x.csv"), 0, &mut rng, &mut rx);
        assert_eq!(summary.inserted, 0);
        assert!(!summary.full);
    }

    #[test]
    fn test_worker_gives_up_when_nothing_matches() {
        let temp_dir = TempDir::new().unwrap();
        // accuracy 0.99 leaves a tolerance of a few bytes/s around the only key
        let ctx = context(table(&[1_000_000_000], 10), settings(0.99, 0));
        let (_tx, mut rx) = broadcast::channel(1);

        let mut rng = StdRng::seed_from_u64(3);
        let summary = run_training_worker(&ctx, &temp_dir.path().join("s.csv"), 0, &mut rng, &mut rx);

        assert!(summary.stalled);
        assert!(!summary.full);
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.misses + summary.duplicates, MAX_CONSECUTIVE_MISSES);
        assert_eq!(keys(&ctx), vec![1_000_000_000]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_training_fills_table_without_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        // accuracy 0 makes the tolerance equal to the score
        let ctx = context(table(&[1_000, 50_000, 200_000], 60), settings(0.0, 0));
        let (tx, _rx) = broadcast::channel(1);

        let summary = run_training(
            ctx.clone(),
            temp_dir.path().join("t_trained_data.csv"),
            4,
            &tx,
        )
        .await
        .unwrap();

        assert!(summary.full);
        assert_eq!(summary.entries, 60);
        assert_eq!(summary.inserted, 57);

        let keys = keys(&ctx);
        assert_eq!(keys.len(), 60);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_live_training_uses_live_sample() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(table(&[100, 500, 900], 4), settings(0.5, 0));
        ctx.stats.publish_rates(510, 3, 2, 1);
        ctx.stats.publish_cpu(42.0);
        let (_tx, rx) = broadcast::channel(1);

        let summary = run_live_training(ctx.clone(), &temp_dir.path().join("l.csv"), rx).await;

        assert!(summary.full);
        assert_eq!(summary.inserted, 1);
        assert_eq!(keys(&ctx), vec![100, 500, 510, 900]);

        let table = ctx.read_table();
        let inserted = table.get(2).unwrap();
        assert_eq!(inserted.drop_rate, 3);
        assert_eq!(inserted.errors_rate, 2);
        assert_eq!(inserted.fifo_errors_rate, 1);
        assert!((inserted.cpu_usage_percentage - 42.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_live_training_stops_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(table(&[100, 500, 900], 10), settings(0.5, 0));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn({
            let ctx = ctx.clone();
            let path = temp_dir.path().join("l.csv");
            async move { run_live_training(ctx, &path, rx).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();

        let summary = handle.await.unwrap();
        assert!(!summary.full);
        assert_eq!(summary.inserted, 0);
    }

    // Inference

    #[tokio::test]
    async fn test_inference_sequence() {
        let ctx = context(table(&[100, 500, 900], 10), settings(0.5, 1));
        let applier = Arc::new(RecordingApplier::default());
        let counters = Arc::new(InferenceCounters::new());
        let mut controller =
            InferenceController::new(ctx, applier.clone(), "eth0", counters.clone());
        let second = Duration::from_secs(1);

        assert_eq!(
            controller.evaluate(&LoadSample::default(), second).await,
            InferenceOutcome::Idle
        );

        let outcome = controller.evaluate(&live(510), second).await;
        assert_eq!(
            outcome,
            InferenceOutcome::Applied {
                index: 1,
                transfer_rate: 500,
                outcome: Some(ApplyOutcome::DryRun { commands: 4 }),
            }
        );
        assert_eq!(controller.baseline(), 510.0);

        assert!(matches!(
            controller.evaluate(&live(515), second).await,
            InferenceOutcome::Skipped(Decision::SkipSmallDelta { .. })
        ));
        assert!(matches!(
            controller.evaluate(&live(100), second).await,
            InferenceOutcome::Skipped(Decision::SkipGracePeriod { .. })
        ));

        let outcome = controller
            .evaluate(&live(100), Duration::from_secs(61))
            .await;
        assert!(matches!(
            outcome,
            InferenceOutcome::Applied {
                index: 0,
                transfer_rate: 100,
                ..
            }
        ));

        assert_eq!(
            controller.evaluate(&live(3000), second).await,
            InferenceOutcome::Missed {
                closest_key: Some(900)
            }
        );

        assert_eq!(*applier.applied.lock().unwrap(), vec![500, 100]);
        let report = controller.report();
        assert_eq!(report.loops, 3);
        assert_eq!(report.matches, 2);
        assert!((report.success_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_apply_degrades_applier_health() {
        let ctx = context(table(&[100, 500, 900], 10), settings(0.5, 0));
        let health = HealthRegistry::new();
        health.register_all().await;

        let applier = Arc::new(RecordingApplier {
            fail: true,
            ..Default::default()
        });
        let mut controller =
            InferenceController::new(ctx, applier, "eth0", Arc::new(InferenceCounters::new()))
                .with_health(health.clone());

        let outcome = controller.evaluate(&live(510), Duration::from_secs(1)).await;
        assert!(matches!(
            outcome,
            InferenceOutcome::Applied { outcome: None, .. }
        ));
        // the failed profile still becomes the baseline
        assert_eq!(controller.baseline(), 510.0);

        let status = health.health().await.components[components::APPLIER].status;
        assert_eq!(status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_inference_run_stops_on_shutdown() {
        let ctx = context(table(&[100, 500, 900], 10), settings(0.5, 0));
        ctx.stats.publish_rates(510, 0, 0, 0);
        let applier = Arc::new(RecordingApplier::default());
        let counters = Arc::new(InferenceCounters::new());
        let controller = InferenceController::new(ctx, applier.clone(), "eth0", counters.clone());

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(controller.run(rx));
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        // first tick applies, later ticks see no change
        assert_eq!(*applier.applied.lock().unwrap(), vec![500]);
        assert_eq!(counters.matches(), 1);
    }
}
