use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use surge_core::{
    AbortCause, IterationError, MetricKind, ProgressUpdate, RampingSchedule, RunConfig,
    RunConfigBuilder, RunOptions, RunPhase, SetupError, Stage, TeardownError, Verdict, run,
};

const SLEEP: Duration = Duration::from_millis(100);

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn sleeping_scenario() -> RunConfigBuilder<()> {
    RunConfig::builder().scenario(|ctx| async move {
        ctx.sleep(SLEEP).await;
        Ok(())
    })
}

#[tokio::test(start_paused = true)]
async fn default_shape_ramps_holds_and_drains() -> anyhow::Result<()> {
    let stages = vec![
        Stage::new(secs(10), 5),
        Stage::new(secs(30), 5),
        Stage::new(secs(10), 0),
    ];
    let updates: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::default();
    let sink = updates.clone();

    let config = sleeping_scenario()
        .stages(stages.clone())
        .on_progress(Arc::new(move |u: ProgressUpdate| sink.lock().push(u)))
        .build()?;
    let result = run(config).await?;

    anyhow::ensure!(result.verdict == Verdict::Pass, "verdict {}", result.verdict);
    anyhow::ensure!(result.final_phase == RunPhase::Finished(Verdict::Pass));
    anyhow::ensure!(result.peak_vus == 5, "peak {}", result.peak_vus);
    anyhow::ensure!(result.iterations > 0);
    anyhow::ensure!(result.snapshot.gauge("vus") == Some(0.0));
    anyhow::ensure!(result.snapshot.gauge("vus_max") == Some(5.0));

    let schedule = RampingSchedule::new(0, stages);
    let updates = updates.lock();
    anyhow::ensure!(!updates.is_empty());
    for u in updates.iter() {
        anyhow::ensure!(
            u.target_vus == schedule.target_at(u.elapsed),
            "target {} at {:?}",
            u.target_vus,
            u.elapsed
        );
        anyhow::ensure!(u.live_vus >= u.target_vus);
        anyhow::ensure!(u.elapsed < secs(50));
    }

    let plateau: Vec<_> = updates
        .iter()
        .filter(|u| u.elapsed >= secs(10) && u.elapsed < secs(40))
        .collect();
    anyhow::ensure!(!plateau.is_empty());
    anyhow::ensure!(plateau.iter().all(|u| u.target_vus == 5 && u.live_vus == 5));

    let ramping_down = updates
        .iter()
        .find(|u| u.elapsed == secs(45))
        .map(|u| u.target_vus);
    anyhow::ensure!(ramping_down == Some(3), "target at 45s: {ramping_down:?}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn setup_failure_aborts_without_iterations() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU64::new(0));
    let counted = calls.clone();
    let torn_down = Arc::new(AtomicU64::new(0));
    let teardown_calls = torn_down.clone();

    let config = RunConfig::<u32>::builder_with_setup(|_ctx| async {
        Err(SetupError::new("seed request returned 500"))
    })
    .scenario(move |_ctx| {
        let counted = counted.clone();
        async move {
            counted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    })
    .teardown(move |_ctx| {
        let teardown_calls = teardown_calls.clone();
        async move {
            teardown_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    })
    .stage(secs(5), 3)
    .threshold("iterations", ["count>0"])
    .build()?;
    let result = run(config).await?;

    anyhow::ensure!(result.verdict == Verdict::Aborted);
    anyhow::ensure!(result.final_phase == RunPhase::Aborted);
    anyhow::ensure!(result.iterations == 0);
    anyhow::ensure!(calls.load(Ordering::Relaxed) == 0);
    anyhow::ensure!(torn_down.load(Ordering::Relaxed) == 0);
    anyhow::ensure!(result.thresholds.is_empty());
    anyhow::ensure!(matches!(
        result.abort_cause,
        Some(AbortCause::Setup(ref msg)) if msg.contains("seed request")
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn setup_panic_is_a_setup_failure() -> anyhow::Result<()> {
    let config = RunConfig::<u32>::builder_with_setup(|ctx| async move {
        if ctx.env.get("NEVER_SET").is_none() {
            panic!("fixture bug");
        }
        Ok(1)
    })
    .scenario(|_ctx| async { Ok(()) })
    .stage(secs(1), 1)
    .build()?;
    let result = run(config).await?;

    anyhow::ensure!(result.verdict == Verdict::Aborted);
    anyhow::ensure!(matches!(
        result.abort_cause,
        Some(AbortCause::Setup(ref msg)) if msg.contains("fixture bug")
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn check_counters_match_iteration_count() -> anyhow::Result<()> {
    let config = RunConfig::<u32>::builder_with_setup(|_ctx| async { Ok(200) })
        .scenario(|ctx| async move {
            let status = *ctx.fixture();
            ctx.check(
                &status,
                &[
                    ("status is 200", &|s: &u32| *s == 200),
                    ("status is 201", &|s: &u32| *s == 201),
                ],
            );
            ctx.sleep(SLEEP).await;
            Ok(())
        })
        .stage(secs(3), 4)
        .build()?;
    let result = run(config).await?;
    let snap = &result.snapshot;

    let k = result.iterations as f64;
    anyhow::ensure!(k > 0.0);
    anyhow::ensure!(snap.tagged_counter("check_passes", &[("check", "status is 200")]) == k);
    anyhow::ensure!(snap.tagged_counter("check_failures", &[("check", "status is 201")]) == k);
    anyhow::ensure!(snap.tagged_counter("check_failures", &[("check", "status is 200")]) == 0.0);
    anyhow::ensure!(snap.tagged_counter("check_passes", &[("check", "status is 201")]) == 0.0);

    let checks = snap.rate("checks");
    anyhow::ensure!(checks.total == 2 * result.iterations);
    anyhow::ensure!(checks.hits == result.iterations);

    // A failing check never fails the iteration.
    anyhow::ensure!(snap.rate("iteration_failed").hits == 0);
    anyhow::ensure!(result.verdict == Verdict::Pass);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_vus_lose_no_samples() -> anyhow::Result<()> {
    let config = RunConfig::<()>::builder()
        .metric("work_done", MetricKind::Counter)
        .metric("work_latency", MetricKind::Trend)
        .scenario(|ctx| async move {
            ctx.record("work_done", 1.0, &[("vu", ctx.vu_id().to_string().as_str())])
                .map_err(IterationError::failed)?;
            ctx.record("work_latency", 5.0, &[]).map_err(IterationError::failed)?;
            ctx.sleep(Duration::from_millis(10)).await;
            Ok(())
        })
        .stage(secs(2), 16)
        .stage(secs(2), 16)
        .build()?;
    let result = run(config).await?;

    let iterations = result.iterations;
    anyhow::ensure!(iterations > 100, "only {iterations} iterations");
    anyhow::ensure!(result.snapshot.counter("work_done") == iterations as f64);
    let latency = result
        .snapshot
        .trend("work_latency")
        .ok_or_else(|| anyhow::anyhow!("missing trend"))?;
    anyhow::ensure!(latency.count() == iterations);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unregistered_metric_fails_the_iteration_only() -> anyhow::Result<()> {
    let config = RunConfig::<()>::builder()
        .scenario(|ctx| async move {
            ctx.sleep(SLEEP).await;
            ctx.record("not_declared", 1.0, &[])
                .map_err(IterationError::failed)
        })
        .stage(secs(1), 1)
        .build()?;
    let result = run(config).await?;

    anyhow::ensure!(result.verdict == Verdict::Pass);
    let failed = result.snapshot.rate("iteration_failed");
    anyhow::ensure!(failed.hits == result.iterations && failed.total == result.iterations);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failing_threshold_aborts_mid_run_when_enabled() -> anyhow::Result<()> {
    let config = RunConfig::<()>::builder()
        .scenario(|ctx| async move {
            ctx.sleep(SLEEP).await;
            Err(IterationError::failed("backend said no"))
        })
        .stage(secs(30), 2)
        .threshold("iteration_failed", ["rate<0.1"])
        .options(RunOptions {
            abort_on_fail: true,
            ..RunOptions::default()
        })
        .build()?;
    let result = run(config).await?;

    anyhow::ensure!(result.verdict == Verdict::Aborted);
    anyhow::ensure!(result.final_phase == RunPhase::Aborted);
    anyhow::ensure!(result.duration < secs(30), "ran for {:?}", result.duration);
    anyhow::ensure!(matches!(
        result.abort_cause,
        Some(AbortCause::Threshold { ref metric, ref expression })
            if metric == "iteration_failed" && expression == "rate<0.1"
    ));
    anyhow::ensure!(result.failed_thresholds().count() == 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failing_threshold_without_abort_runs_to_completion() -> anyhow::Result<()> {
    let config = sleeping_scenario()
        .stage(secs(5), 2)
        .threshold("iteration_duration", ["p(95)<50", "max<1000"])
        .build()?;
    let result = run(config).await?;

    anyhow::ensure!(result.verdict == Verdict::Fail);
    anyhow::ensure!(result.final_phase == RunPhase::Finished(Verdict::Fail));
    anyhow::ensure!(result.duration >= secs(5));
    let failed: Vec<_> = result.failed_thresholds().collect();
    anyhow::ensure!(failed.len() == 1 && failed[0].expression == "p(95)<50");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn abort_from_iteration_stops_the_run() -> anyhow::Result<()> {
    let torn_down = Arc::new(AtomicU64::new(0));
    let teardown_calls = torn_down.clone();
    let config = RunConfig::<()>::builder()
        .scenario(|ctx| async move {
            ctx.sleep(SLEEP).await;
            if ctx.vu_id() == 1 && ctx.iteration() == 3 {
                return Err(IterationError::abort("fixture corrupted"));
            }
            Ok(())
        })
        .teardown(move |_ctx| {
            let calls = teardown_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .stage(secs(60), 3)
        .build()?;
    let result = run(config).await?;

    anyhow::ensure!(result.verdict == Verdict::Aborted);
    anyhow::ensure!(result.final_phase == RunPhase::Aborted);
    anyhow::ensure!(
        torn_down.load(Ordering::SeqCst) == 1,
        "teardown still runs once after an abort"
    );
    anyhow::ensure!(result.duration < secs(60));
    anyhow::ensure!(matches!(
        result.abort_cause,
        Some(AbortCause::Signal { vu_id: 1, ref reason }) if reason == "fixture corrupted"
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn teardown_failure_keeps_the_verdict() -> anyhow::Result<()> {
    let seen: Arc<Mutex<Option<String>>> = Arc::default();
    let slot = seen.clone();

    let config = RunConfig::<String>::builder_with_setup(|_ctx| async {
        Ok("team-42".to_string())
    })
    .scenario(|ctx| async move {
        ctx.sleep(SLEEP).await;
        Ok(())
    })
    .teardown(move |ctx| {
        let slot = slot.clone();
        async move {
            *slot.lock() = Some(ctx.fixture().clone());
            Err(TeardownError::new("cleanup endpoint missing"))
        }
    })
    .stage(secs(2), 1)
    .build()?;
    let result = run(config).await?;

    anyhow::ensure!(result.verdict == Verdict::Pass);
    anyhow::ensure!(seen.lock().as_deref() == Some("team-42"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn verdict_is_stable_across_runs() -> anyhow::Result<()> {
    let build = || {
        sleeping_scenario()
            .stage(secs(3), 3)
            .threshold("iteration_duration", ["p(95)<300"])
            .threshold("iteration_failed", ["rate<0.01"])
            .build()
    };

    let mut verdicts = Vec::new();
    for _ in 0..3 {
        verdicts.push(run(build()?).await?.verdict);
    }
    anyhow::ensure!(verdicts == [Verdict::Pass; 3], "{verdicts:?}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_interrupts_long_iterations() -> anyhow::Result<()> {
    let long = || {
        RunConfig::<()>::builder().scenario(|ctx| async move {
            ctx.sleep(secs(10)).await;
            Ok(())
        })
    };

    let bounded = long()
        .start_vus(1)
        .stage(secs(2), 1)
        .options(RunOptions {
            graceful_stop: Some(secs(1)),
            ..RunOptions::default()
        })
        .build()?;
    let result = run(bounded).await?;
    anyhow::ensure!(result.interrupted == 1, "interrupted {}", result.interrupted);
    anyhow::ensure!(result.iterations == 0);
    anyhow::ensure!(result.snapshot.counter("iterations_interrupted") == 1.0);
    anyhow::ensure!(result.duration < secs(10));

    let unbounded = long().start_vus(1).stage(secs(2), 1).build()?;
    let result = run(unbounded).await?;
    anyhow::ensure!(result.interrupted == 0);
    anyhow::ensure!(result.iterations == 1);
    anyhow::ensure!(result.duration >= secs(10));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn ramp_down_lets_retired_vus_finish_their_iteration() -> anyhow::Result<()> {
    let updates: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::default();
    let sink = updates.clone();

    // Both VUs start a 5s iteration at t=0; the target drops to 0 at t=2.
    let config = RunConfig::<()>::builder()
        .scenario(|ctx| async move {
            ctx.sleep(secs(5)).await;
            Ok(())
        })
        .start_vus(2)
        .stage(secs(2), 2)
        .stage(Duration::ZERO, 0)
        .stage(secs(8), 0)
        .options(RunOptions {
            graceful_stop: Some(secs(1)),
            ..RunOptions::default()
        })
        .on_progress(Arc::new(move |u: ProgressUpdate| sink.lock().push(u)))
        .build()?;
    let result = run(config).await?;

    anyhow::ensure!(result.verdict == Verdict::Pass, "verdict {}", result.verdict);
    anyhow::ensure!(result.iterations == 2, "iterations {}", result.iterations);
    anyhow::ensure!(result.interrupted == 0, "interrupted {}", result.interrupted);
    anyhow::ensure!(result.snapshot.rate("iteration_failed").hits == 0);
    anyhow::ensure!(result.snapshot.counter("iterations_interrupted") == 0.0);

    let updates = updates.lock();
    let retiring: Vec<_> = updates
        .iter()
        .filter(|u| u.elapsed >= secs(2) && u.elapsed < secs(5))
        .collect();
    anyhow::ensure!(!retiring.is_empty());
    anyhow::ensure!(
        retiring.iter().all(|u| u.target_vus == 0 && u.live_vus == 2),
        "retired vus must stay live until their iteration ends"
    );
    anyhow::ensure!(
        updates
            .iter()
            .filter(|u| u.elapsed >= secs(6))
            .all(|u| u.live_vus == 0 && u.iterations == 2)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn external_abort_handle_interrupts() -> anyhow::Result<()> {
    let config = sleeping_scenario().stage(secs(120), 2).build()?;
    let handle = config.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(secs(3)).await;
        handle.abort();
    });

    let result = run(config).await?;
    anyhow::ensure!(result.verdict == Verdict::Aborted);
    anyhow::ensure!(result.abort_cause == Some(AbortCause::Interrupted));
    anyhow::ensure!(result.duration < secs(5));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn run_always_terminates() -> anyhow::Result<()> {
    // Iterations that panic or never finish on their own still cannot keep the run alive.
    let config = RunConfig::<()>::builder()
        .scenario(|ctx| async move {
            if ctx.iteration() % 2 == 1 {
                panic!("odd iteration");
            }
            ctx.sleep(SLEEP).await;
            Ok(())
        })
        .stage(secs(5), 8)
        .options(RunOptions {
            graceful_stop: Some(secs(1)),
            ..RunOptions::default()
        })
        .build()?;

    let result = tokio::time::timeout(secs(60), run(config)).await??;
    anyhow::ensure!(result.final_phase.is_terminal());
    let failed = result.snapshot.rate("iteration_failed");
    anyhow::ensure!(failed.hits > 0 && failed.hits < failed.total);
    Ok(())
}
