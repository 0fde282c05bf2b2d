use futures::FutureExt as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use surge_metrics::{Registry, Snapshot};

use crate::abort::AbortCause;
use crate::builtin_metrics::{self, BuiltinMetrics};
use crate::config::{RunConfig, SetupFn, TeardownFn};
use crate::error::{Result, SetupError, panic_message};
use crate::iteration::IterationExecutor;
use crate::scheduler::StageScheduler;
use crate::schedule::RampingSchedule;
use crate::state::{RunPhase, RunState, Verdict};
use crate::thresholds::ThresholdResult;
use crate::vu::{SetupContext, TeardownContext};

#[derive(Debug, Clone)]
pub struct RunResult {
    pub verdict: Verdict,
    pub snapshot: Snapshot,
    pub thresholds: Vec<ThresholdResult>,
    pub abort_cause: Option<AbortCause>,
    /// Wall time from the start of setup to the end of teardown.
    pub duration: Duration,
    pub iterations: u64,
    /// VUs cancelled mid-iteration because `graceful_stop` ran out.
    pub interrupted: u64,
    pub peak_vus: u64,
    pub final_phase: RunPhase,
}

impl RunResult {
    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }
}

/// Executes one run: setup, the stage-driven VU pool, teardown, then the verdict.
///
/// Returns `Err` only for configuration problems (detected before setup) and internal
/// failures. Setup failures, abort signals and failed thresholds are all reported
/// through [`RunResult`].
///
/// An abort while running moves the state to the terminal [`RunPhase::Aborted`] first,
/// then still runs teardown once, best effort, before the result is built.
pub async fn run<F: Send + Sync + 'static>(config: RunConfig<F>) -> Result<RunResult> {
    let RunConfig {
        start_vus,
        stages,
        thresholds,
        metrics: declared,
        env,
        options,
        setup,
        scenario,
        teardown,
        progress,
        abort,
    } = config;

    let registry = Arc::new(Registry::new(options.percentile_sketch_precision)?);
    let metrics = BuiltinMetrics::register(&registry)?;
    for decl in &declared {
        registry.register(&decl.name, decl.kind)?;
    }
    let thresholds = Arc::new(thresholds);

    let mut state = RunState::new();
    let started = Instant::now();

    state.transition(RunPhase::SettingUp)?;
    let setup_ctx = SetupContext {
        env: env.clone(),
        metrics: registry.clone(),
    };
    let fixture = match run_setup(&setup, setup_ctx).await {
        Ok(fixture) => Arc::new(fixture),
        Err(err) => {
            tracing::error!(error = %err, "setup failed, no iterations will run");
            state.transition(RunPhase::Aborted)?;
            return Ok(RunResult {
                verdict: Verdict::Aborted,
                snapshot: registry.snapshot(),
                thresholds: Vec::new(),
                abort_cause: Some(AbortCause::Setup(err.to_string())),
                duration: started.elapsed(),
                iterations: 0,
                interrupted: 0,
                peak_vus: 0,
                final_phase: state.phase(),
            });
        }
    };

    state.transition(RunPhase::Running)?;
    let executor = Arc::new(IterationExecutor::new(
        scenario,
        env.clone(),
        fixture.clone(),
        registry.clone(),
        metrics.clone(),
    ));
    let scheduler = StageScheduler {
        schedule: RampingSchedule::new(start_vus, stages),
        options,
        executor,
        registry: registry.clone(),
        metrics,
        thresholds: thresholds.clone(),
        abort: abort.clone(),
        progress,
    };
    let stats = scheduler.run(&mut state).await?;
    let running_for = started.elapsed();

    let abort_cause = abort.cause();
    if abort_cause.is_some() {
        state.transition(RunPhase::Aborted)?;
    } else {
        state.transition(RunPhase::TearingDown)?;
    }

    if let Some(teardown) = &teardown {
        run_teardown(
            teardown,
            TeardownContext {
                env,
                fixture: fixture.clone(),
            },
        )
        .await;
    }
    drop(fixture);

    let snapshot = registry.snapshot();
    let thresholds = thresholds.evaluate(&snapshot, running_for);
    let verdict = match abort_cause {
        Some(_) => Verdict::Aborted,
        None if thresholds.iter().all(|t| t.passed) => Verdict::Pass,
        None => Verdict::Fail,
    };
    if verdict != Verdict::Aborted {
        state.transition(RunPhase::Finished(verdict))?;
    }

    for failed in thresholds.iter().filter(|t| !t.passed) {
        tracing::warn!(
            metric = %failed.metric,
            expression = %failed.expression,
            observed = ?failed.observed,
            "threshold failed"
        );
    }
    tracing::info!(%verdict, ticks = stats.ticks, "run finished");

    Ok(RunResult {
        verdict,
        iterations: snapshot.counter(builtin_metrics::ITERATIONS) as u64,
        snapshot,
        thresholds,
        abort_cause,
        duration: started.elapsed(),
        interrupted: stats.interrupted,
        peak_vus: state.peak_vus(),
        final_phase: state.phase(),
    })
}

async fn run_setup<F>(
    setup: &SetupFn<F>,
    ctx: SetupContext,
) -> std::result::Result<F, SetupError> {
    let panicked = |panic: Box<dyn std::any::Any + Send>| {
        SetupError::new(format!("setup panicked: {}", panic_message(panic.as_ref())))
    };
    let fut = std::panic::catch_unwind(AssertUnwindSafe(|| setup(ctx))).map_err(panicked)?;
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panicked(panic)))
}

/// Teardown failures are logged and never change the verdict.
async fn run_teardown<F>(teardown: &TeardownFn<F>, ctx: TeardownContext<F>) {
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| teardown(ctx))) {
        Ok(fut) => fut,
        Err(panic) => {
            tracing::error!(panic = %panic_message(panic.as_ref()), "teardown panicked");
            return;
        }
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => tracing::info!("teardown complete"),
        Ok(Err(err)) => tracing::error!(error = %err, "teardown failed"),
        Err(panic) => tracing::error!(panic = %panic_message(panic.as_ref()), "teardown panicked"),
    }
}
