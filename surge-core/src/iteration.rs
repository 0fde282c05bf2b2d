use futures::FutureExt as _;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use surge_metrics::Registry;

use crate::builtin_metrics::BuiltinMetrics;
use crate::check::{CheckOutcome, CheckRecorder};
use crate::config::ScenarioFn;
use crate::env::Env;
use crate::error::{IterationError, panic_message};
use crate::vu::VuContext;

/// Outcome of one scenario call. Recorded into the metrics, then dropped.
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub vu_id: u64,
    pub iteration: u64,
    pub started_at: Instant,
    pub duration: Duration,
    pub error: Option<IterationError>,
    pub checks: Vec<CheckOutcome>,
}

/// Runs the scenario for one VU iteration inside an error boundary.
pub(crate) struct IterationExecutor<F> {
    scenario: ScenarioFn<F>,
    env: Env,
    fixture: Arc<F>,
    registry: Arc<Registry>,
    metrics: BuiltinMetrics,
    checks: CheckRecorder,
}

impl<F: Send + Sync + 'static> IterationExecutor<F> {
    pub fn new(
        scenario: ScenarioFn<F>,
        env: Env,
        fixture: Arc<F>,
        registry: Arc<Registry>,
        metrics: BuiltinMetrics,
    ) -> Self {
        let checks = CheckRecorder::new(registry.clone(), metrics.clone());
        Self {
            scenario,
            env,
            fixture,
            registry,
            metrics,
            checks,
        }
    }

    /// Failures and panics become `IterationResult::error`; nothing escapes this call.
    pub async fn execute(&self, vu_id: u64, iteration: u64) -> IterationResult {
        let checks = Arc::new(Mutex::new(Vec::new()));
        let ctx = VuContext {
            vu_id,
            iteration,
            env: self.env.clone(),
            fixture: self.fixture.clone(),
            metrics: self.registry.clone(),
            checks: checks.clone(),
        };

        let started_at = Instant::now();
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.scenario)(ctx))) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        let duration = started_at.elapsed();

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                tracing::debug!(vu_id, iteration, error = %err, "iteration failed");
                Some(err)
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::warn!(vu_id, iteration, panic = %msg, "iteration panicked");
                Some(IterationError::Panicked(msg))
            }
        };

        IterationResult {
            vu_id,
            iteration,
            started_at,
            duration,
            error,
            checks: std::mem::take(&mut *checks.lock()),
        }
    }

    pub fn record(&self, result: &IterationResult) {
        self.checks.record(&result.checks);
        self.metrics
            .record_iteration(result.duration, result.error.is_some());
    }
}
