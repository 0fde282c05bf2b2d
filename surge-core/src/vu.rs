use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use surge_metrics::Registry;

use crate::check::{Check, CheckOutcome, evaluate_checks};
use crate::env::Env;

/// Everything one iteration of the scenario can see.
///
/// The fixture is shared read-only across all VUs. Check outcomes are buffered here and
/// flushed into the metrics once the iteration completes.
pub struct VuContext<F> {
    pub(crate) vu_id: u64,
    pub(crate) iteration: u64,
    pub(crate) env: Env,
    pub(crate) fixture: Arc<F>,
    pub(crate) metrics: Arc<Registry>,
    pub(crate) checks: Arc<Mutex<Vec<CheckOutcome>>>,
}

impl<F> Clone for VuContext<F> {
    fn clone(&self) -> Self {
        Self {
            vu_id: self.vu_id,
            iteration: self.iteration,
            env: self.env.clone(),
            fixture: self.fixture.clone(),
            metrics: self.metrics.clone(),
            checks: self.checks.clone(),
        }
    }
}

impl<F> VuContext<F> {
    /// 1-based id, unique within the run.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// 0-based iteration index of this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn fixture(&self) -> &F {
        &self.fixture
    }

    pub fn metrics(&self) -> &Arc<Registry> {
        &self.metrics
    }

    /// Runs every named predicate against `subject` and returns whether all passed.
    /// The result never changes control flow unless the caller chooses to.
    pub fn check<T: ?Sized>(&self, subject: &T, checks: &[Check<'_, T>]) -> bool {
        let outcomes = evaluate_checks(subject, checks);
        let all_passed = outcomes.iter().all(|o| o.passed);
        self.checks.lock().extend(outcomes);
        all_passed
    }

    /// Records a sample for a metric declared on the run config.
    pub fn record(&self, metric: &str, value: f64, tags: &[(&str, &str)]) -> surge_metrics::Result<()> {
        let (id, _) = self
            .metrics
            .lookup(metric)
            .ok_or_else(|| surge_metrics::Error::UnknownMetric(metric.to_string()))?;
        self.metrics
            .handle(id, &self.metrics.resolve_tags(tags))?
            .record(value)
    }

    /// Pauses this VU only. Other VUs and the control loop keep running.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Input to the setup function.
#[derive(Debug, Clone)]
pub struct SetupContext {
    pub env: Env,
    pub metrics: Arc<Registry>,
}

/// Input to the teardown function.
pub struct TeardownContext<F> {
    pub env: Env,
    pub fixture: Arc<F>,
}

impl<F> TeardownContext<F> {
    pub fn fixture(&self) -> &F {
        &self.fixture
    }
}
