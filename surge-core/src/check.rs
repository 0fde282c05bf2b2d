use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use surge_metrics::Registry;

use crate::builtin_metrics::BuiltinMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: Arc<str>,
    pub passed: bool,
}

/// A named predicate over a check subject.
pub type Check<'a, T> = (&'a str, &'a dyn Fn(&T) -> bool);

/// Evaluates every check against `subject`. A predicate that panics is a failed check.
pub fn evaluate_checks<T: ?Sized>(subject: &T, checks: &[Check<'_, T>]) -> Vec<CheckOutcome> {
    checks
        .iter()
        .map(|(name, predicate)| CheckOutcome {
            name: Arc::from(*name),
            passed: catch_unwind(AssertUnwindSafe(|| predicate(subject))).unwrap_or(false),
        })
        .collect()
}

/// Feeds check outcomes into the run's metrics.
///
/// Every outcome touches both `check_passes{check}` and `check_failures{check}` so the
/// two series exist for every check name, plus one sample of the `checks` rate.
#[derive(Debug, Clone)]
pub(crate) struct CheckRecorder {
    registry: Arc<Registry>,
    metrics: BuiltinMetrics,
}

impl CheckRecorder {
    pub fn new(registry: Arc<Registry>, metrics: BuiltinMetrics) -> Self {
        Self { registry, metrics }
    }

    pub fn record(&self, outcomes: &[CheckOutcome]) {
        for outcome in outcomes {
            let tags = self.registry.resolve_tags(&[("check", &outcome.name)]);
            let (pass, fail) = if outcome.passed { (1.0, 0.0) } else { (0.0, 1.0) };

            if let Ok(h) = self.registry.handle(self.metrics.check_passes, &tags) {
                h.add(pass);
            }
            if let Ok(h) = self.registry.handle(self.metrics.check_failures, &tags) {
                h.add(fail);
            }
            if let Ok(h) = self.registry.handle(self.metrics.checks, &tags) {
                h.add_rate(outcome.passed);
            }
        }
    }
}
