use std::time::Duration;

use surge_metrics::{MetricHandle, MetricId, MetricKind, Registry, TagSet};

pub const ITERATIONS: &str = "iterations";
/// Iteration duration in milliseconds.
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATION_FAILED: &str = "iteration_failed";
pub const ITERATIONS_INTERRUPTED: &str = "iterations_interrupted";
pub const CHECKS: &str = "checks";
pub const CHECK_PASSES: &str = "check_passes";
pub const CHECK_FAILURES: &str = "check_failures";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

/// Metrics every run registers, in declaration order.
pub const BUILTIN_METRICS: &[(&str, MetricKind)] = &[
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (ITERATION_FAILED, MetricKind::Rate),
    (ITERATIONS_INTERRUPTED, MetricKind::Counter),
    (CHECKS, MetricKind::Rate),
    (CHECK_PASSES, MetricKind::Counter),
    (CHECK_FAILURES, MetricKind::Counter),
    (VUS, MetricKind::Gauge),
    (VUS_MAX, MetricKind::Gauge),
];

pub fn builtin_kind(name: &str) -> Option<MetricKind> {
    BUILTIN_METRICS
        .iter()
        .find_map(|(n, kind)| (*n == name).then_some(*kind))
}

/// Pre-resolved handles for the untagged built-in series, plus ids for the
/// per-check series.
#[derive(Debug, Clone)]
pub(crate) struct BuiltinMetrics {
    pub iterations: MetricHandle,
    pub iteration_duration: MetricHandle,
    pub iteration_failed: MetricHandle,
    pub iterations_interrupted: MetricHandle,
    pub vus: MetricHandle,
    pub vus_max: MetricHandle,
    pub checks: MetricId,
    pub check_passes: MetricId,
    pub check_failures: MetricId,
}

impl BuiltinMetrics {
    pub fn register(registry: &Registry) -> surge_metrics::Result<Self> {
        let untagged = TagSet::default();
        let handle = |name: &str, kind: MetricKind| -> surge_metrics::Result<MetricHandle> {
            let id = registry.register(name, kind)?;
            registry.handle(id, &untagged)
        };

        Ok(Self {
            iterations: handle(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: handle(ITERATION_DURATION, MetricKind::Trend)?,
            iteration_failed: handle(ITERATION_FAILED, MetricKind::Rate)?,
            iterations_interrupted: handle(ITERATIONS_INTERRUPTED, MetricKind::Counter)?,
            vus: handle(VUS, MetricKind::Gauge)?,
            vus_max: handle(VUS_MAX, MetricKind::Gauge)?,
            checks: registry.register(CHECKS, MetricKind::Rate)?,
            check_passes: registry.register(CHECK_PASSES, MetricKind::Counter)?,
            check_failures: registry.register(CHECK_FAILURES, MetricKind::Counter)?,
        })
    }

    pub fn record_iteration(&self, duration: Duration, failed: bool) {
        self.iterations.add(1.0);
        if let Err(err) = self
            .iteration_duration
            .observe(duration.as_secs_f64() * 1000.0)
        {
            tracing::warn!(error = %err, "iteration_duration sample dropped");
        }
        self.iteration_failed.add_rate(failed);
    }

    pub fn set_live_vus(&self, live: u64) {
        self.vus.set(live as f64);
        self.vus_max.set_max(live as f64);
    }
}
