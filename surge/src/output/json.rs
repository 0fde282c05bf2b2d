use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::Arc;

use surge_core::{CHECK_FAILURES, CHECK_PASSES, ProgressUpdate, RunResult};
use surge_metrics::SeriesValue;

use super::OutputFormatter;
use crate::plan::Plan;

pub(crate) struct JsonOutput {
    pub progress: bool,
}

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _source: &str, _plan: &Plan) {}

    fn progress(&self) -> Option<surge_core::ProgressFn> {
        if !self.progress {
            return None;
        }
        Some(Arc::new(move |u: ProgressUpdate| {
            emit_json_line(&build_progress_line(&u));
        }))
    }

    fn print_summary(&self, result: &RunResult) -> anyhow::Result<()> {
        emit_json_line(&build_summary_line(result));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub stage_remaining_secs: Option<f64>,
    pub target_vus: u64,
    pub live_vus: u64,
    pub iterations: u64,
    pub failed_iterations: u64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),
        stage: u.stage.as_ref().map(|s| s.index + 1),
        stages: u.stage.as_ref().map(|s| s.count),
        stage_remaining_secs: u.stage.as_ref().map(|s| s.stage_remaining.as_secs_f64()),
        target_vus: u.target_vus,
        live_vus: u.live_vus,
        iterations: u.iterations,
        failed_iterations: u.failed_iterations,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub verdict: String,
    pub abort_cause: Option<String>,
    pub duration_secs: f64,
    pub iterations: u64,
    pub interrupted: u64,
    pub peak_vus: u64,
    pub thresholds: Vec<JsonThreshold>,
    pub checks: BTreeMap<String, JsonCheck>,
    pub metrics: BTreeMap<String, JsonMetric>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct JsonCheck {
    pub passes: f64,
    pub fails: f64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonMetric {
    Counter {
        value: f64,
    },
    Gauge {
        value: f64,
    },
    Rate {
        rate: Option<f64>,
        hits: u64,
        total: u64,
    },
    Trend {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        max: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
}

impl From<SeriesValue> for JsonMetric {
    fn from(value: SeriesValue) -> Self {
        match value {
            SeriesValue::Counter(value) => Self::Counter { value },
            SeriesValue::Gauge(value) => Self::Gauge { value },
            SeriesValue::Rate(r) => Self::Rate {
                rate: r.rate(),
                hits: r.hits,
                total: r.total,
            },
            SeriesValue::Trend(t) => Self::Trend {
                count: t.count(),
                avg: t.avg(),
                min: t.min(),
                med: t.percentile(50.0),
                max: t.max(),
                p90: t.percentile(90.0),
                p95: t.percentile(95.0),
                p99: t.percentile(99.0),
            },
        }
    }
}

fn build_summary_line(result: &RunResult) -> JsonSummaryLine {
    let snapshot = &result.snapshot;

    let metrics = snapshot
        .metrics()
        .into_iter()
        .filter_map(|(name, _)| Some((name.to_string(), snapshot.metric(name)?.into())))
        .collect();

    let mut checks: BTreeMap<String, JsonCheck> = BTreeMap::new();
    for s in snapshot.series() {
        let SeriesValue::Counter(v) = s.value else {
            continue;
        };
        let Some((_, name)) = s.tags.iter().find(|(k, _)| &**k == "check") else {
            continue;
        };
        let entry = checks.entry(name.to_string()).or_default();
        match &*s.metric {
            CHECK_PASSES => entry.passes += v,
            CHECK_FAILURES => entry.fails += v,
            _ => {}
        }
    }

    JsonSummaryLine {
        kind: "summary",
        verdict: result.verdict.to_string(),
        abort_cause: result.abort_cause.as_ref().map(ToString::to_string),
        duration_secs: result.duration.as_secs_f64(),
        iterations: result.iterations,
        interrupted: result.interrupted,
        peak_vus: result.peak_vus,
        thresholds: result
            .thresholds
            .iter()
            .map(|t| JsonThreshold {
                metric: t.metric.clone(),
                expression: t.expression.clone(),
                passed: t.passed,
                observed: t.observed,
            })
            .collect(),
        checks,
        metrics,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
