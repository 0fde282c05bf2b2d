use std::fmt;
use std::time::Duration;

use surge_metrics::{MetricKind, SeriesValue, Snapshot};

use crate::error::{Error, Result};

/// Raw threshold expressions attached to one metric, as written in the config.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}

impl ThresholdSet {
    pub fn new<S: Into<String>>(metric: impl Into<String>, expressions: impl IntoIterator<Item = S>) -> Self {
        Self {
            metric: metric.into(),
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Lte,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Gte,
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    Neq,
}

impl ThresholdOp {
    fn compare(self, observed: f64, expected: f64) -> bool {
        match self {
            ThresholdOp::Lt => observed < expected,
            ThresholdOp::Lte => observed <= expected,
            ThresholdOp::Gt => observed > expected,
            ThresholdOp::Gte => observed >= expected,
            ThresholdOp::Eq => observed == expected,
            ThresholdOp::Neq => observed != expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in `0.0..=100.0`.
    P(f64),
    Rate,
    Count,
    Value,
}

impl fmt::Display for ThresholdAgg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdAgg::Avg => f.write_str("avg"),
            ThresholdAgg::Min => f.write_str("min"),
            ThresholdAgg::Max => f.write_str("max"),
            ThresholdAgg::Med => f.write_str("med"),
            ThresholdAgg::P(p) => write!(f, "p({p})"),
            ThresholdAgg::Rate => f.write_str("rate"),
            ThresholdAgg::Count => f.write_str("count"),
            ThresholdAgg::Value => f.write_str("value"),
        }
    }
}

impl ThresholdAgg {
    pub fn applies_to(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, ThresholdAgg::Count | ThresholdAgg::Rate),
            MetricKind::Rate => matches!(self, ThresholdAgg::Rate),
            MetricKind::Gauge => matches!(self, ThresholdAgg::Value),
            MetricKind::Trend => matches!(
                self,
                ThresholdAgg::Avg
                    | ThresholdAgg::Min
                    | ThresholdAgg::Max
                    | ThresholdAgg::Med
                    | ThresholdAgg::P(_)
                    | ThresholdAgg::Count
            ),
        }
    }

    /// Observed value of this aggregation. `None` means the metric has no data for it.
    /// Counter `rate` is per second of `elapsed`.
    fn observe(self, value: &SeriesValue, elapsed: Duration) -> Option<f64> {
        match (self, value) {
            (ThresholdAgg::Count, SeriesValue::Counter(v)) => Some(*v),
            (ThresholdAgg::Rate, SeriesValue::Counter(v)) => {
                let secs = elapsed.as_secs_f64();
                Some(if secs > 0.0 { v / secs } else { 0.0 })
            }
            (ThresholdAgg::Rate, SeriesValue::Rate(r)) => Some(r.rate().unwrap_or(0.0)),
            (ThresholdAgg::Value, SeriesValue::Gauge(v)) => Some(*v),
            (ThresholdAgg::Count, SeriesValue::Trend(t)) => Some(t.count() as f64),
            (ThresholdAgg::Avg, SeriesValue::Trend(t)) => t.avg(),
            (ThresholdAgg::Min, SeriesValue::Trend(t)) => t.min(),
            (ThresholdAgg::Max, SeriesValue::Trend(t)) => t.max(),
            (ThresholdAgg::Med, SeriesValue::Trend(t)) => t.percentile(50.0),
            (ThresholdAgg::P(p), SeriesValue::Trend(t)) => t.percentile(p),
            _ => None,
        }
    }
}

/// Parsed `<aggregation><operator><literal>` expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.agg, self.op, self.value)
    }
}

impl ThresholdExpr {
    pub fn evaluate(&self, observed: f64) -> bool {
        self.op.compare(observed, self.value)
    }
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::Neq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| "missing comparison operator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() {
        return Err("missing aggregation".to_string());
    }
    if right.is_empty() {
        return Err("missing value".to_string());
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        "rate" => ThresholdAgg::Rate,
        "count" => ThresholdAgg::Count,
        "value" => ThresholdAgg::Value,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}`"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile `{inner}`"))?;
            if !(0.0..=100.0).contains(&p) {
                return Err(format!("percentile {p} out of range 0..=100"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value `{right}`"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value `{right}`"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

#[derive(Debug, Clone)]
struct CompiledThreshold {
    metric: String,
    source: String,
    expr: ThresholdExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
}

/// Threshold expressions parsed and checked against the run's metric kinds.
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    entries: Vec<CompiledThreshold>,
}

impl Thresholds {
    /// `kind_of` resolves a metric name to its declared kind.
    pub fn compile(
        sets: &[ThresholdSet],
        kind_of: impl Fn(&str) -> Option<MetricKind>,
    ) -> Result<Self> {
        let mut entries = Vec::new();
        for set in sets {
            let kind = kind_of(&set.metric)
                .ok_or_else(|| Error::UnknownThresholdMetric(set.metric.clone()))?;

            for raw in &set.expressions {
                let expr = parse_threshold_expr(raw).map_err(|reason| Error::InvalidThreshold {
                    metric: set.metric.clone(),
                    expression: raw.clone(),
                    reason,
                })?;
                if !expr.agg.applies_to(kind) {
                    return Err(Error::ThresholdKindMismatch {
                        metric: set.metric.clone(),
                        expression: raw.clone(),
                        kind,
                    });
                }
                entries.push(CompiledThreshold {
                    metric: set.metric.clone(),
                    source: raw.trim().to_string(),
                    expr,
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Evaluates every expression. An aggregation without data fails.
    pub fn evaluate(&self, snapshot: &Snapshot, elapsed: Duration) -> Vec<ThresholdResult> {
        self.entries
            .iter()
            .map(|entry| {
                let observed = snapshot
                    .metric(&entry.metric)
                    .and_then(|value| entry.expr.agg.observe(&value, elapsed));
                ThresholdResult {
                    metric: entry.metric.clone(),
                    expression: entry.source.clone(),
                    passed: observed.is_some_and(|v| entry.expr.evaluate(v)),
                    observed,
                }
            })
            .collect()
    }

    /// Mid-run check: first expression that is already failing. Aggregations without
    /// data are skipped rather than treated as failures.
    pub fn first_failure(&self, snapshot: &Snapshot, elapsed: Duration) -> Option<ThresholdResult> {
        self.evaluate(snapshot, elapsed)
            .into_iter()
            .find(|r| r.observed.is_some() && !r.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_metrics::Registry;

    fn kinds(name: &str) -> Option<MetricKind> {
        match name {
            "http_req_duration" => Some(MetricKind::Trend),
            "http_req_failed" => Some(MetricKind::Rate),
            "http_reqs" => Some(MetricKind::Counter),
            "vus" => Some(MetricKind::Gauge),
            _ => None,
        }
    }

    fn compile(metric: &str, expr: &str) -> Result<Thresholds> {
        Thresholds::compile(&[ThresholdSet::new(metric, [expr])], kinds)
    }

    fn latency_snapshot(samples: impl IntoIterator<Item = f64>) -> Snapshot {
        let registry = Registry::default();
        registry
            .register("http_req_duration", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));
        for s in samples {
            registry
                .record("http_req_duration", MetricKind::Trend, s, &[])
                .unwrap_or_else(|e| panic!("{e}"));
        }
        registry.snapshot()
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("  avg  <=  123  ").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::Avg);
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parse_threshold_expr_reads_every_form() {
        let cases = [
            ("p(95)<300", ThresholdAgg::P(95.0), ThresholdOp::Lt, 300.0),
            ("p(99.9)>=1.5", ThresholdAgg::P(99.9), ThresholdOp::Gte, 1.5),
            ("rate<0.01", ThresholdAgg::Rate, ThresholdOp::Lt, 0.01),
            ("count>10", ThresholdAgg::Count, ThresholdOp::Gt, 10.0),
            ("MED==5", ThresholdAgg::Med, ThresholdOp::Eq, 5.0),
            ("value!=0", ThresholdAgg::Value, ThresholdOp::Neq, 0.0),
            ("max<-1", ThresholdAgg::Max, ThresholdOp::Lt, -1.0),
        ];
        for (raw, agg, op, value) in cases {
            let expr = parse_threshold_expr(raw).unwrap_or_else(|e| panic!("{raw}: {e}"));
            assert_eq!(expr, ThresholdExpr { agg, op, value }, "{raw}");
        }
    }

    #[test]
    fn parse_threshold_expr_rejects_malformed() {
        for raw in ["", "p(95)", "<300", "p95<300", "p(101)<1", "avg<abc", "avg<", "foo>1"] {
            assert!(parse_threshold_expr(raw).is_err(), "{raw:?} should not parse");
        }
    }

    #[test]
    fn compile_rejects_unknown_metric_and_kind_mismatch() {
        assert!(matches!(
            compile("nope", "count>0"),
            Err(Error::UnknownThresholdMetric(m)) if m == "nope"
        ));
        assert!(matches!(
            compile("http_req_failed", "p(95)<300"),
            Err(Error::ThresholdKindMismatch { kind: MetricKind::Rate, .. })
        ));
        assert!(matches!(
            compile("http_req_duration", "p(95)<<300"),
            Err(Error::InvalidThreshold { .. })
        ));
        assert!(compile("http_req_duration", "p(95)<300").is_ok());
        assert!(compile("http_reqs", "rate>1").is_ok());
        assert!(compile("vus", "value<=5").is_ok());
    }

    #[test]
    fn p95_holds_when_only_the_tail_is_slow() {
        let t = compile("http_req_duration", "p(95)<300").unwrap_or_else(|e| panic!("{e}"));

        let fast = latency_snapshot(
            std::iter::repeat_n(100.0, 100).chain(std::iter::repeat_n(1000.0, 5)),
        );
        let results = t.evaluate(&fast, Duration::from_secs(1));
        assert_eq!(results.len(), 1);
        assert!(results[0].passed, "{results:?}");

        let split = latency_snapshot(
            std::iter::repeat_n(100.0, 50).chain(std::iter::repeat_n(1000.0, 50)),
        );
        let results = t.evaluate(&split, Duration::from_secs(1));
        assert!(!results[0].passed, "{results:?}");
        assert_eq!(results[0].expression, "p(95)<300");
    }

    #[test]
    fn empty_trend_fails_at_the_end_but_not_mid_run() {
        let t = compile("http_req_duration", "avg<100").unwrap_or_else(|e| panic!("{e}"));
        let empty = latency_snapshot([]);

        let results = t.evaluate(&empty, Duration::from_secs(1));
        assert!(!results[0].passed);
        assert_eq!(results[0].observed, None);
        assert!(t.first_failure(&empty, Duration::from_secs(1)).is_none());

        let slow = latency_snapshot([250.0]);
        let failure = t
            .first_failure(&slow, Duration::from_secs(1))
            .unwrap_or_else(|| panic!("expected failure"));
        assert_eq!(failure.observed, Some(250.0));
    }

    #[test]
    fn counter_rate_is_per_second() {
        let registry = Registry::default();
        registry
            .record("http_reqs", MetricKind::Counter, 50.0, &[])
            .unwrap_or_else(|e| panic!("{e}"));
        let t = Thresholds::compile(&[ThresholdSet::new("http_reqs", ["rate>=10", "count==50"])], kinds)
            .unwrap_or_else(|e| panic!("{e}"));

        let results = t.evaluate(&registry.snapshot(), Duration::from_secs(5));
        assert!(results.iter().all(|r| r.passed), "{results:?}");
        assert_eq!(results[0].observed, Some(10.0));
    }
}
