use std::collections::BTreeMap;
use std::fmt::Write as _;

use surge_core::{CHECK_FAILURES, CHECK_PASSES, RunResult, VUS, VUS_MAX};
use surge_metrics::SeriesValue;

use super::format::*;

pub(crate) fn render(result: &RunResult) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(out, "  verdict: {}", result.verdict).ok();
    writeln!(out, "  duration: {}", format_duration(result.duration)).ok();
    writeln!(
        out,
        "  iterations: {} (interrupted {})",
        result.iterations, result.interrupted
    )
    .ok();
    writeln!(out, "  peak_vus: {}", result.peak_vus).ok();
    if let Some(cause) = &result.abort_cause {
        writeln!(out, "  aborted: {cause}").ok();
    }

    render_checks(result, &mut out);
    render_metrics(result, &mut out);
    render_thresholds(result, &mut out);

    out
}

fn render_checks(result: &RunResult, out: &mut String) {
    #[derive(Default)]
    struct Counts {
        pass: f64,
        fail: f64,
    }

    let mut by_name: BTreeMap<&str, Counts> = BTreeMap::new();
    for s in result.snapshot.series() {
        let SeriesValue::Counter(v) = s.value else {
            continue;
        };
        let Some((_, name)) = s.tags.iter().find(|(k, _)| &**k == "check") else {
            continue;
        };
        let entry = by_name.entry(name).or_default();
        match &*s.metric {
            CHECK_PASSES => entry.pass += v,
            CHECK_FAILURES => entry.fail += v,
            _ => {}
        }
    }

    if by_name.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");
    for (name, c) in by_name {
        let status = if c.fail > 0.0 { "FAIL" } else { "OK" };
        writeln!(
            out,
            "    {name}: pass={} fail={} [{status}]",
            format_number(c.pass),
            format_number(c.fail)
        )
        .ok();
    }
}

fn render_metrics(result: &RunResult, out: &mut String) {
    let snapshot = &result.snapshot;
    let metrics = snapshot.metrics();
    if metrics.is_empty() {
        return;
    }

    let secs = result.duration.as_secs_f64().max(1e-9);
    out.push_str("\nmetrics\n");

    for (name, _) in metrics {
        // Rendered in the checks section, or folded into `vus`.
        if matches!(name, CHECK_PASSES | CHECK_FAILURES | VUS_MAX) {
            continue;
        }
        let Some(value) = snapshot.metric(name) else {
            continue;
        };

        if name == VUS {
            writeln!(
                out,
                "    {name} = end={} peak={}",
                format_number(snapshot.gauge(VUS).unwrap_or_default()),
                format_number(snapshot.gauge(VUS_MAX).unwrap_or_default())
            )
            .ok();
            continue;
        }

        match value {
            SeriesValue::Counter(v) => {
                writeln!(
                    out,
                    "    {name} = {} ({}/s)",
                    format_number(v),
                    format_rate(v / secs)
                )
                .ok();
            }
            SeriesValue::Gauge(v) => {
                writeln!(out, "    {name} = {}", format_number(v)).ok();
            }
            SeriesValue::Rate(r) => match r.rate() {
                Some(rate) => {
                    writeln!(
                        out,
                        "    {name} = {} ({} of {})",
                        format_percent(rate),
                        r.hits,
                        r.total
                    )
                    .ok();
                }
                None => {
                    writeln!(out, "    {name} = - (0 of 0)").ok();
                }
            },
            SeriesValue::Trend(t) => {
                writeln!(
                    out,
                    "    {name} = avg={} min={} med={} max={} p(90)={} p(95)={} (n={})",
                    format_trend_value(name, t.avg()),
                    format_trend_value(name, t.min()),
                    format_trend_value(name, t.percentile(50.0)),
                    format_trend_value(name, t.max()),
                    format_trend_value(name, t.percentile(90.0)),
                    format_trend_value(name, t.percentile(95.0)),
                    t.count()
                )
                .ok();
            }
        }
    }
}

fn render_thresholds(result: &RunResult, out: &mut String) {
    if result.thresholds.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for t in &result.thresholds {
        let status = if t.passed { "OK" } else { "FAIL" };
        let observed = t
            .observed
            .map_or_else(|| "-".to_string(), format_number);
        writeln!(
            out,
            "    {}: {} [{status}] observed={observed}",
            t.metric, t.expression
        )
        .ok();
    }
}
