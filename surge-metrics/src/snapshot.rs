use std::sync::Arc;

use crate::metrics::{MetricKind, RateCounts, SeriesValue, TrendSnapshot};

#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub metric: Arc<str>,
    pub kind: MetricKind,
    pub tags: Vec<(Arc<str>, Arc<str>)>,
    pub value: SeriesValue,
}

impl SeriesSnapshot {
    fn has_tags(&self, filter: &[(&str, &str)]) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.tags.iter().any(|(tk, tv)| &**tk == *k && &**tv == *v))
    }
}

/// Immutable view of the registry at one point in time, sorted by metric name then tags.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    series: Vec<SeriesSnapshot>,
}

impl Snapshot {
    pub(crate) fn new(mut series: Vec<SeriesSnapshot>) -> Self {
        series.sort_by(|a, b| a.metric.cmp(&b.metric).then_with(|| a.tags.cmp(&b.tags)));
        Self { series }
    }

    pub fn series(&self) -> &[SeriesSnapshot] {
        &self.series
    }

    /// Distinct metric names with their kinds, in name order.
    pub fn metrics(&self) -> Vec<(&str, MetricKind)> {
        let mut out: Vec<(&str, MetricKind)> = Vec::new();
        for s in &self.series {
            if out.last().is_none_or(|(name, _)| *name != &*s.metric) {
                out.push((&s.metric, s.kind));
            }
        }
        out
    }

    /// All series of `name` merged into one value.
    pub fn metric(&self, name: &str) -> Option<SeriesValue> {
        self.tagged(name, &[])
    }

    /// Series of `name` carrying every pair in `tags`, merged into one value.
    pub fn tagged(&self, name: &str, tags: &[(&str, &str)]) -> Option<SeriesValue> {
        let mut merged: Option<SeriesValue> = None;
        for s in self
            .series
            .iter()
            .filter(|s| &*s.metric == name && s.has_tags(tags))
        {
            match merged.as_mut() {
                Some(acc) => acc.merge(&s.value),
                None => merged = Some(s.value.clone()),
            }
        }
        merged
    }

    pub fn counter(&self, name: &str) -> f64 {
        self.tagged_counter(name, &[])
    }

    pub fn tagged_counter(&self, name: &str, tags: &[(&str, &str)]) -> f64 {
        match self.tagged(name, tags) {
            Some(SeriesValue::Counter(v)) => v,
            _ => 0.0,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        match self.metric(name) {
            Some(SeriesValue::Gauge(v)) => Some(v),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> RateCounts {
        match self.metric(name) {
            Some(SeriesValue::Rate(r)) => r,
            _ => RateCounts::default(),
        }
    }

    pub fn trend(&self, name: &str) -> Option<TrendSnapshot> {
        match self.metric(name) {
            Some(SeriesValue::Trend(t)) => Some(t),
            _ => None,
        }
    }
}
