use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Trend samples are stored in the histogram as integer thousandths.
const TREND_SCALE: f64 = 1000.0;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
    Gauge,
}

#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }

    pub fn add(&self, v: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + v).to_bits())
            });
    }

    pub fn fetch_max(&self, v: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (v > f64::from_bits(bits)).then_some(v.to_bits())
            });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateCounts {
    pub hits: u64,
    pub total: u64,
}

impl RateCounts {
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 / self.total as f64)
    }

    fn merge(&mut self, other: &RateCounts) {
        self.hits = self.hits.saturating_add(other.hits);
        self.total = self.total.saturating_add(other.total);
    }
}

#[derive(Debug)]
pub struct TrendAgg {
    hist: Histogram<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl TrendAgg {
    pub fn new(precision: u8) -> Result<Self> {
        Ok(Self {
            hist: Histogram::new(precision)?,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        })
    }

    /// The sketch grows its trackable range on demand, so large samples keep their bucket.
    pub fn observe(&mut self, value: f64) -> Result<()> {
        self.hist.record((value * TREND_SCALE).round() as u64)?;
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        Ok(())
    }

    fn snapshot(&self) -> TrendSnapshot {
        TrendSnapshot {
            hist: self.hist.clone(),
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
        }
    }
}

/// Point-in-time copy of a trend. Keeps the full sketch so any percentile can be queried.
#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    hist: Histogram<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl TrendSnapshot {
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// `p` is a percentile in `0.0..=100.0`. The result is clamped to the exact
    /// observed range, so a trend of identical samples reports that sample exactly.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let q = (p / 100.0).clamp(0.0, 1.0);
        let raw = self.hist.value_at_quantile(q) as f64 / TREND_SCALE;
        Some(raw.clamp(self.min, self.max))
    }

    fn merge(&mut self, other: &TrendSnapshot) {
        if other.count == 0 {
            return;
        }
        let _ = self.hist.add(&other.hist);
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Writable view of one series. Cloning shares the underlying storage.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicF64>),
    Gauge(Arc<AtomicF64>),
    Rate(Arc<Mutex<RateCounts>>),
    Trend(Arc<Mutex<TrendAgg>>),
}

impl MetricHandle {
    pub(crate) fn new(kind: MetricKind, precision: u8) -> Result<Self> {
        Ok(match kind {
            MetricKind::Counter => MetricHandle::Counter(Arc::default()),
            MetricKind::Gauge => MetricHandle::Gauge(Arc::default()),
            MetricKind::Rate => MetricHandle::Rate(Arc::default()),
            MetricKind::Trend => MetricHandle::Trend(Arc::new(Mutex::new(TrendAgg::new(precision)?))),
        })
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricHandle::Counter(_) => MetricKind::Counter,
            MetricHandle::Gauge(_) => MetricKind::Gauge,
            MetricHandle::Rate(_) => MetricKind::Rate,
            MetricHandle::Trend(_) => MetricKind::Trend,
        }
    }

    /// Generic sample entry point.
    ///
    /// counter: adds `value`; gauge: stores `value`; rate: a non-zero value is a hit;
    /// trend: observes `value`. Counters and trends reject negative samples and every
    /// kind rejects non-finite ones.
    pub fn record(&self, value: f64) -> Result<()> {
        let kind = self.kind();
        let valid = value.is_finite()
            && (value >= 0.0 || matches!(kind, MetricKind::Gauge | MetricKind::Rate));
        if !valid {
            return Err(Error::InvalidSample { kind, value });
        }

        match self {
            MetricHandle::Counter(c) => c.add(value),
            MetricHandle::Gauge(g) => g.store(value),
            MetricHandle::Rate(_) => self.add_rate(value != 0.0),
            MetricHandle::Trend(t) => t.lock().observe(value)?,
        }
        Ok(())
    }

    #[inline]
    pub fn add(&self, value: f64) {
        if let MetricHandle::Counter(c) = self {
            c.add(value);
        }
    }

    #[inline]
    pub fn set(&self, value: f64) {
        if let MetricHandle::Gauge(g) = self {
            g.store(value);
        }
    }

    #[inline]
    pub fn set_max(&self, value: f64) {
        if let MetricHandle::Gauge(g) = self {
            g.fetch_max(value);
        }
    }

    #[inline]
    pub fn add_rate(&self, hit: bool) {
        if let MetricHandle::Rate(r) = self {
            let mut r = r.lock();
            r.total += 1;
            if hit {
                r.hits += 1;
            }
        }
    }

    /// Trend-only fast path. Other kinds and invalid samples are ignored.
    #[inline]
    pub fn observe(&self, value: f64) -> Result<()> {
        if let MetricHandle::Trend(t) = self
            && value.is_finite()
            && value >= 0.0
        {
            t.lock().observe(value)?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SeriesValue {
        match self {
            MetricHandle::Counter(c) => SeriesValue::Counter(c.load()),
            MetricHandle::Gauge(g) => SeriesValue::Gauge(g.load()),
            MetricHandle::Rate(r) => SeriesValue::Rate(*r.lock()),
            MetricHandle::Trend(t) => SeriesValue::Trend(t.lock().snapshot()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SeriesValue {
    Counter(f64),
    Gauge(f64),
    Rate(RateCounts),
    Trend(TrendSnapshot),
}

impl SeriesValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            SeriesValue::Counter(_) => MetricKind::Counter,
            SeriesValue::Gauge(_) => MetricKind::Gauge,
            SeriesValue::Rate(_) => MetricKind::Rate,
            SeriesValue::Trend(_) => MetricKind::Trend,
        }
    }

    /// Folds another series of the same metric into this one. Gauges keep the larger value.
    pub fn merge(&mut self, other: &SeriesValue) {
        match (self, other) {
            (SeriesValue::Counter(a), SeriesValue::Counter(b)) => *a += b,
            (SeriesValue::Gauge(a), SeriesValue::Gauge(b)) => *a = a.max(*b),
            (SeriesValue::Rate(a), SeriesValue::Rate(b)) => a.merge(b),
            (SeriesValue::Trend(a), SeriesValue::Trend(b)) => a.merge(b),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(samples: impl IntoIterator<Item = f64>) -> TrendSnapshot {
        let mut agg = TrendAgg::new(3).unwrap_or_else(|e| panic!("{e}"));
        for s in samples {
            agg.observe(s).unwrap_or_else(|e| panic!("{e}"));
        }
        agg.snapshot()
    }

    #[test]
    fn empty_trend_has_no_stats() {
        let t = trend([]);
        assert_eq!(t.count(), 0);
        assert!(t.avg().is_none());
        assert!(t.min().is_none());
        assert!(t.max().is_none());
        assert!(t.percentile(95.0).is_none());
    }

    #[test]
    fn p95_reflects_the_tail() {
        let mostly_fast = trend(
            std::iter::repeat_n(100.0, 100).chain(std::iter::repeat_n(1000.0, 5)),
        );
        let p95 = mostly_fast.percentile(95.0).unwrap_or_else(|| panic!("p95"));
        assert!(p95 < 300.0, "p95={p95}");

        let split = trend(std::iter::repeat_n(100.0, 50).chain(std::iter::repeat_n(1000.0, 50)));
        let p95 = split.percentile(95.0).unwrap_or_else(|| panic!("p95"));
        assert!(p95 >= 300.0, "p95={p95}");
    }

    #[test]
    fn samples_beyond_the_initial_range_keep_their_bucket() {
        let t = trend([5.0, 2_500.0, 30_000.0, 60_000.0]);
        let p50 = t.percentile(50.0).unwrap_or_else(|| panic!("p50"));
        assert!((2_490.0..=2_510.0).contains(&p50), "p50={p50}");
        let p75 = t.percentile(75.0).unwrap_or_else(|| panic!("p75"));
        assert!((29_900.0..=30_100.0).contains(&p75), "p75={p75}");
        assert_eq!(t.percentile(100.0), Some(60_000.0));
    }

    #[test]
    fn handle_observe_feeds_the_percentiles() {
        let handle = MetricHandle::new(MetricKind::Trend, 3).unwrap_or_else(|e| panic!("{e}"));
        for v in std::iter::repeat_n(100.0, 50).chain(std::iter::repeat_n(1000.0, 50)) {
            handle.observe(v).unwrap_or_else(|e| panic!("{e}"));
        }
        let SeriesValue::Trend(t) = handle.snapshot() else {
            panic!("expected a trend");
        };
        let p95 = t.percentile(95.0).unwrap_or_else(|| panic!("p95"));
        assert!((990.0..=1_010.0).contains(&p95), "p95={p95}");
    }

    #[test]
    fn percentile_is_exact_for_uniform_samples() {
        let t = trend(std::iter::repeat_n(123.456, 10));
        assert_eq!(t.percentile(50.0), Some(123.456));
        assert_eq!(t.percentile(99.9), Some(123.456));
        assert_eq!(t.min(), Some(123.456));
        assert_eq!(t.max(), Some(123.456));
    }

    #[test]
    fn record_rejects_invalid_samples() {
        let counter = MetricHandle::new(MetricKind::Counter, 3).unwrap_or_else(|e| panic!("{e}"));
        assert!(counter.record(-1.0).is_err());
        assert!(counter.record(f64::NAN).is_err());
        assert!(counter.record(2.5).is_ok());

        let gauge = MetricHandle::new(MetricKind::Gauge, 3).unwrap_or_else(|e| panic!("{e}"));
        assert!(gauge.record(-4.0).is_ok());
        assert!(gauge.record(f64::INFINITY).is_err());
        match gauge.snapshot() {
            SeriesValue::Gauge(v) => assert_eq!(v, -4.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rate_counts_hits_and_total() {
        let rate = MetricHandle::new(MetricKind::Rate, 3).unwrap_or_else(|e| panic!("{e}"));
        rate.add_rate(true);
        rate.add_rate(false);
        let _ = rate.record(1.0);
        let _ = rate.record(0.0);
        match rate.snapshot() {
            SeriesValue::Rate(r) => {
                assert_eq!(r, RateCounts { hits: 2, total: 4 });
                assert_eq!(r.rate(), Some(0.5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn merge_combines_series() {
        let mut a = SeriesValue::Trend(trend([1.0, 2.0]));
        a.merge(&SeriesValue::Trend(trend([10.0])));
        let SeriesValue::Trend(t) = a else {
            panic!("expected trend");
        };
        assert_eq!(t.count(), 3);
        assert_eq!(t.min(), Some(1.0));
        assert_eq!(t.max(), Some(10.0));
        assert_eq!(t.avg(), Some(13.0 / 3.0));

        let mut g = SeriesValue::Gauge(3.0);
        g.merge(&SeriesValue::Gauge(7.0));
        assert!(matches!(g, SeriesValue::Gauge(v) if v == 7.0));
    }

    #[test]
    fn gauge_set_max_only_grows() {
        let g = MetricHandle::new(MetricKind::Gauge, 3).unwrap_or_else(|e| panic!("{e}"));
        g.set_max(5.0);
        g.set_max(2.0);
        assert!(matches!(g.snapshot(), SeriesValue::Gauge(v) if v == 5.0));
    }
}
