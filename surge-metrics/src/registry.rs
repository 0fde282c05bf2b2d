use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind};
use crate::snapshot::{SeriesSnapshot, Snapshot};
use crate::tags::TagSet;

pub const DEFAULT_PRECISION: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: Arc<str>,
    kind: MetricKind,
}

#[derive(Debug)]
struct MetricSeries {
    kind: MetricKind,
    by_tags: DashMap<TagSet, MetricHandle>,
}

/// Concurrent store of every metric series of a run.
///
/// Writers only contend on the shard of the series they touch: the outer and inner
/// maps are sharded, counters and gauges are atomics, and rates and trends carry their
/// own mutex. Registration takes a write lock on the definition list, which happens
/// once per metric name.
#[derive(Debug)]
pub struct Registry {
    interner: Interner,
    precision: u8,
    defs: RwLock<Vec<MetricDef>>,
    by_name: DashMap<KeyId, MetricId>,
    series: DashMap<MetricId, MetricSeries>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_valid_precision(DEFAULT_PRECISION)
    }
}

impl Registry {
    /// `precision` is the number of significant figures kept by trend sketches.
    pub fn new(precision: u8) -> Result<Self> {
        if !(1..=5).contains(&precision) {
            return Err(Error::InvalidPrecision(precision));
        }
        Ok(Self::with_valid_precision(precision))
    }

    fn with_valid_precision(precision: u8) -> Self {
        Self {
            interner: Interner::new(),
            precision,
            defs: RwLock::new(Vec::new()),
            by_name: DashMap::new(),
            series: DashMap::new(),
        }
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Registers `name` or returns the existing id. Re-registering with another kind fails.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let key = self.interner.get_or_intern(name);
        if let Some(id) = self.by_name.get(&key).map(|r| *r.value()) {
            return self.ensure_kind(name, id, kind);
        }

        let mut defs = self.defs.write();
        if let Some(id) = self.by_name.get(&key).map(|r| *r.value()) {
            return self.ensure_kind(name, id, kind);
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: Arc::from(name),
            kind,
        });
        self.series.insert(
            id,
            MetricSeries {
                kind,
                by_tags: DashMap::new(),
            },
        );
        self.by_name.insert(key, id);
        Ok(id)
    }

    fn ensure_kind(&self, name: &str, id: MetricId, requested: MetricKind) -> Result<MetricId> {
        match self.kind(id) {
            Some(registered) if registered == requested => Ok(id),
            Some(registered) => Err(Error::KindMismatch {
                name: name.to_string(),
                registered,
                requested,
            }),
            None => Err(Error::UnknownMetric(name.to_string())),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let key = self.interner.get(name)?;
        let id = *self.by_name.get(&key)?.value();
        Some((id, self.kind(id)?))
    }

    pub fn kind(&self, id: MetricId) -> Option<MetricKind> {
        self.series.get(&id).map(|s| s.kind)
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(tags.iter().map(|(k, v)| {
            (
                self.interner.get_or_intern(k),
                self.interner.get_or_intern(v),
            )
        }))
    }

    /// Returns the handle of one series, creating the series on first use.
    pub fn handle(&self, metric: MetricId, tags: &TagSet) -> Result<MetricHandle> {
        let series = self
            .series
            .get(&metric)
            .ok_or_else(|| Error::UnknownMetric(format!("#{}", metric.0)))?;

        if let Some(handle) = series.by_tags.get(tags) {
            return Ok(handle.value().clone());
        }

        let kind = series.kind;
        let handle = series
            .by_tags
            .entry(tags.clone())
            .or_try_insert_with(|| MetricHandle::new(kind, self.precision))?
            .value()
            .clone();
        Ok(handle)
    }

    /// Registers the metric if needed and records one sample into the tagged series.
    pub fn record(
        &self,
        name: &str,
        kind: MetricKind,
        value: f64,
        tags: &[(&str, &str)],
    ) -> Result<()> {
        let id = self.register(name, kind)?;
        self.handle(id, &self.resolve_tags(tags))?.record(value)
    }

    /// Copies every series. Each series is read under its own lock, so a sample
    /// recorded concurrently is either fully visible or not at all.
    pub fn snapshot(&self) -> Snapshot {
        let defs = self.defs.read();
        let mut out = Vec::new();

        for entry in self.series.iter() {
            let Some(def) = defs.get(entry.key().0 as usize) else {
                continue;
            };

            for series in entry.value().by_tags.iter() {
                let tags = series
                    .key()
                    .iter()
                    .filter_map(|(k, v)| {
                        Some((self.interner.resolve(k)?, self.interner.resolve(v)?))
                    })
                    .collect();

                out.push(SeriesSnapshot {
                    metric: def.name.clone(),
                    kind: def.kind,
                    tags,
                    value: series.value().snapshot(),
                });
            }
        }

        // Registered metrics without samples still show up so thresholds can see them.
        for (idx, def) in defs.iter().enumerate() {
            let has_series = self
                .series
                .get(&MetricId(idx as u32))
                .is_some_and(|m| !m.by_tags.is_empty());
            if !has_series
                && let Ok(handle) = MetricHandle::new(def.kind, self.precision)
            {
                out.push(SeriesSnapshot {
                    metric: def.name.clone(),
                    kind: def.kind,
                    tags: Vec::new(),
                    value: handle.snapshot(),
                });
            }
        }

        Snapshot::new(out)
    }
}
