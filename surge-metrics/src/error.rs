use crate::metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("percentile sketch precision must be in 1..=5 significant figures, got {0}")]
    InvalidPrecision(u8),

    #[error("metric `{name}` is registered as {registered}, cannot use it as {requested}")]
    KindMismatch {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("invalid {kind} sample: {value}")]
    InvalidSample { kind: MetricKind, value: f64 },

    #[error("failed to create histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("failed to record trend sample: {0}")]
    Record(#[from] hdrhistogram::RecordError),
}
