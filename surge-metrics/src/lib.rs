pub mod error;
pub mod key;
pub mod metrics;
pub mod registry;
pub mod snapshot;
pub mod tags;

pub use error::{Error, Result};
pub use key::KeyId;
pub use metrics::{MetricHandle, MetricKind, RateCounts, SeriesValue, TrendSnapshot};
pub use registry::{DEFAULT_PRECISION, MetricId, Registry};
pub use snapshot::{SeriesSnapshot, Snapshot};
pub use tags::TagSet;
