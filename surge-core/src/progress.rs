use std::sync::Arc;
use std::time::Duration;

use crate::schedule::StageSnapshot;

/// Emitted once per control tick while the run is in `Running`.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based).
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub stage: Option<StageSnapshot>,
    pub target_vus: u64,
    /// VUs still running, including those finishing their last iteration.
    pub live_vus: u64,
    pub iterations: u64,
    pub failed_iterations: u64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
