use std::fmt::Display;

use surge_metrics::MetricKind;

use crate::state::RunPhase;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`crate::run`] and [`crate::RunConfigBuilder::build`].
///
/// Everything except `Join` and `InvalidTransition` is a configuration error and is
/// reported before setup runs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`stages` must be a non-empty list of {{ duration, target }} with a non-zero total duration")]
    InvalidStages,

    #[error("`control_tick` must be a positive duration")]
    InvalidControlTick,

    #[error("a scenario function is required")]
    MissingScenario,

    #[error("invalid threshold `{expression}` for metric `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("threshold references unknown metric `{0}`")]
    UnknownThresholdMetric(String),

    #[error("threshold `{expression}` cannot be applied to {kind} metric `{metric}`")]
    ThresholdKindMismatch {
        metric: String,
        expression: String,
        kind: MetricKind,
    },

    #[error("metric configuration error: {0}")]
    Metrics(#[from] surge_metrics::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid run state transition {from} -> {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },
}

impl Error {
    pub fn is_config(&self) -> bool {
        !matches!(self, Error::Join(_) | Error::InvalidTransition { .. })
    }
}

/// Error produced by one scenario iteration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IterationError {
    /// Recorded and the VU carries on with its next iteration.
    #[error("{0}")]
    Failed(String),

    #[error("iteration panicked: {0}")]
    Panicked(String),

    /// Stops the whole run.
    #[error("abort requested: {0}")]
    Abort(String),
}

impl IterationError {
    pub fn failed(err: impl Display) -> Self {
        Self::Failed(err.to_string())
    }

    pub fn abort(reason: impl Display) -> Self {
        Self::Abort(reason.to_string())
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SetupError(String);

impl SetupError {
    pub fn new(err: impl Display) -> Self {
        Self(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TeardownError(String);

impl TeardownError {
    pub fn new(err: impl Display) -> Self {
        Self(err.to_string())
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
