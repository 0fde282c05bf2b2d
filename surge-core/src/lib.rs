mod abort;
mod builtin_metrics;
mod check;
mod config;
mod env;
mod error;
mod iteration;
mod progress;
mod run;
mod schedule;
mod scheduler;
mod state;
mod thresholds;
mod vu;

pub use abort::{AbortCause, AbortHandle};
pub use builtin_metrics::{
    BUILTIN_METRICS, CHECK_FAILURES, CHECK_PASSES, CHECKS, ITERATION_DURATION, ITERATION_FAILED,
    ITERATIONS, ITERATIONS_INTERRUPTED, VUS, VUS_MAX, builtin_kind,
};
pub use check::{Check, CheckOutcome, evaluate_checks};
pub use config::{
    BoxFuture, DEFAULT_CONTROL_TICK, MetricDecl, RunConfig, RunConfigBuilder, RunOptions,
    ScenarioFn, SetupFn, Stage, TeardownFn,
};
pub use env::{Env, EnvVars};
pub use error::{Error, IterationError, Result, SetupError, TeardownError};
pub use iteration::IterationResult;
pub use progress::{ProgressFn, ProgressUpdate};
pub use run::{RunResult, run};
pub use schedule::{RampingSchedule, StageSnapshot};
pub use state::{RunPhase, RunState, Verdict};
pub use thresholds::{
    ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdResult, ThresholdSet, Thresholds,
    parse_threshold_expr,
};
pub use vu::{SetupContext, TeardownContext, VuContext};

pub use surge_metrics::{MetricKind, Registry, Snapshot};
