use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use surge_metrics::MetricKind;

use crate::abort::{AbortHandle, AbortSignal};
use crate::builtin_metrics::builtin_kind;
use crate::env::Env;
use crate::error::{Error, IterationError, Result, SetupError, TeardownError};
use crate::progress::ProgressFn;
use crate::thresholds::{ThresholdSet, Thresholds};
use crate::vu::{SetupContext, TeardownContext, VuContext};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub type SetupFn<F> =
    Arc<dyn Fn(SetupContext) -> BoxFuture<std::result::Result<F, SetupError>> + Send + Sync>;
pub type ScenarioFn<F> =
    Arc<dyn Fn(VuContext<F>) -> BoxFuture<std::result::Result<(), IterationError>> + Send + Sync>;
pub type TeardownFn<F> = Arc<
    dyn Fn(TeardownContext<F>) -> BoxFuture<std::result::Result<(), TeardownError>> + Send + Sync,
>;

pub const DEFAULT_CONTROL_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
    /// Restated start target. Defaults to the previous stage's target.
    pub start: Option<u64>,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self {
            duration,
            target,
            start: None,
        }
    }

    pub fn with_start(mut self, start: u64) -> Self {
        self.start = Some(start);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Evaluate thresholds at every control tick and abort on the first failure.
    pub abort_on_fail: bool,
    /// How often the scheduler re-reads the stage target and adjusts the VU pool.
    pub control_tick: Duration,
    /// Significant figures kept by trend sketches (1..=5).
    pub percentile_sketch_precision: u8,
    /// Upper bound on waiting for in-flight iterations once stages end. `None` waits
    /// for every iteration to finish.
    pub graceful_stop: Option<Duration>,
    /// Mid-run threshold checks start only after this much run time.
    pub abort_eval_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            abort_on_fail: false,
            control_tick: DEFAULT_CONTROL_TICK,
            percentile_sketch_precision: surge_metrics::DEFAULT_PRECISION,
            graceful_stop: None,
            abort_eval_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDecl {
    pub name: String,
    pub kind: MetricKind,
}

/// Immutable description of one run. Built and validated by [`RunConfigBuilder`].
pub struct RunConfig<F> {
    pub(crate) start_vus: u64,
    pub(crate) stages: Vec<Stage>,
    pub(crate) thresholds: Thresholds,
    pub(crate) metrics: Vec<MetricDecl>,
    pub(crate) env: Env,
    pub(crate) options: RunOptions,
    pub(crate) setup: SetupFn<F>,
    pub(crate) scenario: ScenarioFn<F>,
    pub(crate) teardown: Option<TeardownFn<F>>,
    pub(crate) progress: Option<ProgressFn>,
    pub(crate) abort: Arc<AbortSignal>,
}

impl<F> fmt::Debug for RunConfig<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("start_vus", &self.start_vus)
            .field("stages", &self.stages)
            .field("thresholds", &self.thresholds.len())
            .field("metrics", &self.metrics)
            .field("options", &self.options)
            .field("teardown", &self.teardown.is_some())
            .finish_non_exhaustive()
    }
}

impl<F> RunConfig<F> {
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Handle that aborts the run from outside (for example on Ctrl-C).
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.abort.clone())
    }
}

impl<F: Default + Send + Sync + 'static> RunConfig<F> {
    /// Builder whose setup yields `F::default()`.
    pub fn builder() -> RunConfigBuilder<F> {
        RunConfigBuilder::new(Arc::new(|_: SetupContext| -> BoxFuture<_> {
            Box::pin(async { Ok(F::default()) })
        }))
    }
}

impl<F: Send + Sync + 'static> RunConfig<F> {
    pub fn builder_with_setup<S, Fut>(setup: S) -> RunConfigBuilder<F>
    where
        S: Fn(SetupContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<F, SetupError>> + Send + 'static,
    {
        RunConfigBuilder::new(Arc::new(move |ctx| -> BoxFuture<_> { Box::pin(setup(ctx)) }))
    }
}

pub struct RunConfigBuilder<F> {
    start_vus: u64,
    stages: Vec<Stage>,
    thresholds: Vec<ThresholdSet>,
    metrics: Vec<MetricDecl>,
    env: Env,
    options: RunOptions,
    setup: SetupFn<F>,
    scenario: Option<ScenarioFn<F>>,
    teardown: Option<TeardownFn<F>>,
    progress: Option<ProgressFn>,
}

impl<F: Send + Sync + 'static> RunConfigBuilder<F> {
    fn new(setup: SetupFn<F>) -> Self {
        Self {
            start_vus: 0,
            stages: Vec::new(),
            thresholds: Vec::new(),
            metrics: Vec::new(),
            env: Env::default(),
            options: RunOptions::default(),
            setup,
            scenario: None,
            teardown: None,
            progress: None,
        }
    }

    pub fn start_vus(mut self, vus: u64) -> Self {
        self.start_vus = vus;
        self
    }

    pub fn stage(mut self, duration: Duration, target: u64) -> Self {
        self.stages.push(Stage::new(duration, target));
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn threshold<S: Into<String>>(
        mut self,
        metric: impl Into<String>,
        expressions: impl IntoIterator<Item = S>,
    ) -> Self {
        self.thresholds.push(ThresholdSet::new(metric, expressions));
        self
    }

    pub fn thresholds(mut self, sets: impl IntoIterator<Item = ThresholdSet>) -> Self {
        self.thresholds.extend(sets);
        self
    }

    /// Declares a custom metric the scenario records into.
    pub fn metric(mut self, name: impl Into<String>, kind: MetricKind) -> Self {
        self.metrics.push(MetricDecl {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn setup<S, Fut>(mut self, setup: S) -> Self
    where
        S: Fn(SetupContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<F, SetupError>> + Send + 'static,
    {
        self.setup = Arc::new(move |ctx| -> BoxFuture<_> { Box::pin(setup(ctx)) });
        self
    }

    pub fn scenario<S, Fut>(mut self, scenario: S) -> Self
    where
        S: Fn(VuContext<F>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), IterationError>> + Send + 'static,
    {
        self.scenario = Some(Arc::new(move |ctx| -> BoxFuture<_> {
            Box::pin(scenario(ctx))
        }));
        self
    }

    pub fn teardown<T, Fut>(mut self, teardown: T) -> Self
    where
        T: Fn(TeardownContext<F>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), TeardownError>> + Send + 'static,
    {
        self.teardown = Some(Arc::new(move |ctx| -> BoxFuture<_> {
            Box::pin(teardown(ctx))
        }));
        self
    }

    pub fn on_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validates stages, options, metric declarations and thresholds.
    pub fn build(self) -> Result<RunConfig<F>> {
        let total = self
            .stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration));
        if self.stages.is_empty() || total.is_zero() {
            return Err(Error::InvalidStages);
        }
        if self.options.control_tick.is_zero() {
            return Err(Error::InvalidControlTick);
        }
        let precision = self.options.percentile_sketch_precision;
        if !(1..=5).contains(&precision) {
            return Err(surge_metrics::Error::InvalidPrecision(precision).into());
        }
        let scenario = self.scenario.ok_or(Error::MissingScenario)?;

        let mut kinds: HashMap<&str, MetricKind> = HashMap::new();
        for decl in &self.metrics {
            let registered = builtin_kind(&decl.name).or_else(|| kinds.get(decl.name.as_str()).copied());
            if let Some(registered) = registered
                && registered != decl.kind
            {
                return Err(surge_metrics::Error::KindMismatch {
                    name: decl.name.clone(),
                    registered,
                    requested: decl.kind,
                }
                .into());
            }
            kinds.insert(decl.name.as_str(), decl.kind);
        }

        let thresholds = Thresholds::compile(&self.thresholds, |name| {
            builtin_kind(name).or_else(|| kinds.get(name).copied())
        })?;

        Ok(RunConfig {
            start_vus: self.start_vus,
            stages: self.stages,
            thresholds,
            metrics: self.metrics,
            env: self.env,
            options: self.options,
            setup: self.setup,
            scenario,
            teardown: self.teardown,
            progress: self.progress,
            abort: Arc::new(AbortSignal::default()),
        })
    }
}
