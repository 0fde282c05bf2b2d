use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use surge_metrics::Registry;

use crate::abort::{AbortCause, AbortSignal};
use crate::builtin_metrics::BuiltinMetrics;
use crate::config::RunOptions;
use crate::error::{IterationError, Result};
use crate::iteration::IterationExecutor;
use crate::progress::{ProgressFn, ProgressUpdate};
use crate::schedule::RampingSchedule;
use crate::state::RunState;
use crate::thresholds::Thresholds;

struct LiveVu {
    id: u64,
    retire: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl LiveVu {
    fn is_retiring(&self) -> bool {
        self.retire.load(Ordering::Acquire)
    }

    fn retire(&self) {
        self.retire.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SchedulerStats {
    pub ticks: u64,
    pub interrupted: u64,
}

/// Control loop that keeps the VU pool sized to the stage target.
pub(crate) struct StageScheduler<F> {
    pub schedule: RampingSchedule,
    pub options: RunOptions,
    pub executor: Arc<IterationExecutor<F>>,
    pub registry: Arc<Registry>,
    pub metrics: BuiltinMetrics,
    pub thresholds: Arc<Thresholds>,
    pub abort: Arc<AbortSignal>,
    pub progress: Option<ProgressFn>,
}

impl<F: Send + Sync + 'static> StageScheduler<F> {
    /// Runs until the last stage elapses or the run is aborted, then drains every VU.
    pub async fn run(self, state: &mut RunState) -> Result<SchedulerStats> {
        let started = Instant::now();
        let total = self.schedule.total_duration();

        let mut interval = tokio::time::interval(self.options.control_tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut live: Vec<LiveVu> = Vec::new();
        let mut next_vu_id: u64 = 1;
        let mut stats = SchedulerStats::default();

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.abort.wait() => {}
            }
            stats.ticks += 1;
            let elapsed = started.elapsed();

            live = self.reap(live).await;

            if self.options.abort_on_fail
                && !self.abort.is_aborted()
                && elapsed >= self.options.abort_eval_delay
                && let Some(failure) = self
                    .thresholds
                    .first_failure(&self.registry.snapshot(), elapsed)
            {
                self.abort.trigger(AbortCause::Threshold {
                    metric: failure.metric,
                    expression: failure.expression,
                });
            }

            if self.abort.is_aborted() || self.schedule.is_done(elapsed) {
                break;
            }

            let target = self.schedule.target_at(elapsed);
            let active = live.iter().filter(|vu| !vu.is_retiring()).count() as u64;

            if target > active {
                for _ in active..target {
                    live.push(self.spawn_vu(next_vu_id));
                    next_vu_id += 1;
                }
                tracing::debug!(target, spawned = target - active, "ramping up");
            } else if active > target {
                let excess = (active - target) as usize;
                for vu in live
                    .iter()
                    .rev()
                    .filter(|vu| !vu.is_retiring())
                    .take(excess)
                {
                    vu.retire();
                }
                tracing::debug!(target, retired = excess, "ramping down");
            }

            state.stage = self.schedule.stage_snapshot_at(elapsed);
            state.target_vus = target;
            state.spawned_vus = next_vu_id - 1;
            state.set_live(live.len() as u64);
            self.metrics.set_live_vus(live.len() as u64);
            self.emit_progress(stats.ticks, elapsed, total, state);
        }

        for vu in &live {
            vu.retire();
        }
        tracing::info!(live = live.len(), "stages complete, draining vus");
        stats.interrupted = self.drain(live).await;

        state.target_vus = 0;
        state.set_live(0);
        self.metrics.set_live_vus(0);
        Ok(stats)
    }

    fn spawn_vu(&self, vu_id: u64) -> LiveVu {
        let retire = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(vu_loop(
            vu_id,
            self.executor.clone(),
            retire.clone(),
            self.abort.clone(),
        ));
        LiveVu {
            id: vu_id,
            retire,
            handle,
        }
    }

    /// Removes VUs whose task has ended, keeping spawn order for the rest.
    async fn reap(&self, live: Vec<LiveVu>) -> Vec<LiveVu> {
        let (finished, running): (Vec<_>, Vec<_>) =
            live.into_iter().partition(|vu| vu.handle.is_finished());
        for vu in finished {
            if let Err(err) = vu.handle.await {
                tracing::error!(vu_id = vu.id, error = %err, "vu task failed");
            }
        }
        running
    }

    /// Waits for retired VUs to finish their in-flight iteration. Returns how many had to
    /// be cancelled because `graceful_stop` ran out.
    async fn drain(&self, live: Vec<LiveVu>) -> u64 {
        let mut handles: Vec<(u64, JoinHandle<()>)> =
            live.into_iter().map(|vu| (vu.id, vu.handle)).collect();
        let mut joined = 0usize;

        let wait_all = async {
            for (vu_id, handle) in handles.iter_mut() {
                if let Err(err) = handle.await {
                    tracing::error!(vu_id = *vu_id, error = %err, "vu task failed");
                }
                joined += 1;
            }
        };

        let Some(limit) = self.options.graceful_stop else {
            wait_all.await;
            return 0;
        };
        if tokio::time::timeout(limit, wait_all).await.is_ok() {
            return 0;
        }

        let mut interrupted = 0;
        for (vu_id, handle) in handles.into_iter().skip(joined) {
            if !handle.is_finished() {
                handle.abort();
                interrupted += 1;
                tracing::warn!(vu_id, "graceful stop elapsed, interrupting iteration");
            }
            let _ = handle.await;
        }
        self.metrics.iterations_interrupted.add(interrupted as f64);
        interrupted
    }

    fn emit_progress(&self, tick: u64, elapsed: Duration, total: Duration, state: &RunState) {
        let Some(progress) = &self.progress else {
            return;
        };
        let failed = match self.metrics.iteration_failed.snapshot() {
            surge_metrics::SeriesValue::Rate(r) => r.hits,
            _ => 0,
        };
        let iterations = match self.metrics.iterations.snapshot() {
            surge_metrics::SeriesValue::Counter(v) => v as u64,
            _ => 0,
        };
        (progress)(ProgressUpdate {
            tick,
            elapsed,
            total_duration: total,
            stage: state.stage.clone(),
            target_vus: state.target_vus,
            live_vus: state.live_vus,
            iterations,
            failed_iterations: failed,
        });
    }
}

async fn vu_loop<F: Send + Sync + 'static>(
    vu_id: u64,
    executor: Arc<IterationExecutor<F>>,
    retire: Arc<AtomicBool>,
    abort: Arc<AbortSignal>,
) {
    tracing::debug!(vu_id, "vu started");
    let mut iteration: u64 = 0;
    while !retire.load(Ordering::Acquire) && !abort.is_aborted() {
        let result = executor.execute(vu_id, iteration).await;
        executor.record(&result);
        iteration += 1;

        if let Some(IterationError::Abort(reason)) = result.error {
            abort.trigger(AbortCause::Signal { vu_id, reason });
        }
        // Scenarios that never await would otherwise starve the control loop.
        tokio::task::yield_now().await;
    }
    tracing::debug!(vu_id, iterations = iteration, "vu stopped");
}
