use std::sync::{Arc, Mutex};
use std::time::Duration;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;
use crate::plan::Plan;

pub(crate) struct HumanReadableOutput {
    progress: Option<Arc<HumanProgress>>,
}

impl HumanReadableOutput {
    pub(crate) fn new(show_progress: bool) -> Self {
        Self {
            progress: show_progress.then(|| Arc::new(HumanProgress::new())),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, source: &str, plan: &Plan) {
        println!("plan: {source}");
        println!(
            "scenario: {} stages={} duration={} start_vus={}",
            plan.scenario,
            plan.stages.len(),
            format_duration(plan.total_duration()),
            plan.start_vus
        );
        for (i, s) in plan.stages.iter().enumerate() {
            println!(
                "  stage {}: {} -> {} VUs",
                i + 1,
                format_duration(s.duration),
                s.target
            );
        }
        println!();
    }

    fn progress(&self) -> Option<surge_core::ProgressFn> {
        let progress = self.progress.clone()?;
        let prev: Arc<Mutex<(Duration, u64)>> = Arc::new(Mutex::new((Duration::ZERO, 0)));

        Some(Arc::new(move |u: surge_core::ProgressUpdate| {
            let iters_per_sec = {
                let mut prev = prev.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let (prev_elapsed, prev_iters) = *prev;
                *prev = (u.elapsed, u.iterations);
                let dt = u.elapsed.saturating_sub(prev_elapsed).as_secs_f64().max(1e-9);
                (u.iterations.saturating_sub(prev_iters) as f64) / dt
            };

            let mut message = String::new();
            if let Some(stage) = &u.stage {
                message.push_str(&format!(
                    "stage={}/{} stage_remaining={} ",
                    stage.index + 1,
                    stage.count,
                    format_duration(stage.stage_remaining)
                ));
            }
            message.push_str(&format!(
                "vus={}/{} iters={} iters/s={} failed={} elapsed={}",
                u.live_vus,
                u.target_vus,
                u.iterations,
                format_rate(iters_per_sec),
                u.failed_iterations,
                format_duration(u.elapsed)
            ));

            progress.update(u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, result: &surge_core::RunResult) -> anyhow::Result<()> {
        if let Some(p) = &self.progress {
            p.finish();
        }
        print!("{}", render(result));

        if let Some(cause) = &result.abort_cause {
            eprintln!("run aborted: {cause}");
        }
        let failed: Vec<_> = result.failed_thresholds().collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for t in failed {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.metric, t.expression),
                    None => eprintln!("  {}: {} (no samples)", t.metric, t.expression),
                }
            }
        }

        Ok(())
    }
}
