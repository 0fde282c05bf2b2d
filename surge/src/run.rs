use anyhow::Context as _;
use std::path::Path;

use surge_core::{Env, ProgressFn, RunConfig, RunConfigBuilder};

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan::{Plan, load_plan};
use crate::run_error::RunError;
use crate::scenarios::{ScenarioKind, pr_review};

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output, args.quiet);

    let (source, mut plan) = match &args.plan {
        Some(path) => (path.display().to_string(), read_plan(path).await?),
        None => (
            "built-in (pr-review)".to_string(),
            Plan::builtin().map_err(RunError::RuntimeError)?,
        ),
    };
    apply_overrides(&mut plan, &args);
    let env = merged_env(&plan, &args.env).map_err(RunError::InvalidInput)?;

    let config = match plan.scenario {
        ScenarioKind::PrReview => configure(pr_review::builder(), &plan, env, out.progress())?,
    };

    out.print_header(&source, &plan);

    let abort = config.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, aborting run");
            abort.abort();
        }
    });

    let result = surge_core::run(config).await;
    ctrl_c.abort();
    let result = result.map_err(RunError::from_core)?;

    out.print_summary(&result)
        .context("failed to print summary")
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_verdict(result.verdict))
}

/// Parses the plan and compiles its thresholds against the scenario's metrics, without
/// running setup or sending any load.
pub async fn validate(args: ValidateArgs) -> Result<ExitCode, RunError> {
    let plan = read_plan(&args.plan).await?;
    let env = merged_env(&plan, &[]).map_err(RunError::InvalidInput)?;

    let config = match plan.scenario {
        ScenarioKind::PrReview => configure(pr_review::builder(), &plan, env, None)?,
    };

    println!(
        "plan ok: scenario={} stages={} duration={}s thresholds={}",
        plan.scenario,
        config.stages().len(),
        plan.total_duration().as_secs_f64(),
        plan.thresholds.iter().map(|t| t.expressions.len()).sum::<usize>()
    );
    Ok(ExitCode::Success)
}

async fn read_plan(path: &Path) -> Result<Plan, RunError> {
    load_plan(path).await.map_err(RunError::InvalidInput)
}

fn configure<F: Send + Sync + 'static>(
    builder: RunConfigBuilder<F>,
    plan: &Plan,
    env: Env,
    progress: Option<ProgressFn>,
) -> Result<RunConfig<F>, RunError> {
    let mut builder = builder
        .start_vus(plan.start_vus)
        .stages(plan.stages.iter().cloned())
        .thresholds(plan.thresholds.iter().cloned())
        .env(env)
        .options(plan.options.clone());
    if let Some(progress) = progress {
        builder = builder.on_progress(progress);
    }
    builder.build().map_err(RunError::from_core)
}

fn apply_overrides(plan: &mut Plan, args: &RunArgs) {
    if args.abort_on_fail {
        plan.options.abort_on_fail = true;
    }
    if let Some(tick) = args.control_tick {
        plan.options.control_tick = tick;
    }
    if let Some(grace) = args.graceful_stop {
        plan.options.graceful_stop = Some(grace);
    }
}

/// Process env, then plan `env`, then `--env` overrides.
fn merged_env(plan: &Plan, overrides: &[String]) -> anyhow::Result<Env> {
    let cli = overrides
        .iter()
        .map(|raw| parse_env_override(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Env::process().with_overrides(&plan.env).with_overrides(cli))
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}
