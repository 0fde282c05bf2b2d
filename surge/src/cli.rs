use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 1s, 250ms, 1m)".to_string());
    }
    let d = humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}': {e} (expected e.g. 1s, 250ms, 1m)"))?;
    if d.is_zero() {
        return Err(format!("duration '{s}' must be greater than zero"));
    }
    Ok(d)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar on stderr and a text summary on stdout.
    HumanReadable,
    /// NDJSON progress lines and a final summary line on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "surge",
    author,
    version,
    about = "Stage-driven HTTP load generator with pass/fail thresholds",
    long_about = "surge ramps a pool of virtual users (VUs) through a list of stages, runs a scenario in each VU, and judges the run against threshold expressions such as `p(95)<300`.\n\nA run plan is a YAML file naming the scenario, its stages, thresholds and options. Without a plan, the built-in `pr-review` plan is used.\n\nEnvironment variables from the current process are visible to the scenario; plan `env` entries override them and `--env KEY=VALUE` overrides both.",
    after_help = "Examples:\n  surge run\n  surge run plans/pr-review.yaml --env BASE_URL=http://localhost:8080\n  surge run plans/pr-review.yaml --output json --abort-on-fail\n  surge validate plans/pr-review.yaml\n\nExit codes: 0 pass, 11 thresholds failed, 20 aborted, 30 invalid input, 40 runtime error."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a run plan
    Run(RunArgs),

    /// Parse a run plan and compile its thresholds without sending any load
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the run plan (.yaml). Defaults to the built-in pr-review plan.
    pub plan: Option<PathBuf>,

    /// Add/override env vars visible to the scenario (repeatable, KEY=VALUE).
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Abort as soon as any threshold fails (overrides the plan)
    #[arg(long)]
    pub abort_on_fail: bool,

    /// How often the VU pool is resized and thresholds are checked (e.g. 1s, 250ms)
    #[arg(long, value_parser = parse_duration)]
    pub control_tick: Option<Duration>,

    /// Upper bound on waiting for in-flight iterations after the last stage
    #[arg(long, value_parser = parse_duration)]
    pub graceful_stop: Option<Duration>,

    /// Suppress progress output
    #[arg(long, short)]
    pub quiet: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the run plan (.yaml)
    pub plan: PathBuf,
}
