use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use surge_testserver::{Faults, TestServer};

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn write_plan(dir: &Path, name: &str, body: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

async fn surge(args: Vec<String>, base_url: Option<String>) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_surge");
    tokio::task::spawn_blocking(move || {
        let mut cmd = Command::new(exe);
        cmd.args(&args).env("RUST_LOG", "warn");
        if let Some(url) = base_url {
            cmd.env("BASE_URL", url);
        }
        cmd.output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run surge binary")
}

fn ensure_code(out: &Output, expected: i32) -> anyhow::Result<()> {
    anyhow::ensure!(
        status_code(out.status) == expected,
        "expected exit code {expected}, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}

fn short_plan(thresholds: &str) -> String {
    format!(
        "scenario: pr-review\n\
         stages:\n  - {{ duration: 2s, target: 2 }}\n\
         options:\n  controlTick: 250ms\n\
         thresholds:\n{thresholds}"
    )
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_surge");

    let out = Command::new(exe)
        .arg("run")
        .arg("--control-tick")
        .arg("10x")
        .output()
        .context("run surge binary")?;

    ensure_code(&out, 30)
}

#[tokio::test]
async fn missing_plan_exit_30() -> anyhow::Result<()> {
    let out = surge(
        vec!["run".into(), "./does-not-exist.yaml".into()],
        None,
    )
    .await?;
    ensure_code(&out, 30)
}

#[tokio::test]
async fn invalid_plans_exit_30_before_any_request() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;

    let plans = [
        (
            "unknown_scenario.yaml",
            "scenario: nope\nstages: [{ duration: 1s, target: 1 }]\n".to_string(),
        ),
        (
            "unknown_metric.yaml",
            short_plan("  not_a_metric: count>0\n"),
        ),
        (
            "bad_expression.yaml",
            short_plan("  http_req_duration: p(95)<<300\n"),
        ),
        (
            "wrong_kind.yaml",
            short_plan("  http_reqs: p(95)<300\n"),
        ),
        (
            "zero_duration.yaml",
            "scenario: pr-review\nstages: [{ duration: 0s, target: 1 }]\n".to_string(),
        ),
    ];

    for (name, body) in plans {
        let path = write_plan(dir.path(), name, &body)?;
        let out = surge(
            vec!["run".into(), path.display().to_string()],
            Some(server.base_url().to_string()),
        )
        .await?;
        ensure_code(&out, 30).with_context(|| name.to_string())?;
    }

    anyhow::ensure!(
        server.stats().requests_total() == 0,
        "invalid plans must not reach setup, saw {} requests",
        server.stats().requests_total()
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn passing_run_exit_0() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let plan = write_plan(
        dir.path(),
        "pass.yaml",
        &short_plan("  http_req_failed: rate<0.5\n  checks: rate>0.9\n"),
    )?;

    let out = surge(
        vec!["run".into(), plan.display().to_string(), "-q".into()],
        Some(server.base_url().to_string()),
    )
    .await?;
    ensure_code(&out, 0)?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("verdict: PASS"), "stdout:\n{stdout}");
    anyhow::ensure!(server.stats().teams_created() == 1);
    anyhow::ensure!(server.stats().prs_created() > 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn thresholds_failed_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let plan = write_plan(
        dir.path(),
        "fail.yaml",
        &short_plan("  http_req_duration: max<0\n"),
    )?;

    let out = surge(
        vec!["run".into(), plan.display().to_string(), "-q".into()],
        Some(server.base_url().to_string()),
    )
    .await?;
    ensure_code(&out, 11)?;

    let stderr = String::from_utf8_lossy(&out.stderr);
    anyhow::ensure!(stderr.contains("thresholds failed"), "stderr:\n{stderr}");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn server_errors_trip_the_failure_rate_threshold() -> anyhow::Result<()> {
    let server = TestServer::start_with(Faults {
        fail_every_nth_pr: 2,
        ..Faults::default()
    })
    .await
    .context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let plan = write_plan(
        dir.path(),
        "errors.yaml",
        &short_plan("  http_req_failed: rate<0.01\n"),
    )?;

    let out = surge(
        vec!["run".into(), plan.display().to_string(), "-q".into()],
        Some(server.base_url().to_string()),
    )
    .await?;
    ensure_code(&out, 11)?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("PR created: pass="), "stdout:\n{stdout}");
    anyhow::ensure!(stdout.contains("[FAIL]"), "stdout:\n{stdout}");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn setup_failure_exit_20() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("tempdir")?;
    let plan = write_plan(dir.path(), "plan.yaml", &short_plan("  checks: rate>0\n"))?;

    let out = surge(
        vec!["run".into(), plan.display().to_string(), "-q".into()],
        Some("http://127.0.0.1:9".to_string()),
    )
    .await?;
    ensure_code(&out, 20)?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("verdict: ABORTED"), "stdout:\n{stdout}");
    anyhow::ensure!(stdout.contains("iterations: 0"), "stdout:\n{stdout}");
    Ok(())
}

#[tokio::test]
async fn abort_on_fail_stops_early_with_exit_20() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let plan = write_plan(
        dir.path(),
        "abort.yaml",
        "scenario: pr-review\n\
         stages:\n  - { duration: 60s, target: 2 }\n\
         options:\n  controlTick: 250ms\n\
         thresholds:\n  http_req_duration: max<0\n",
    )?;

    let started = Instant::now();
    let out = surge(
        vec![
            "run".into(),
            plan.display().to_string(),
            "--abort-on-fail".into(),
            "-q".into(),
        ],
        Some(server.base_url().to_string()),
    )
    .await?;
    ensure_code(&out, 20)?;
    anyhow::ensure!(
        started.elapsed() < Duration::from_secs(30),
        "abort took {:?}",
        started.elapsed()
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn validate_exit_codes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("tempdir")?;
    let good = write_plan(dir.path(), "good.yaml", &short_plan("  checks: rate>0.9\n"))?;
    let bad = write_plan(dir.path(), "bad.yaml", &short_plan("  checks: p(95)<1\n"))?;

    let out = surge(vec!["validate".into(), good.display().to_string()], None).await?;
    ensure_code(&out, 0)?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("plan ok"), "stdout:\n{stdout}");

    let out = surge(vec!["validate".into(), bad.display().to_string()], None).await?;
    ensure_code(&out, 30)
}
