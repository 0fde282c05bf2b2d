//! Reviewer-assignment service workload: one shared team, a new PR per iteration, then a
//! read of the reviewer's queue.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use surge_core::{
    IterationError, MetricKind, Registry, RunConfig, RunConfigBuilder, SetupContext, SetupError,
    TeardownContext, TeardownError, VuContext,
};
use surge_http::{HttpClient, HttpRequest, HttpResponse, join_url};

pub(crate) const HTTP_REQS: &str = "http_reqs";
pub(crate) const HTTP_REQ_DURATION: &str = "http_req_duration";
pub(crate) const HTTP_REQ_FAILED: &str = "http_req_failed";

pub(crate) const DEFAULT_BASE_URL: &str = "http://localhost:8080";

const PATH_TEAM_ADD: &str = "/team/add";
const PATH_PR_CREATE: &str = "/pullRequest/create";
const PATH_USER_REVIEWS: &str = "/users/getReview";

const AUTHOR_ID: &str = "test-author";
const REVIEWER_ID: &str = "test-rev-1";

const THINK_TIME: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared by every VU once setup has created the team.
#[derive(Debug)]
pub(crate) struct Fixture {
    client: HttpClient,
    base_url: String,
    team_name: String,
}

pub(crate) fn builder() -> RunConfigBuilder<Fixture> {
    RunConfig::builder_with_setup(setup)
        .metric(HTTP_REQS, MetricKind::Counter)
        .metric(HTTP_REQ_DURATION, MetricKind::Trend)
        .metric(HTTP_REQ_FAILED, MetricKind::Rate)
        .scenario(iteration)
        .teardown(teardown)
}

async fn setup(ctx: SetupContext) -> Result<Fixture, SetupError> {
    let base_url = ctx.env.get_or("BASE_URL", DEFAULT_BASE_URL).to_string();
    let run_id = ctx
        .env
        .get("RUN_ID")
        .map_or_else(|| unix_millis().to_string(), str::to_string);
    let team_name = format!("surge-test-team-{run_id}");
    tracing::info!(%base_url, %team_name, "creating test team");

    let payload = json!({
        "team_name": team_name,
        "members": [
            { "user_id": AUTHOR_ID, "username": "TestAuthor", "is_active": true },
            { "user_id": REVIEWER_ID, "username": "TestRev1", "is_active": true },
            { "user_id": "test-rev-2", "username": "TestRev2", "is_active": true },
        ],
    });
    let client = HttpClient::default();
    let req = HttpRequest::post_json(join_url(&base_url, PATH_TEAM_ADD), &payload)
        .map_err(SetupError::new)?
        .timeout(REQUEST_TIMEOUT);
    let res = send(&client, &ctx.metrics, PATH_TEAM_ADD, req)
        .await
        .map_err(|err| SetupError::new(format!("team creation request failed: {err}")))?;
    tracing::info!(status = res.status, "team creation result");

    let team_exists = res.status == 400
        && res
            .json_path("error.code")
            .is_some_and(|code| code == "TEAM_EXISTS");
    if res.status != 201 && !team_exists {
        return Err(SetupError::new(format!(
            "failed to create test team, status={}",
            res.status
        )));
    }

    Ok(Fixture {
        client,
        base_url,
        team_name,
    })
}

/// A transport failure counts as a failed check and the iteration still pauses for
/// the think time. The first such error is returned after the pause.
async fn iteration(ctx: VuContext<Fixture>) -> Result<(), IterationError> {
    let fx = ctx.fixture();
    let pr_id = format!("PR-{}-{}-{}", ctx.vu_id(), ctx.iteration(), unix_millis());
    let mut transport_error = None;

    let payload = json!({
        "pull_request_id": pr_id,
        "pull_request_name": format!("Load Test PR {}-{}", ctx.vu_id(), ctx.iteration()),
        "author_id": AUTHOR_ID,
    });
    let req = HttpRequest::post_json(join_url(&fx.base_url, PATH_PR_CREATE), &payload)
        .map_err(IterationError::failed)?
        .timeout(REQUEST_TIMEOUT);
    let created = send(&fx.client, ctx.metrics(), PATH_PR_CREATE, req).await;
    let created = or_status_zero(created, &mut transport_error);
    ctx.check(
        &created,
        &[("PR created", &|r: &HttpResponse| r.status == 201)],
    );

    let url = join_url(
        &fx.base_url,
        &format!("{PATH_USER_REVIEWS}?user_id={REVIEWER_ID}"),
    );
    let req = HttpRequest::get(url).timeout(REQUEST_TIMEOUT);
    let reviews = send(&fx.client, ctx.metrics(), PATH_USER_REVIEWS, req).await;
    let reviews = or_status_zero(reviews, &mut transport_error);
    ctx.check(
        &reviews,
        &[("assignments retrieved", &|r: &HttpResponse| r.status == 200)],
    );

    ctx.sleep(THINK_TIME).await;
    match transport_error {
        Some(err) => Err(IterationError::failed(err)),
        None => Ok(()),
    }
}

/// Stands in a status-0 response for a failed exchange, keeping the first error.
fn or_status_zero(
    res: surge_http::Result<HttpResponse>,
    first_error: &mut Option<surge_http::Error>,
) -> HttpResponse {
    match res {
        Ok(res) => res,
        Err(err) => {
            first_error.get_or_insert(err);
            HttpResponse {
                status: 0,
                body: Default::default(),
                headers: Vec::new(),
                elapsed: Duration::ZERO,
            }
        }
    }
}

async fn teardown(ctx: TeardownContext<Fixture>) -> Result<(), TeardownError> {
    tracing::info!(team_name = %ctx.fixture().team_name, "load test completed");
    Ok(())
}

/// Sends one request and records `http_reqs`, `http_req_duration` (ms) and
/// `http_req_failed`, tagged by endpoint name, method and status. Transport failures
/// are recorded with status `0` and an `error` tag naming the failure class.
async fn send(
    client: &HttpClient,
    registry: &Registry,
    name: &str,
    req: HttpRequest,
) -> surge_http::Result<HttpResponse> {
    let method = req.method.clone();
    let started = tokio::time::Instant::now();
    let res = client.request(req).await;

    let (status, elapsed, failed) = match &res {
        Ok(r) => (r.status, r.elapsed, !r.is_success()),
        Err(err) => {
            tracing::debug!(name, error = %err, "http request failed");
            (0, started.elapsed(), true)
        }
    };
    let status = status.to_string();
    let error_kind = res.as_ref().err().map(surge_http::Error::kind);
    let mut tags = vec![
        ("name", name),
        ("method", method.as_str()),
        ("status", status.as_str()),
    ];
    if let Some(kind) = &error_kind {
        tags.push(("error", kind.as_ref()));
    }

    let samples = [
        (HTTP_REQS, MetricKind::Counter, 1.0),
        (
            HTTP_REQ_DURATION,
            MetricKind::Trend,
            elapsed.as_secs_f64() * 1000.0,
        ),
        (HTTP_REQ_FAILED, MetricKind::Rate, if failed { 1.0 } else { 0.0 }),
    ];
    for (metric, kind, value) in samples {
        if let Err(err) = registry.record(metric, kind, value, &tags) {
            tracing::warn!(metric, error = %err, "dropping http sample");
        }
    }

    res
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
