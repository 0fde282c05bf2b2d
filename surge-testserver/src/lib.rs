//! In-memory stand-in for the PR reviewer-assignment service, used as a load target in tests.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, extract::rejection::JsonRejection};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const PATH_TEAM_ADD: &str = "/team/add";
pub const PATH_PR_CREATE: &str = "/pullRequest/create";
pub const PATH_USER_REVIEWS: &str = "/users/getReview";

const MAX_REVIEWERS: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    teams_created: Arc<AtomicU64>,
    prs_created: Arc<AtomicU64>,
}

impl TestServerStats {
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn teams_created(&self) -> u64 {
        self.teams_created.load(Ordering::Relaxed)
    }

    pub fn prs_created(&self) -> u64 {
        self.prs_created.load(Ordering::Relaxed)
    }
}

/// Knobs for making the target misbehave on purpose.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Added to every response.
    pub latency: Duration,
    /// Every Nth PR creation answers 500. `0` disables.
    pub fail_every_nth_pr: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Member {
    user_id: String,
    username: String,
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct TeamPayload {
    team_name: String,
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct CreatePrPayload {
    #[serde(default)]
    pull_request_id: String,
    #[serde(default)]
    pull_request_name: String,
    #[serde(default)]
    author_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct PullRequest {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
    status: &'static str,
    assigned_reviewers: Vec<String>,
}

#[derive(Debug, Default)]
struct Store {
    teams: BTreeMap<String, Vec<Member>>,
    /// user_id -> team name
    users: HashMap<String, String>,
    prs: BTreeMap<String, PullRequest>,
}

#[derive(Debug, Clone, Default)]
struct AppState {
    store: Arc<Mutex<Store>>,
    stats: TestServerStats,
    faults: Faults,
    pr_attempts: Arc<AtomicU64>,
}

impl AppState {
    async fn enter(&self) {
        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);
        if !self.faults.latency.is_zero() {
            tokio::time::sleep(self.faults.latency).await;
        }
    }
}

fn error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": code, "message": message } })),
    )
        .into_response()
}

async fn handle_team_add(
    State(state): State<AppState>,
    payload: Result<Json<TeamPayload>, JsonRejection>,
) -> Response {
    state.enter().await;
    let Ok(Json(payload)) = payload else {
        return error(StatusCode::BAD_REQUEST, "BAD_REQUEST", "invalid team payload");
    };
    let team_name = payload.team_name.trim().to_string();
    if team_name.is_empty() {
        return error(StatusCode::BAD_REQUEST, "BAD_REQUEST", "team_name is required");
    }

    let mut store = state.store.lock();
    if store.teams.contains_key(&team_name) {
        return error(
            StatusCode::BAD_REQUEST,
            "TEAM_EXISTS",
            &format!("{team_name} already exists"),
        );
    }
    for member in &payload.members {
        store
            .users
            .insert(member.user_id.clone(), team_name.clone());
    }
    store.teams.insert(team_name.clone(), payload.members.clone());
    drop(store);

    state.stats.teams_created.fetch_add(1, Ordering::Relaxed);
    (
        StatusCode::CREATED,
        Json(json!({ "team": { "team_name": team_name, "members": payload.members } })),
    )
        .into_response()
}

async fn handle_pr_create(
    State(state): State<AppState>,
    payload: Result<Json<CreatePrPayload>, JsonRejection>,
) -> Response {
    state.enter().await;
    let Ok(Json(payload)) = payload else {
        return error(StatusCode::BAD_REQUEST, "BAD_REQUEST", "invalid payload");
    };
    if payload.pull_request_id.is_empty()
        || payload.pull_request_name.is_empty()
        || payload.author_id.is_empty()
    {
        return error(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "pull_request_id, pull_request_name and author_id are required",
        );
    }

    let attempt = state.pr_attempts.fetch_add(1, Ordering::Relaxed) + 1;
    let nth = state.faults.fail_every_nth_pr;
    if nth > 0 && attempt % nth == 0 {
        return error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "injected failure",
        );
    }

    let mut store = state.store.lock();
    let Some(team) = store.users.get(&payload.author_id).cloned() else {
        return error(StatusCode::NOT_FOUND, "NOT_FOUND", "author not found");
    };
    if store.prs.contains_key(&payload.pull_request_id) {
        return error(StatusCode::CONFLICT, "PR_EXISTS", "PR id already exists");
    }

    let assigned_reviewers: Vec<String> = store
        .teams
        .get(&team)
        .into_iter()
        .flatten()
        .filter(|m| m.is_active && m.user_id != payload.author_id)
        .take(MAX_REVIEWERS)
        .map(|m| m.user_id.clone())
        .collect();
    let pr = PullRequest {
        pull_request_id: payload.pull_request_id.clone(),
        pull_request_name: payload.pull_request_name,
        author_id: payload.author_id,
        status: "OPEN",
        assigned_reviewers,
    };
    store.prs.insert(payload.pull_request_id, pr.clone());
    drop(store);

    state.stats.prs_created.fetch_add(1, Ordering::Relaxed);
    (StatusCode::CREATED, Json(json!({ "pr": pr }))).into_response()
}

async fn handle_user_reviews(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.enter().await;
    let user_id = query
        .get("user_id")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if user_id.is_empty() {
        return error(StatusCode::BAD_REQUEST, "BAD_REQUEST", "user_id is required");
    }

    let store = state.store.lock();
    let pull_requests: Vec<_> = store
        .prs
        .values()
        .filter(|pr| pr.assigned_reviewers.iter().any(|r| *r == user_id))
        .map(|pr| {
            json!({
                "pull_request_id": pr.pull_request_id,
                "pull_request_name": pr.pull_request_name,
                "author_id": pr.author_id,
                "status": pr.status,
            })
        })
        .collect();
    drop(store);

    (
        StatusCode::OK,
        Json(json!({ "user_id": user_id, "pull_requests": pull_requests })),
    )
        .into_response()
}

pub fn router(stats: TestServerStats, faults: Faults) -> Router {
    let state = AppState {
        store: Arc::default(),
        stats,
        faults,
        pr_attempts: Arc::default(),
    };
    Router::new()
        .route(PATH_TEAM_ADD, post(handle_team_add))
        .route(PATH_PR_CREATE, post(handle_pr_create))
        .route(PATH_USER_REVIEWS, get(handle_user_reviews))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(Faults::default()).await
    }

    pub async fn start_with(faults: Faults) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone(), faults);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
