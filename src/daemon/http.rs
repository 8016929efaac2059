//! HTTP API server for the vigil daemon.
//!
//! Exposes process lifecycle operations over a local HTTP API consumed by
//! the CLI:
//!
//! - `GET    /health`                    - daemon liveness
//! - `GET    /version`                   - daemon version
//! - `GET    /processes`                 - list supervised processes
//! - `POST   /processes`                 - start a process from a descriptor
//! - `GET    /processes/{name}`          - inspect one process
//! - `DELETE /processes/{name}`          - stop a process
//! - `POST   /processes/{name}/restart`  - restart a process
//! - `GET    /processes/{name}/logs`     - tail a process log
//!
//! When `VIGIL_API_KEY` is set in the daemon's environment, every route
//! except `/health` requires a matching `X-Api-Key` header.

use axum::{
    extract::{DefaultBodyLimit, Path as AxumPath, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::constants;
use crate::daemon::config::DaemonConfig;
use crate::daemon::error::Error;
use crate::daemon::process;
use crate::daemon::state::{StateStore, Status};
use crate::daemon::supervisor::{self, SupervisorHandle};
use crate::spec::Spec;

/// Shared daemon state behind the router.
pub struct AppState {
    /// Persistent process records.
    pub store: StateStore,
    /// Live supervisor handles, keyed by process name.
    pub supervisors: RwLock<HashMap<String, SupervisorHandle>>,
    /// Optional API key required on mutating routes.
    pub api_key: Option<String>,
    /// Daemon start time, for /health uptime.
    pub started_at: Instant,
}

/// Shared application state across handlers.
pub type SharedState = Arc<AppState>;

/// Error wrapper that renders daemon errors as JSON API responses.
struct ApiError(Error);

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self.0, "API request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(Error::Internal(format!("{e:#}")))
    }
}

/// Request body for `POST /processes`.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    /// Path to the vigil.toml descriptor.
    pub spec_path: PathBuf,
    /// App name within the descriptor.
    pub name: String,
    /// Environment profile to overlay (e.g. "production").
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    name: String,
    profile: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    /// Number of trailing lines to return.
    lines: Option<usize>,
    /// Which stream to read: "out" (default) or "err".
    stream: Option<String>,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    name: String,
    file: PathBuf,
    lines: Vec<String>,
}

/// Builds the daemon router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/processes", get(list_processes).post(start_process))
        .route(
            "/processes/{name}",
            get(get_process).delete(stop_process),
        )
        .route("/processes/{name}/restart", post(restart_process))
        .route("/processes/{name}/logs", get(get_logs))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(DefaultBodyLimit::max(constants::MAX_BODY_SIZE_BYTES))
        .with_state(state)
}

/// Rejects requests without the configured API key.
///
/// `/health` stays open so liveness probes and the CLI's daemon
/// detection work without credentials.
async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    if provided == Some(expected) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "missing or invalid API key".to_string(),
            }),
        )
            .into_response()
    }
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn version() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /processes` - list all process records.
///
/// Reconciles liveness first so records for processes that died while
/// unsupervised (e.g. across a daemon restart) show up as crashed.
async fn list_processes(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let records = tokio::task::spawn_blocking(move || {
        reconcile_liveness(&store)?;
        store.list_processes()
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))??;

    Ok(Json(records))
}

/// `POST /processes` - start supervising an app from a descriptor.
async fn start_process(
    State(state): State<SharedState>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = Spec::load_from(&req.spec_path).map_err(|e| Error::Spec(format!("{e:#}")))?;

    let validation = spec.validate().map_err(|e| Error::Spec(format!("{e:#}")))?;
    for warning in &validation.warnings {
        tracing::warn!(descriptor = %req.spec_path.display(), "{warning}");
    }

    let app = spec
        .app(&req.name)
        .map_err(|e| Error::Spec(format!("{e:#}")))?
        .clone();

    // Fail fast on unknown profiles rather than erroring inside the
    // supervisor after the record is written.
    app.resolved_env(req.profile.as_deref())
        .map_err(|e| Error::InvalidRequest(format!("{e:#}")))?;

    let mut supervisors = state.supervisors.write().await;

    if let Some(handle) = supervisors.get(&app.name) {
        if !handle.is_finished() {
            return Err(Error::process_already_running(&app.name).into());
        }
    }

    // An orphan from a previous daemon run may still hold the name
    if let Some(record) = state.store.get_process_async(app.name.clone()).await? {
        if record.status == Status::Running && is_running_async(record.pid).await? {
            return Err(Error::process_already_running(&app.name).into());
        }
    }

    let name = app.name.clone();
    let handle = supervisor::spawn(
        app,
        req.spec_path.clone(),
        req.profile.clone(),
        state.store.clone(),
    );
    supervisors.insert(name.clone(), handle);

    tracing::info!(
        process = %name,
        spec = %req.spec_path.display(),
        profile = req.profile.as_deref().unwrap_or("default"),
        "Started supervision"
    );

    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            name,
            profile: req.profile,
            status: Status::Running.to_string(),
        }),
    ))
}

/// `GET /processes/{name}` - inspect a single process record.
async fn get_process(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .store
        .get_process_async(name.clone())
        .await?
        .ok_or_else(|| Error::process_not_found(&name))?;

    Ok(Json(record))
}

/// `DELETE /processes/{name}` - gracefully stop a process.
///
/// Prefers the live supervisor; falls back to signalling an unmanaged
/// orphan directly when the daemon holds no handle for it.
async fn stop_process(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.supervisors.write().await.remove(&name);

    if let Some(handle) = handle {
        if !handle.is_finished() {
            handle
                .stop()
                .await
                .map_err(|e| Error::process_stop_failed(&name, format!("{e:#}")))?;

            tracing::info!(process = %name, "Stopped process");
            return Ok(Json(serde_json::json!({ "name": name, "status": "stopped" })));
        }
    }

    let record = state
        .store
        .get_process_async(name.clone())
        .await?
        .ok_or_else(|| Error::process_not_found(&name))?;

    if record.status == Status::Running && is_running_async(record.pid).await? {
        let pid = record.pid;
        tokio::task::spawn_blocking(move || {
            process::kill_unmanaged(
                pid,
                std::time::Duration::from_millis(constants::DEFAULT_KILL_TIMEOUT_MS),
            )
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))?
        .map_err(|e| Error::process_stop_failed(&name, format!("{e:#}")))?;
    }

    state
        .store
        .set_status_async(name.clone(), Status::Stopped)
        .await?;

    tracing::info!(process = %name, "Stopped process");
    Ok(Json(serde_json::json!({ "name": name, "status": "stopped" })))
}

/// `POST /processes/{name}/restart` - restart a process.
///
/// A live supervisor restarts its child in place (not counted against
/// the restart budget). A stopped, crashed, or errored process is
/// revived from its recorded descriptor, with a fresh restart budget.
async fn restart_process(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mut supervisors = state.supervisors.write().await;

    if let Some(handle) = supervisors.get(&name) {
        if !handle.is_finished() {
            handle
                .restart()
                .await
                .map_err(|e| Error::Internal(format!("{e:#}")))?;

            return Ok(Json(
                serde_json::json!({ "name": name, "status": "restarting" }),
            ));
        }
    }

    // No live supervisor: revive from the recorded descriptor
    let record = state
        .store
        .get_process_async(name.clone())
        .await?
        .ok_or_else(|| Error::process_not_found(&name))?;

    let spec = Spec::load_from(&record.spec_path).map_err(|e| Error::Spec(format!("{e:#}")))?;
    let app = spec
        .app(&name)
        .map_err(|e| Error::Spec(format!("{e:#}")))?
        .clone();

    let handle = supervisor::spawn(
        app,
        record.spec_path.clone(),
        record.profile.clone(),
        state.store.clone(),
    );
    supervisors.insert(name.clone(), handle);

    tracing::info!(process = %name, "Revived process");
    Ok(Json(
        serde_json::json!({ "name": name, "status": "restarting" }),
    ))
}

/// `GET /processes/{name}/logs?lines=N&stream=out|err` - tail a log file.
async fn get_logs(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .store
        .get_process_async(name.clone())
        .await?
        .ok_or_else(|| Error::process_not_found(&name))?;

    let file = match query.stream.as_deref() {
        None | Some("out") => record.out_file.clone(),
        Some("err") => record.error_file.clone(),
        Some(other) => {
            return Err(
                Error::InvalidRequest(format!("unknown stream '{other}' (expected out or err)"))
                    .into(),
            );
        },
    };

    let lines = query.lines.unwrap_or(constants::DEFAULT_LOG_LINES);
    let path = file.clone();
    let lines = tokio::task::spawn_blocking(move || process::tail_log(&path, lines))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?
        .map_err(|e| Error::io(format!("reading log for '{name}'"), std::io::Error::other(format!("{e:#}"))))?;

    Ok(Json(LogsResponse {
        name: record.name,
        file,
        lines,
    }))
}

/// Marks stale Running records whose PID is gone as crashed.
///
/// Runs at daemon startup and before list responses. Records whose PID
/// is still alive are left untouched; those processes are unmanaged
/// until stopped or restarted.
pub fn reconcile_liveness(store: &StateStore) -> anyhow::Result<()> {
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

    for record in store.list_processes()? {
        if record.status != Status::Running {
            continue;
        }
        let alive = system
            .process(sysinfo::Pid::from(record.pid as usize))
            .is_some();
        if !alive {
            tracing::warn!(
                process = %record.name,
                pid = record.pid,
                "Recorded process is gone, marking crashed"
            );
            store.set_status(&record.name, Status::Crashed { exit_code: -1 })?;
        }
    }

    Ok(())
}

async fn is_running_async(pid: u32) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || process::is_running(pid))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?
        .map_err(|e| Error::Internal(format!("{e:#}")))
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Stops every live supervisor, leaving records marked stopped.
async fn stop_all_supervisors(state: &SharedState) {
    let mut supervisors = state.supervisors.write().await;
    for (name, handle) in supervisors.drain() {
        if handle.is_finished() {
            continue;
        }
        tracing::info!(process = %name, "Stopping process for daemon shutdown");
        if let Err(e) = handle.stop().await {
            tracing::warn!(process = %name, error = %e, "Failed to stop process cleanly");
        }
    }
}

/// Runs the daemon HTTP server until interrupted.
///
/// Opens the state store, reconciles records left over from a previous
/// run, writes the PID file, and serves the API on localhost. On
/// shutdown every supervised child is stopped gracefully.
pub async fn serve(config: &DaemonConfig, state_path: PathBuf) -> anyhow::Result<()> {
    use anyhow::Context;

    let store = StateStore::open(&state_path)?;

    {
        let store = store.clone();
        tokio::task::spawn_blocking(move || reconcile_liveness(&store))
            .await
            .context("Task join error")??;
    }

    let state: SharedState = Arc::new(AppState {
        store,
        supervisors: RwLock::new(HashMap::new()),
        api_key: std::env::var("VIGIL_API_KEY").ok(),
        started_at: Instant::now(),
    });

    let pid_path = crate::daemon::config::daemon_pid_path()?;
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&pid_path, std::process::id().to_string())
        .with_context(|| format!("Failed to write PID file {}", pid_path.display()))?;

    let app = router(state.clone());
    let addr = format!("127.0.0.1:{}", config.daemon.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind daemon API to {addr}"))?;

    tracing::info!(
        addr = %addr,
        auth = state.api_key.is_some(),
        "vigil daemon listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Daemon server error")?;

    stop_all_supervisors(&state).await;

    if let Err(e) = std::fs::remove_file(&pid_path) {
        tracing::debug!(error = %e, "Failed to remove PID file");
    }

    tracing::info!("vigil daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(api_key: Option<&str>) -> (TempDir, SharedState) {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::open(tmp.path().join("state.redb")).unwrap();
        let state = Arc::new(AppState {
            store,
            supervisors: RwLock::new(HashMap::new()),
            api_key: api_key.map(ToString::to_string),
            started_at: Instant::now(),
        });
        (tmp, state)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_tmp, state) = test_state(None);
        let app = router(state);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_get_unknown_process_is_404() {
        let (_tmp, state) = test_state(None);
        let app = router(state);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/processes/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_list_processes_empty() {
        let (_tmp, state) = test_state(None);
        let app = router(state);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/processes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let (_tmp, state) = test_state(Some("secret"));
        let app = router(state);

        // Without key: rejected
        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/processes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Health stays open
        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // With key: accepted
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/processes")
                    .header("x-api-key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_start_with_bad_descriptor_is_422() {
        let (tmp, state) = test_state(None);
        let app = router(state);

        let spec_path = tmp.path().join("vigil.toml");
        std::fs::write(
            &spec_path,
            r#"
[[apps]]
name = "api"
script = "server.py"
instances = 4
"#,
        )
        .unwrap();

        let body = serde_json::json!({
            "spec_path": spec_path,
            "name": "api",
        });

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/processes")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_start_with_unknown_profile_is_400() {
        let (tmp, state) = test_state(None);
        let app = router(state);

        let spec_path = tmp.path().join("vigil.toml");
        std::fs::write(
            &spec_path,
            format!(
                r#"
[[apps]]
name = "api"
script = "/bin/sh"
args = ["-c", "sleep 1"]
cwd = "{}"
"#,
                tmp.path().display()
            ),
        )
        .unwrap();

        let body = serde_json::json!({
            "spec_path": spec_path,
            "name": "api",
            "profile": "staging",
        });

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/processes")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_then_stop_roundtrip() {
        let (tmp, state) = test_state(None);
        let app = router(state.clone());

        let spec_path = tmp.path().join("vigil.toml");
        std::fs::write(
            &spec_path,
            format!(
                r#"
[[apps]]
name = "sleeper"
script = "/bin/sh"
args = ["-c", "sleep 30"]
cwd = "{dir}"
out_file = "{dir}/out.log"
merge_logs = true
"#,
                dir = tmp.path().display()
            ),
        )
        .unwrap();

        let body = serde_json::json!({
            "spec_path": spec_path,
            "name": "sleeper",
        });

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/processes")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        // Starting again while running conflicts
        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/processes")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "spec_path": spec_path,
                            "name": "sleeper",
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("DELETE")
                    .uri("/processes/sleeper")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let record = state
            .store
            .get_process_async("sleeper".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, Status::Stopped);
    }
}
