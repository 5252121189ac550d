use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::{
    export,
    scanner::{self, ScanCanceller, ScanOptions},
    types::{PortResult, ScanEvent, ScanRequest, ScanState, DEFAULT_TIMEOUT},
};

#[derive(Clone, Default)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // view of the current scan, fed by its event stream
}

#[derive(Debug, Default)]
struct ServerState {
    status: Status,
    results: Vec<PortResult>,
    cancel: Option<ScanCanceller>,
    /// Bumped per scan so a replaced scan's late events are ignored.
    generation: u64,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct Status {
    pub state: ScanState,
    pub target: Option<String>,
    pub address: Option<String>,
    pub scanned: u32,
    pub total: u32,
    pub percent: u8,
    pub current_port: Option<u16>,
    pub open: u32,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiScanRequest {
    pub target: String,
    pub start_port: u16,
    pub end_port: u16,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResultsQuery {
    #[serde(default)]
    pub q: Option<String>,
    /// `false` keeps only OPEN rows.
    #[serde(default)]
    pub all: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn api_error(code: StatusCode, msg: impl Into<String>) -> Response {
    (code, Json(ApiError { error: msg.into() })).into_response()
}

/// Build the API router with fresh state.
pub fn router() -> Router {
    router_with_state(AppState::default())
}

pub fn router_with_state(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .route("/results", get(get_results))
        .route("/results.csv", get(get_results_csv))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state);

    Router::new().nest("/api", api)
}

pub async fn spawn_server(bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    log::info!("[server] listening: addr=http://{}", bind);
    axum::serve(listener, router()).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.status.clone()))
}

async fn get_results(
    State(app): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> impl IntoResponse {
    let rows = snapshot(&app, &query).await;
    (StatusCode::OK, Json(rows))
}

async fn get_results_csv(
    State(app): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> Response {
    let rows = snapshot(&app, &query).await;
    let mut buf = Vec::new();
    if let Err(e) = export::write_csv(&mut buf, &rows) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"scan_results.csv\"",
            ),
        ],
        buf,
    )
        .into_response()
}

async fn snapshot(app: &AppState, query: &ResultsQuery) -> Vec<PortResult> {
    let s = app.inner.read().await;
    let include_all = query.all.unwrap_or(true);
    export::filter_results(&s.results, query.q.as_deref().unwrap_or(""))
        .into_iter()
        .filter(|r| include_all || r.is_open())
        .cloned()
        .collect()
}

async fn post_cancel(State(app): State<AppState>) -> Response {
    let mut s = app.inner.write().await;
    match s.cancel.clone() {
        Some(c) if !s.status.state.is_terminal() => {
            c.cancel();
            s.status.message = Some("stop requested".into());
            (StatusCode::ACCEPTED, Json(s.status.clone())).into_response()
        }
        _ => api_error(StatusCode::CONFLICT, "no scan is running"),
    }
}

async fn post_scan(
    State(app): State<AppState>,
    payload: Result<Json<ApiScanRequest>, JsonRejection>,
) -> Response {
    // Out-of-range ports (e.g. 70000) fail here, before ScanRequest::validate.
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => return api_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TIMEOUT);
    let request = ScanRequest::new(req.target, req.start_port, req.end_port).with_timeout(timeout);
    let options = ScanOptions::with_concurrency(req.concurrency.unwrap_or(1));

    let handle = match scanner::start(request.clone(), options) {
        Ok(h) => h,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let (mut events, canceller, task) = handle.into_parts();

    let (generation, status) = {
        let mut s = app.inner.write().await;
        // A new scan replaces any running one.
        if let Some(c) = s.cancel.take() {
            c.cancel();
        }
        s.generation += 1;
        s.status = Status {
            state: ScanState::Running,
            target: Some(request.target.clone()),
            total: request.total_ports(),
            ..Status::default()
        };
        s.results.clear();
        s.cancel = Some(canceller);
        (s.generation, s.status.clone())
    };

    // Consume the event stream into the shared view.
    let app2 = app.clone();
    tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            let mut s = app2.inner.write().await;
            if s.generation != generation {
                break;
            }
            apply_event(&mut s, ev);
        }
        if let Err(e) = task.await {
            log::error!("[server] scan task failed: {e}");
        }
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}

fn apply_event(s: &mut ServerState, ev: ScanEvent) {
    match ev {
        ScanEvent::Resolved(t) => s.status.address = Some(t.address.to_string()),
        ScanEvent::Scanning(port) => s.status.current_port = Some(port),
        ScanEvent::Progress(pct) => s.status.percent = pct,
        ScanEvent::Found(r) => {
            s.status.scanned += 1;
            if r.is_open() {
                s.status.open += 1;
            }
            s.results.push(r);
        }
        ScanEvent::ResolveFailed(msg) => {
            s.status.state = ScanState::Failed;
            s.status.message = Some(msg);
        }
        ScanEvent::Completed => {
            s.status.state = ScanState::Done;
            s.status.current_port = None;
            s.status.message = Some("scan completed".into());
        }
        ScanEvent::Stopped => {
            s.status.state = ScanState::Stopped;
            s.status.current_port = None;
            s.status.message = Some("scan stopped by user".into());
        }
    }
}
