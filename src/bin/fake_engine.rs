//! FakeEngine (§6 "FakeEngine (provided, for tests)") — an in-process HTTP
//! server bound to a Unix-domain socket implementing the subset of the
//! Docker Engine API the rest of this crate consumes, driven from YAML
//! fixtures. `DockerClient::connect(DockerEndpoint::Unix(path))` talks to
//! this binary exactly as it would to a real daemon; nothing downstream
//! knows the difference.
//!
//! Fixtures live under a directory: a root-level `mock.yaml` for standalone
//! networks/containers/external stacks/dangling images, one `<stack>/mock.yaml`
//! per managed stack, and a `log-templates.yaml` for synthesized log lines.

use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{body::Body, Json, Router};
use clap::Parser;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tower::Service;
use tracing::{error, info, warn};

mod fixtures;
mod state;

use state::EngineState;

#[derive(Parser, Debug)]
#[command(name = "dockru-fake-engine")]
struct Args {
    /// Unix socket to listen on (created fresh on startup).
    #[arg(long, env = "DOCKRU_FAKE_SOCKET", default_value = "/tmp/dockru-fake-engine.sock")]
    socket: PathBuf,

    /// Directory holding `mock.yaml` (root), `<stack>/mock.yaml`, and
    /// `log-templates.yaml`.
    #[arg(long, env = "DOCKRU_FAKE_FIXTURES")]
    fixtures: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let state = Arc::new(Mutex::new(EngineState::load(&args.fixtures)?));

    if args.socket.exists() {
        std::fs::remove_file(&args.socket)?;
    }
    let listener = tokio::net::UnixListener::bind(&args.socket)?;
    info!("FakeEngine listening on {}", args.socket.display());

    let app = build_router(state);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let service = app.clone();

        tokio::spawn(async move {
            let hyper_service = hyper::service::service_fn(move |request: Request<hyper::body::Incoming>| {
                service.clone().call(request)
            });
            if let Err(err) = AutoBuilder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection_with_upgrades(io, hyper_service)
                .await
            {
                warn!("FakeEngine connection error: {}", err);
            }
        });
    }
}

fn build_router(state: Arc<Mutex<EngineState>>) -> Router {
    Router::new()
        .route("/_ping", get(ping))
        .route("/containers/json", get(list_containers))
        .route("/containers/*rest", get(container_dispatch))
        .route("/images/json", get(list_images))
        .route("/images/prune", post(prune_images))
        .route("/images/*rest", get(image_dispatch))
        .route("/distribution/*rest", get(registry_descriptor))
        .route("/networks", get(list_networks))
        .route("/networks/:id", get(inspect_network))
        .route("/volumes", get(list_volumes))
        .route("/volumes/:name", get(inspect_volume))
        .route("/events", get(stream_events))
        .route("/_mock/state/:stack", post(mock_set_stack_status))
        .route("/_mock/state/:stack", delete(mock_delete_stack))
        .route("/_mock/state/:stack/:service", post(mock_set_service_status))
        .route("/_mock/reset", post(mock_reset))
        .route("/_mock/logs/:stack/:service", get(mock_logs))
        .with_state(state)
}

async fn ping() -> &'static str {
    "OK"
}

// ---------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    filters: Option<String>,
}

async fn list_containers(
    State(state): State<Arc<Mutex<EngineState>>>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let st = state.lock().await;
    let project = query
        .filters
        .as_deref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .and_then(|v| v.get("label").cloned())
        .map(|label| parse_label_filter(&label))
        .and_then(|labels| {
            labels.into_iter().find_map(|l| {
                l.strip_prefix("com.docker.compose.project=")
                    .map(|s| s.to_string())
            })
        });

    let containers: Vec<serde_json::Value> = st
        .containers
        .iter()
        .filter(|c| project.as_deref().map(|p| c.project.as_deref() == Some(p)).unwrap_or(true))
        .map(|c| c.to_summary_json())
        .collect();

    Json(serde_json::Value::Array(containers))
}

fn parse_label_filter(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(arr) => arr
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        serde_json::Value::Object(map) => map
            .iter()
            .filter(|(_, v)| v.as_bool().unwrap_or(true))
            .map(|(k, _)| k.clone())
            .collect(),
        _ => Vec::new(),
    }
}

/// `/containers/{id}/...` routes may embed a multi-segment id (never in
/// practice for containers, but §6 calls this out for image refs — kept
/// symmetric so one dispatcher pattern covers both resources).
async fn container_dispatch(
    State(state): State<Arc<Mutex<EngineState>>>,
    Path(rest): Path<String>,
) -> Response {
    let mut parts = rest.splitn(2, '/');
    let id = parts.next().unwrap_or_default();
    let action = parts.next().unwrap_or("json");

    let st = state.lock().await;
    let Some(container) = st.find_container(id) else {
        return not_found(format!("No such container: {id}"));
    };

    match action {
        "json" => Json(container.to_inspect_json()).into_response(),
        "stats" => Json(container.to_stats_json()).into_response(),
        "top" => Json(container.to_top_json()).into_response(),
        "logs" => {
            let body = st.render_logs(container);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/vnd.docker.raw-stream")
                .body(Body::from(body))
                .unwrap()
        }
        other => not_found(format!("unhandled container action: {other}")),
    }
}

// ---------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------

async fn list_images(State(state): State<Arc<Mutex<EngineState>>>) -> Json<serde_json::Value> {
    let st = state.lock().await;
    Json(serde_json::Value::Array(
        st.images.iter().map(|i| i.to_summary_json()).collect(),
    ))
}

async fn prune_images() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ImagesDeleted": [], "SpaceReclaimed": 0 }))
}

async fn image_dispatch(
    State(state): State<Arc<Mutex<EngineState>>>,
    Path(rest): Path<String>,
) -> Response {
    let (reference, action) = split_trailing_action(&rest);

    let st = state.lock().await;
    let Some(image) = st.find_image(&reference) else {
        return not_found(format!("No such image: {reference}"));
    };

    match action.as_deref() {
        None | Some("json") => Json(image.to_inspect_json()).into_response(),
        Some("history") => Json(serde_json::Value::Array(image.to_history_json())).into_response(),
        Some(other) => not_found(format!("unhandled image action: {other}")),
    }
}

/// Splits a bollard-style `{ref}/action` path, where `ref` may itself
/// contain slashes (`ghcr.io/org/app:tag`). Only the last segment is ever
/// a recognised action (`json`, `history`); everything before it is the
/// reference, rejoined.
fn split_trailing_action(rest: &str) -> (String, Option<String>) {
    const ACTIONS: &[&str] = &["json", "history"];
    if let Some(idx) = rest.rfind('/') {
        let (head, tail) = rest.split_at(idx);
        let tail = &tail[1..];
        if ACTIONS.contains(&tail) {
            return (head.to_string(), Some(tail.to_string()));
        }
    }
    (rest.to_string(), None)
}

async fn registry_descriptor(
    State(state): State<Arc<Mutex<EngineState>>>,
    Path(rest): Path<String>,
) -> Response {
    let reference = rest.trim_end_matches("/json").to_string();
    let st = state.lock().await;
    match st.find_image(&reference) {
        Some(image) => Json(serde_json::json!({
            "Descriptor": {
                "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                "digest": image.digest.clone().unwrap_or_else(|| "sha256:unknown".to_string()),
                "size": image.size,
            }
        }))
        .into_response(),
        None => not_found(format!("no descriptor for {reference}")),
    }
}

// ---------------------------------------------------------------------
// Networks / volumes
// ---------------------------------------------------------------------

async fn list_networks(State(state): State<Arc<Mutex<EngineState>>>) -> Json<serde_json::Value> {
    let st = state.lock().await;
    Json(serde_json::Value::Array(
        st.networks.iter().map(|n| n.to_json()).collect(),
    ))
}

async fn inspect_network(
    State(state): State<Arc<Mutex<EngineState>>>,
    Path(id): Path<String>,
) -> Response {
    let st = state.lock().await;
    match st.networks.iter().find(|n| n.id == id || n.name == id) {
        Some(n) => Json(n.to_json()).into_response(),
        None => not_found(format!("network {id} not found")),
    }
}

async fn list_volumes(State(state): State<Arc<Mutex<EngineState>>>) -> Json<serde_json::Value> {
    let st = state.lock().await;
    Json(serde_json::json!({
        "Volumes": st.volumes.iter().map(|v| v.to_json()).collect::<Vec<_>>(),
        "Warnings": [],
    }))
}

async fn inspect_volume(
    State(state): State<Arc<Mutex<EngineState>>>,
    Path(name): Path<String>,
) -> Response {
    let st = state.lock().await;
    match st.volumes.iter().find(|v| v.name == name) {
        Some(v) => Json(v.to_json()).into_response(),
        None => not_found(format!("volume {name} not found")),
    }
}

// ---------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------

async fn stream_events(State(state): State<Arc<Mutex<EngineState>>>) -> Response {
    let rx = state.lock().await.events.subscribe();
    let stream = tokio_stream_from_broadcast(rx);
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Body::from_stream(stream))
        .unwrap()
}

/// Newline-delimited JSON, mirroring the real Engine's `/events` framing.
/// A lagged receiver (the admin socket fell too far behind a burst of
/// synthetic `/_mock/*` events) just skips the gap rather than erroring —
/// matching the real daemon's at-most-once event delivery.
fn tokio_stream_from_broadcast(
    rx: broadcast::Receiver<serde_json::Value>,
) -> impl futures_util::Stream<Item = Result<bytes::Bytes, std::io::Error>> {
    use tokio_stream::wrappers::BroadcastStream;
    use tokio_stream::StreamExt;

    BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => {
            let mut line = serde_json::to_vec(&event).unwrap_or_default();
            line.push(b'\n');
            Some(Ok(bytes::Bytes::from(line)))
        }
        Err(_lagged) => None,
    })
}

// ---------------------------------------------------------------------
// /_mock/* admin extension
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MockStatusBody {
    status: String,
}

async fn mock_set_stack_status(
    State(state): State<Arc<Mutex<EngineState>>>,
    Path(stack): Path<String>,
    Json(body): Json<MockStatusBody>,
) -> Json<serde_json::Value> {
    let mut st = state.lock().await;
    st.set_stack_status(&stack, &body.status);
    Json(serde_json::json!({ "ok": true }))
}

async fn mock_set_service_status(
    State(state): State<Arc<Mutex<EngineState>>>,
    Path((stack, service)): Path<(String, String)>,
    Json(body): Json<MockStatusBody>,
) -> Json<serde_json::Value> {
    let mut st = state.lock().await;
    st.set_service_status(&stack, &service, &body.status);
    Json(serde_json::json!({ "ok": true }))
}

async fn mock_delete_stack(
    State(state): State<Arc<Mutex<EngineState>>>,
    Path(stack): Path<String>,
) -> Json<serde_json::Value> {
    let mut st = state.lock().await;
    st.remove_stack(&stack);
    Json(serde_json::json!({ "ok": true }))
}

async fn mock_reset(State(state): State<Arc<Mutex<EngineState>>>) -> Json<serde_json::Value> {
    let mut st = state.lock().await;
    match st.reset() {
        Ok(()) => Json(serde_json::json!({ "ok": true })),
        Err(e) => {
            error!("mock reset failed: {}", e);
            Json(serde_json::json!({ "ok": false, "msg": e.to_string() }))
        }
    }
}

async fn mock_logs(
    State(state): State<Arc<Mutex<EngineState>>>,
    Path((stack, service)): Path<(String, String)>,
) -> Response {
    let st = state.lock().await;
    match st.containers.iter().find(|c| {
        c.project.as_deref() == Some(stack.as_str()) && c.service.as_deref() == Some(service.as_str())
    }) {
        Some(container) => {
            let body = st.render_logs(container);
            (StatusCode::OK, body).into_response()
        }
        None => not_found(format!("no log template for {stack}/{service}")),
    }
}

fn not_found(msg: String) -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "message": msg }))).into_response()
}
