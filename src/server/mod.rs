//! HTTP front: every page request is answered through the worker.

mod socket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Request as HttpRequest, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::{CacheSummary, summarize};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::host::Notification;
use crate::registration::{RegistrationOutcome, SCRIPT_URL, ServiceWorkerContainer};
use crate::request::{Destination, Request, Response};
use crate::worker::WorkerScript;

/// Largest request body forwarded upstream.
const MAX_BODY: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    container: Arc<ServiceWorkerContainer>,
}

#[derive(Deserialize)]
struct SyncRequest {
    tag: Option<String>,
}

#[derive(Serialize)]
struct SyncResponse {
    delivered: bool,
}

#[derive(Serialize)]
struct PushResponse {
    shown: bool,
    notification: Option<Notification>,
}

#[derive(Serialize)]
struct WorkerStatus {
    id: u64,
    state: String,
    shell_cache: String,
    media_cache: String,
    warming: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    worker: Option<WorkerStatus>,
    clients: usize,
    caches: Vec<CacheSummary>,
}

fn error_response(status: StatusCode, e: &Error) -> HttpResponse {
    (status, format!("{e}\n")).into_response()
}

async fn api_status(State(state): State<AppState>) -> HttpResponse {
    let worker = state.container.controller();
    let caches = match summarize(
        state.container.storage().as_ref(),
        worker.as_ref().map(|w| w.cache_names()),
    )
    .await
    {
        Ok(caches) => caches,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    };

    axum::Json(StatusResponse {
        worker: worker.map(|w| WorkerStatus {
            id: w.id(),
            state: w.state().to_string(),
            shell_cache: w.cache_names().shell.clone(),
            media_cache: w.cache_names().media.clone(),
            warming: w.is_warming(),
        }),
        clients: state.container.clients().len(),
        caches,
    })
    .into_response()
}

async fn api_push(State(state): State<AppState>, body: String) -> HttpResponse {
    let data = Some(body).filter(|b| !b.trim().is_empty());
    match state.container.push(data).await {
        Ok(notification) => axum::Json(PushResponse {
            shown: notification.is_some(),
            notification,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn api_sync(State(state): State<AppState>, body: Bytes) -> HttpResponse {
    let requested = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<SyncRequest>(&body) {
            Ok(request) => request.tag,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &Error::Json(e)),
        }
    };
    let tag = requested.or_else(|| {
        state
            .container
            .controller()
            .map(|w| w.config().sync_tag.clone())
    });
    let Some(tag) = tag else {
        return axum::Json(SyncResponse { delivered: false }).into_response();
    };

    match state.container.sync(&tag).await {
        Ok(delivered) => axum::Json(SyncResponse { delivered }).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

/// Converts an incoming HTTP request into a worker request.
async fn to_worker_request(container: &ServiceWorkerContainer, request: HttpRequest) -> Result<Request> {
    let (parts, body) = request.into_parts();
    let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = container
        .origin()
        .join(target)
        .map_err(|e| Error::InvalidRequest(format!("bad target {target}: {e}")))?;
    let body = axum::body::to_bytes(body, MAX_BODY)
        .await
        .map_err(|e| Error::InvalidRequest(e.to_string()))?;
    let destination = Destination::from_headers(&parts.method, &parts.headers);

    Ok(Request {
        method: parts.method,
        url,
        headers: parts.headers,
        destination,
        body,
    })
}

fn into_http(response: Response) -> HttpResponse {
    let mut out = HttpResponse::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}

async fn proxy(State(state): State<AppState>, request: HttpRequest) -> HttpResponse {
    let request = match to_worker_request(&state.container, request).await {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let url = request.url.clone();
    match state.container.fetch(request).await {
        Ok(response) => into_http(response),
        Err(e) => {
            log::warn!("No response for {url}: {e}");
            error_response(StatusCode::BAD_GATEWAY, &e)
        }
    }
}

/// Builds the router: worker control endpoints plus a catch-all that sends
/// every other request through the controlling worker.
pub fn router(container: Arc<ServiceWorkerContainer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/_worker/socket", get(socket::upgrade))
        .route("/_worker/status", get(api_status))
        .route("/_worker/push", post(api_push))
        .route("/_worker/sync", post(api_sync))
        .fallback(proxy)
        .layer(cors)
        .with_state(AppState { container })
}

/// Serves on an already bound listener until `token` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve_on(
    listener: TcpListener,
    container: Arc<ServiceWorkerContainer>,
    token: CancellationToken,
) -> Result<()> {
    axum::serve(listener, router(container))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}

/// Binds `host:port` and serves until `token` is cancelled.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn serve(
    container: Arc<ServiceWorkerContainer>,
    host: &str,
    port: u16,
    token: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Config(format!("invalid bind address {host}:{port}: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    log::info!("Serving {} on http://{addr}", container.origin());
    serve_on(listener, container, token).await
}

/// Registers the configured worker and serves until Ctrl-C.
///
/// A failed install is logged and the server keeps running; requests then
/// go straight to the upstream until a later registration succeeds.
///
/// # Errors
///
/// Returns an error if the container cannot be built or the server cannot
/// be started.
pub async fn run_standalone(config: AppConfig) -> Result<()> {
    let container = Arc::new(ServiceWorkerContainer::from_config(&config)?);
    let script = WorkerScript::new(config.worker.clone(), config.manifest.clone());

    match container.register(SCRIPT_URL, script).await {
        Ok(RegistrationOutcome::Activated { worker, report, .. }) => log::info!(
            "Worker {} active; removed {} old cache(s)",
            worker.id(),
            report.removed.len()
        ),
        Ok(RegistrationOutcome::Unchanged(worker)) => {
            log::info!("Worker {} already active", worker.id());
        }
        Ok(RegistrationOutcome::InstallFailed {
            error,
            active: Some(worker),
        }) => {
            log::error!("Worker install failed, worker {} keeps serving: {error}", worker.id());
        }
        Ok(RegistrationOutcome::InstallFailed { error, active: None }) => {
            log::error!("Worker install failed, serving without cache: {error}");
        }
        Err(e) => log::error!("Worker activation failed: {e}"),
    }

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutting down");
            shutdown.cancel();
        }
    });

    serve(container, &config.server.host, config.server.port, token).await
}
