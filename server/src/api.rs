//! HTTP routes: observer socket, producer webhook, health, static UI.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::Rejection;
use crate::state::AppState;
use crate::types::StatusUpdate;
use crate::ws;

/// Largest webhook body read; real reports are a few dozen bytes.
const MAX_BODY_BYTES: usize = 16 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let website = ServeDir::new(&state.config.website_dir);
    Router::new()
        .route("/api/socket", get(ws::socket_handler))
        .route("/api/webhook/{key}", post(status_webhook))
        // Health check for orchestrators.
        .route("/healthz", get(healthz))
        .fallback_service(website)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /api/webhook/{key} — a bot reports one shard's status.
///
/// Answers 202 once the update is queued; it is applied asynchronously.
async fn status_webhook(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(key): Path<String>,
    body: Body,
) -> Result<StatusCode, Rejection> {
    match submit(&state, peer.ip(), &key, body).await {
        Ok(update) => {
            debug!(
                %peer,
                bot = update.bot,
                shard = update.shard,
                status = update.status,
                "update queued"
            );
            Ok(StatusCode::ACCEPTED)
        }
        Err(e) => {
            warn!(%peer, code = e.status().as_u16(), "webhook rejected: {e}");
            Err(e)
        }
    }
}

async fn submit(
    state: &AppState,
    source: IpAddr,
    key: &str,
    body: Body,
) -> Result<StatusUpdate, Rejection> {
    state.validator.check_source(source)?;
    state.validator.check_key(key)?;

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| Rejection::BodyRead(e.to_string()))?;
    let update = state.validator.decode(&bytes)?;

    // Waits while the queue is full.
    state
        .updates
        .send(update)
        .await
        .map_err(|_| Rejection::QueueClosed)?;
    Ok(update)
}

/// Liveness check.
async fn healthz() -> &'static str {
    "ok"
}
