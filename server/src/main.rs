//! shardwatchd — live shard status for sharded bot fleets.
//!
//! Bots POST their shard status to `/api/webhook/{key}`; observers hold a
//! WebSocket on `/api/socket` and get a Hello snapshot, every committed
//! update, and a periodic tick. The last known state survives restarts in
//! a snapshot file.

mod api;
mod cache;
mod config;
mod demo;
mod engine;
mod error;
mod registry;
mod state;
mod store;
mod types;
mod validate;
mod ws;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present (local dev).
    let _ = dotenvy::dotenv();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("shardwatchd: configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(true)
        .init();

    info!("shardwatchd starting");
    info!(listen = %config.listen_addr, state_file = %config.state_file.display());

    // ── Shared state ────────────────────────────────────────
    // A snapshot that exists but cannot be read is fatal.
    let (state, engine) = match state::AppState::bootstrap(config.clone()) {
        Ok(parts) => parts,
        Err(e) => {
            error!("failed to load snapshot: {e}");
            return ExitCode::FAILURE;
        }
    };

    // ── Background tasks ────────────────────────────────────
    let engine = tokio::spawn(engine.run());
    if config.demo {
        demo::spawn(config.topology, state.updates.clone(), Duration::from_secs(1));
    }

    // ── Routes ──────────────────────────────────────────────
    let app = api::router(Arc::clone(&state));

    // ── Bind & serve ────────────────────────────────────────
    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.listen_addr, "failed to bind: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(addr = %config.listen_addr, "shardwatchd listening");

    let server = async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    };

    // Neither side ends in normal operation. The engine only stops on a
    // snapshot write failure, after which state can no longer be trusted.
    tokio::select! {
        res = server => {
            if let Err(e) = res {
                error!("server error: {e}");
            }
            ExitCode::FAILURE
        }
        res = engine => {
            match res {
                Ok(Err(e)) => error!("fatal persistence error, shutting down: {e}"),
                Ok(Ok(())) => error!("state engine stopped unexpectedly"),
                Err(e) => error!("state engine task failed: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}
