//! Observer WebSocket handler.
//!
//! Flow per connection:
//! 1. Accept WS upgrade
//! 2. Register with the registry (Hello is the first queued frame)
//! 3. Writer drains the outbox to the socket; reader watches for close
//! 4. Whichever side ends first tears the connection down, once; a close
//!    from the observer is answered before the socket is dropped

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info};

use crate::registry::Registry;
use crate::state::AppState;

/// Axum handler for GET /api/socket — upgrades to WebSocket.
pub async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<Registry>) {
    let sub = match registry.add() {
        Ok(sub) => sub,
        Err(e) => {
            error!("hello encode error: {e}");
            return;
        }
    };
    let id = sub.id;
    let mut frames = sub.frames;
    let (mut sender, mut receiver) = socket.split();

    // Ends when the registry drops this observer or the socket write fails.
    let writer = async {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = sender.send(Message::Text(frame)).await {
                debug!(observer = %id, "ws send error: {e}");
                break;
            }
        }
    };

    // Observers have nothing to say; only watch for the end of the stream.
    // Yields true when the observer closed cleanly.
    let reader = async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(frame)) => {
                    info!(observer = %id, frame = ?frame, "observer sent close");
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(observer = %id, "ws recv error: {e}");
                    return false;
                }
            }
        }
        false
    };

    let peer_closed = tokio::select! {
        _ = writer => false,
        closed = reader => closed,
    };

    // The close reply is queued by the protocol layer; flush it out.
    if peer_closed {
        if let Err(e) = sender.close().await {
            debug!(observer = %id, "ws close error: {e}");
        }
    }

    registry.remove(id);
}
