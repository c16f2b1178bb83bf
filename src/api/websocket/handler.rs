//! WebSocket connection handler

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::state::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one connection until either side closes it.
///
/// Inbound frames are handled one at a time, which keeps per-connection
/// ordering. Teardown runs exactly once when the loop exits.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.config.client_queue_capacity);
    let conn_id = state.gateway.connect(tx).await;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if sink.send(Message::Text(frame.to_string())).await.is_err() {
                            break; // Client disconnected
                        }
                    }
                    None => break, // Connection removed from the router
                }
            }

            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        state.gateway.handle_text(conn_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Ping/pong is answered by the transport, binary is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.gateway.disconnect(conn_id);
    debug!(conn_id = %conn_id, "socket closed");
}
