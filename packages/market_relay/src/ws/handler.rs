//! WebSocket Handler
//!
//! Drives one relay connection: a writer task drains the session's outbound
//! queue into the socket while this task reads frames and feeds the session.

use axum::extract::ws::{Message, WebSocket};
use futures::FutureExt;
use futures::{sink::SinkExt, stream::StreamExt};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::server::RelayServer;
use super::session::Flow;

/// How long queued frames may take to flush once the read side is done.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle a relay WebSocket connection until the transport closes.
pub async fn handle_relay_ws(socket: WebSocket, relay: RelayServer) {
    let metrics = relay.metrics().clone();
    metrics.connection_opened();

    let (mut session, mut rx) = relay.open_session();
    let conn_id = session.connection_id();
    info!(conn_id, "New relay connection");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task to send frames to the WebSocket
    let mut sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Read loop. Frames are handled inline, so a persistence call that has
    // started always finishes even if the peer hangs up meanwhile.
    while let Some(msg) = ws_receiver.next().await {
        let flow = match msg {
            Ok(Message::Text(text)) => {
                match AssertUnwindSafe(session.handle_text(text.as_str()))
                    .catch_unwind()
                    .await
                {
                    Ok(flow) => flow,
                    Err(_) => {
                        error!(conn_id, "Panic while handling frame, dropping connection");
                        Flow::Close
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                session.reject_malformed().await;
                Flow::Continue
            }
            Ok(Message::Close(_)) => Flow::Close,
            // Ping/pong are answered by the transport
            Ok(_) => Flow::Continue,
            Err(e) => {
                debug!(conn_id, "WebSocket receive error: {}", e);
                Flow::Close
            }
        };
        if flow == Flow::Close {
            break;
        }
    }

    debug!(conn_id, state = ?session.state(), "Read loop finished");
    session.close().await;
    // Dropping the session drops its queue sender; the writer flushes what is
    // left (e.g. a final error frame) and closes the socket.
    drop(session);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        warn!(conn_id, "Writer did not drain in time, aborting");
        sender_task.abort();
    }

    metrics.connection_closed();
    info!(conn_id, "Relay connection closed");
}
