use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::ws;

/// Transport ceiling as a multiple of the relay's frame limit. Frames between
/// the two get a protocol error; anything larger drops the connection.
const TRANSPORT_LIMIT_FACTOR: usize = 4;

/// Upgrade to a relay connection. Identity is established by the first
/// frame on the socket, not by the upgrade request.
pub async fn relay_websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let relay = state.relay.clone();
    let limit = relay.max_frame_bytes().saturating_mul(TRANSPORT_LIMIT_FACTOR);
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| ws::handle_relay_ws(socket, relay))
}
