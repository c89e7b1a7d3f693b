//! Real-time messaging relay
//!
//! Persistent WebSocket connections between the two parties of a conversation:
//! - Handshake binds a connection to a user in the connection registry
//! - Chat frames are persisted first, then pushed to the other party if online
//! - Missed pushes are recovered through the message history endpoint

mod error;
mod handler;
mod protocol;
mod registry;
mod router;
mod server;
mod session;

pub use handler::handle_relay_ws;
pub use protocol::{ClientFrame, ServerFrame};
pub use server::RelayServer;
