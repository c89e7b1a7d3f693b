pub mod auth;
pub mod conversations;
pub mod error;
pub mod health;
pub mod products;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use auth::{login_handler, logout_handler, register_handler};
pub use conversations::{create_conversation, create_message, list_conversations, list_messages};
pub use health::{health_live_handler, health_ready_handler, metrics_handler};
pub use products::{create_product, get_product, list_products};
pub use websocket::relay_websocket_handler;
