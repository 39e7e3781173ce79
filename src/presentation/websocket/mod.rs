//! WebSocket Gateway
//!
//! Realtime status updates via WebSocket connections.

pub mod gateway;
pub mod handler;
pub mod messages;

pub use gateway::Gateway;
pub use handler::ws_handler;
pub use messages::{ClientMessage, ServerMessage};
