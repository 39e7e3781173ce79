//! Presentation Layer
//!
//! HTTP routes, webhook endpoints and the realtime WebSocket gateway.

pub mod http;
pub mod middleware;
pub mod websocket;
