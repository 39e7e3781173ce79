//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - Message bus transports (Redis Streams, in-memory) and consumer loops
//! - Message store and recipient directories (PostgreSQL, in-memory)
//! - Channel adapter registry
//! - Prometheus metrics

pub mod bus;
pub mod channels;
pub mod database;
pub mod metrics;
pub mod repositories;
