//! Application Layer
//!
//! The pipeline stages (ingest publisher, sequencer, delivery router,
//! status ingestor, realtime notifier) and the DTOs of the HTTP surface.

pub mod dto;
pub mod services;
