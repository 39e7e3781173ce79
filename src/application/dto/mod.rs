//! Data Transfer Objects
//!
//! DTOs for API request/response serialization.

pub mod request;
pub mod response;

pub use request::{DeliveryCallbackRequest, HistoryParams, ReadCallbackRequest, SendMessageRequest};
pub use response::{AcceptedResponse, HistoryResponse, WebhookAck};
