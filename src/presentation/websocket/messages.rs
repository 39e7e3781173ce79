//! WebSocket Message Types
//!
//! Control messages exchanged with realtime clients. Pipeline events are
//! sent as `{"topic": ..., "event": ...}` frames built by the notifier.

use serde::{Deserialize, Serialize};

/// Incoming control message, e.g. `{"event":"join","data":{"userId":"u1"}}`
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub event: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ClientMessage {
    pub const JOIN: &'static str = "join";

    /// `data.userId` of a join request, if present and non-blank
    pub fn join_user_id(&self) -> Option<&str> {
        self.data
            .as_ref()?
            .get("userId")?
            .as_str()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Outgoing control message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Joined {
        #[serde(rename = "userId")]
        user_id: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
