//! Identifier generation.

use uuid::Uuid;

/// New message id; UUIDv7 keeps ids roughly time ordered.
pub fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}

/// Id of one realtime client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
