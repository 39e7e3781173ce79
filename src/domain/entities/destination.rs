//! Message destinations.

use serde::{Deserialize, Serialize};

/// One recipient of a message together with the channels it can be reached on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub user_id: String,
    #[serde(default)]
    pub channels: Vec<ChannelAddress>,
}

/// A recipient's identity on one external channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAddress {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Destination {
    pub fn new(user_id: impl Into<String>, channels: Vec<ChannelAddress>) -> Self {
        Self {
            user_id: user_id.into(),
            channels,
        }
    }

    /// Address registered for `channel`, matched case-insensitively.
    pub fn address_for(&self, channel: &str) -> Option<&ChannelAddress> {
        self.channels
            .iter()
            .find(|address| address.channel.eq_ignore_ascii_case(channel))
    }
}

impl ChannelAddress {
    pub fn new(channel: impl Into<String>, channel_user_id: Option<String>) -> Self {
        Self {
            channel: channel.into(),
            channel_user_id,
            display_name: None,
        }
    }

    /// Adapter-facing target, falling back to the platform user id.
    pub fn target<'a>(&'a self, user_id: &'a str) -> &'a str {
        self.channel_user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(user_id)
    }
}
