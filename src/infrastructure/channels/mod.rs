//! Channel Adapter Registry
//!
//! Maps channel names to `ChannelAdapter` implementations. Lookup is
//! case-insensitive; a missing entry means the channel is not deliverable
//! from this process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::domain::{
    AdapterError, AdapterOutcome, ChannelAdapter, SendFileCommand, SendMessageCommand,
};

/// Channel name to adapter mapping.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<String, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a loopback adapter for every configured channel.
    pub fn loopback(channels: &[String]) -> Self {
        channels.iter().fold(Self::new(), |registry, channel| {
            registry.with_adapter(channel, Arc::new(LoopbackAdapter::new(channel)))
        })
    }

    pub fn with_adapter(mut self, channel: &str, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(channel.to_lowercase(), adapter);
        self
    }

    pub fn get(&self, channel: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel.to_lowercase()).cloned()
    }

    /// Registered channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Adapter that acknowledges every hand-off as delivered immediately.
///
/// Stands in for real integrations in local runs and tests.
pub struct LoopbackAdapter {
    channel: String,
}

impl LoopbackAdapter {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for LoopbackAdapter {
    async fn send_message(
        &self,
        command: &SendMessageCommand,
    ) -> Result<AdapterOutcome, AdapterError> {
        debug!(
            channel = %self.channel,
            message_id = %command.message_id,
            to = %command.to,
            "Loopback message delivered"
        );
        Ok(AdapterOutcome::delivered(Utc::now()))
    }

    async fn send_file(&self, command: &SendFileCommand) -> Result<AdapterOutcome, AdapterError> {
        debug!(
            channel = %self.channel,
            message_id = %command.message_id,
            to = %command.to,
            file_url = %command.file_url,
            "Loopback file delivered"
        );
        Ok(AdapterOutcome::delivered(Utc::now()))
    }
}
