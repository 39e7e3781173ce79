//! Fan-out planning and aggregate status rules.

use std::collections::HashSet;

use super::AdapterStatus;
use crate::domain::entities::{Destination, MessageStatus};

/// Channel name meaning "every channel the destination is reachable on".
pub const ALL_CHANNELS: &str = "all";

/// One (destination, channel) hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryPair {
    pub user_id: String,
    pub channel: String,
    pub target: String,
}

/// Domain service for expanding destinations into delivery pairs.
pub struct DeliveryPlanner;

impl DeliveryPlanner {
    /// Expand destinations x channels into unique delivery pairs.
    ///
    /// With `all` (or no channels) every registered address of every
    /// destination is used. Otherwise each requested channel is paired with
    /// the destination's address on it, falling back to the user id.
    pub fn plan(destinations: &[Destination], channels: &[String]) -> Vec<DeliveryPair> {
        let wants_all =
            channels.is_empty() || channels.iter().any(|c| c.eq_ignore_ascii_case(ALL_CHANNELS));
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();

        for destination in destinations {
            let candidates: Vec<(String, String)> = if wants_all {
                destination
                    .channels
                    .iter()
                    .map(|address| {
                        (
                            address.channel.to_lowercase(),
                            address.target(&destination.user_id).to_string(),
                        )
                    })
                    .collect()
            } else {
                channels
                    .iter()
                    .map(|channel| {
                        let target = destination
                            .address_for(channel)
                            .map(|address| address.target(&destination.user_id))
                            .unwrap_or(&destination.user_id);
                        (channel.to_lowercase(), target.to_string())
                    })
                    .collect()
            };

            for (channel, target) in candidates {
                let pair = DeliveryPair {
                    user_id: destination.user_id.clone(),
                    channel,
                    target,
                };
                if seen.insert(pair.clone()) {
                    pairs.push(pair);
                }
            }
        }

        pairs
    }

    /// Aggregate status after a fan-out: the best reached status wins.
    ///
    /// Any `DELIVERED` beats any `SENT`; `FAILED` only when every pair failed.
    /// Returns `None` when nothing was attempted.
    pub fn aggregate(outcomes: &[AdapterStatus]) -> Option<MessageStatus> {
        if outcomes.is_empty() {
            None
        } else if outcomes.contains(&AdapterStatus::Delivered) {
            Some(MessageStatus::Delivered)
        } else if outcomes.contains(&AdapterStatus::Sent) {
            Some(MessageStatus::Sent)
        } else {
            Some(MessageStatus::Failed)
        }
    }
}
