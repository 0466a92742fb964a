//! Subscriber registry
//!
//! The pipeline only ever reads a snapshot via `current_subscribers()`.
//! Mutation (`subscribe` / `unsubscribe`) belongs to the command layer.

use super::types::ChannelId;
use std::collections::BTreeSet;
use std::sync::RwLock;

pub trait SubscriberRegistry: Send + Sync {
    /// Point-in-time copy of the subscribed channels
    fn current_subscribers(&self) -> Vec<ChannelId>;
}

#[derive(Debug, Default)]
pub struct InMemorySubscriberRegistry {
    channels: RwLock<BTreeSet<ChannelId>>,
}

impl InMemorySubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscribers<I: IntoIterator<Item = ChannelId>>(channels: I) -> Self {
        Self {
            channels: RwLock::new(channels.into_iter().collect()),
        }
    }

    /// Returns true if the channel was not already subscribed
    pub fn subscribe(&self, channel: ChannelId) -> bool {
        let added = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(channel);
        if added {
            log::info!("➕ Channel {} subscribed", channel);
        }
        added
    }

    /// Returns true if the channel was subscribed
    pub fn unsubscribe(&self, channel: ChannelId) -> bool {
        let removed = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&channel);
        if removed {
            log::info!("➖ Channel {} unsubscribed", channel);
        }
        removed
    }

    pub fn is_subscribed(&self, channel: ChannelId) -> bool {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&channel)
    }
}

impl SubscriberRegistry for InMemorySubscriberRegistry {
    fn current_subscribers(&self) -> Vec<ChannelId> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .copied()
            .collect()
    }
}
