//! Publish/subscribe channels for chain-head notifications.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

/// Messages buffered per subscriber before it starts lagging.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("channel {0} is unavailable")]
    Unavailable(String),
}

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), PubSubError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError>;
}

/// A stream of payloads from one channel.
pub struct Subscription {
    channel: String,
    receiver: broadcast::Receiver<Vec<u8>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: broadcast::Receiver<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload. `None` once the channel is closed.
    ///
    /// A subscriber that falls behind skips what it missed.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process pub/sub over tokio broadcast channels.
pub struct MemoryPubSub {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Close `channel`: current subscribers see the end of their stream.
    /// The next publish or subscribe opens it again.
    pub fn close(&self, channel: &str) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    /// Delivering to nobody is not an error.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), PubSubError> {
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError> {
        Ok(Subscription::new(channel, self.sender(channel).subscribe()))
    }
}
