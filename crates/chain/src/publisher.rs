//! Chain-head publication with bounded retry, and the chain-head change
//! detector.

use crate::pubsub::{PubSub, PubSubError, Subscription};
use crate::wait_for_shutdown;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokenchain_core::{BlockchainState, ChainId, Hash};
use tokenchain_storage::{ChainStateStore, Storage};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode chain state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publishing to {channel} failed after {attempts} attempts: {last}")]
    Exhausted {
        channel: String,
        attempts: u32,
        last: PubSubError,
    },

    #[error("publishing to {0} cancelled by shutdown")]
    Cancelled(String),
}

/// Exponential backoff between publish attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Publishes [`BlockchainState`] as JSON on one channel.
///
/// Clones share the record of the last head published per chain.
#[derive(Clone)]
pub struct StatePublisher {
    pubsub: Arc<dyn PubSub>,
    channel: String,
    retry: RetryPolicy,
    published: Arc<Mutex<HashMap<ChainId, (Hash, u64)>>>,
}

impl StatePublisher {
    pub fn new(pubsub: Arc<dyn PubSub>, channel: impl Into<String>) -> Self {
        Self {
            pubsub,
            channel: channel.into(),
            retry: RetryPolicy::default(),
            published: Arc::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn subscribe(&self) -> Result<Subscription, PubSubError> {
        self.pubsub.subscribe(&self.channel).await
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Whether `state` is the last head published for its chain, or older.
    pub fn is_superseded(&self, state: &BlockchainState) -> bool {
        let published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        match published.get(&state.chain_id) {
            Some((hash, number)) => {
                *hash == state.latest_hash || state.latest_block_number < *number
            }
            None => false,
        }
    }

    /// Publish `state`, retrying with backoff until the attempts run out or
    /// `shutdown` is requested.
    pub async fn publish(
        &self,
        state: &BlockchainState,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(state)?;
        let mut shutdown = shutdown.clone();

        let mut attempt = 1;
        loop {
            match self.pubsub.publish(&self.channel, payload.clone()).await {
                Ok(()) => {
                    self.published
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(state.chain_id, (state.latest_hash, state.latest_block_number));
                    debug!(
                        channel = %self.channel,
                        number = state.latest_block_number,
                        attempt,
                        "chain state published"
                    );
                    return Ok(());
                }
                Err(err) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        channel = %self.channel,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "publish failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = wait_for_shutdown(&mut shutdown) => {
                            return Err(PublishError::Cancelled(self.channel.clone()));
                        }
                    }
                    attempt += 1;
                }
                Err(last) => {
                    return Err(PublishError::Exhausted {
                        channel: self.channel.clone(),
                        attempts: attempt,
                        last,
                    });
                }
            }
        }
    }
}

/// Decode a published chain-state payload.
pub fn decode_state(payload: &[u8]) -> Result<BlockchainState, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Watch the stored chain head of `chain_id` and publish every head that
/// was not already announced, so writes from outside the block producer
/// reach subscribers too.
///
/// Stops on shutdown or when the database closes.
pub fn spawn_chain_state_detector(
    storage: &Storage,
    chain_id: ChainId,
    publisher: StatePublisher,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut watcher = ChainStateStore::new(storage).watch(chain_id);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = watcher.next() => match event {
                    Some(Ok(state)) if publisher.is_superseded(&state) => {
                        debug!(
                            chain_id,
                            number = state.latest_block_number,
                            "stored chain head already published"
                        );
                    }
                    Some(Ok(state)) => {
                        info!(
                            chain_id,
                            number = state.latest_block_number,
                            hash = %state.latest_hash,
                            "publishing externally written chain head"
                        );
                        if let Err(err) = publisher.publish(&state, &shutdown).await {
                            warn!(chain_id, error = %err, "failed to publish chain head");
                        }
                    }
                    Some(Err(err)) => warn!(chain_id, error = %err, "undecodable chain state"),
                    None => break,
                },
            }
        }
        info!(chain_id, "chain state detector stopped");
    })
}
