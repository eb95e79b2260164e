//! A running authority node.

use crate::config::ChainConfig;
use crate::lock::{DistributedMutex, KeyedMutex};
use crate::mempool::spawn_mempool_detector;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::publisher::{decode_state, spawn_chain_state_detector, StatePublisher};
use crate::pubsub::{MemoryPubSub, PubSub, PubSubError, Subscription};
use std::sync::Arc;
use thiserror::Error;
use tokenchain_consensus::Authority;
use tokenchain_core::ChainId;
use tokenchain_storage::{ChainStateStore, Storage, StorageError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("chain {0} is not initialized; run init first")]
    NotInitialized(ChainId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("pub/sub error: {0}")]
    PubSub(#[from] PubSubError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

pub struct Node {
    storage: Storage,
    chain_id: ChainId,
    authority: Authority,
    publisher: StatePublisher,
    lock: Arc<dyn DistributedMutex>,
}

impl Node {
    /// A node with in-process pub/sub and locks.
    pub fn new(storage: Storage, config: &ChainConfig, authority: Authority) -> Self {
        Self::with_backends(
            storage,
            config,
            authority,
            Arc::new(MemoryPubSub::new()),
            Arc::new(KeyedMutex::new()),
        )
    }

    pub fn with_backends(
        storage: Storage,
        config: &ChainConfig,
        authority: Authority,
        pubsub: Arc<dyn PubSub>,
        lock: Arc<dyn DistributedMutex>,
    ) -> Self {
        Self {
            storage,
            chain_id: config.chain_id,
            authority,
            publisher: StatePublisher::new(pubsub, config.state_channel.clone()),
            lock,
        }
    }

    pub fn publisher(&self) -> &StatePublisher {
        &self.publisher
    }

    pub fn lock(&self) -> Arc<dyn DistributedMutex> {
        Arc::clone(&self.lock)
    }

    /// Run until `shutdown` flips to true.
    ///
    /// Starts the mempool detector, the block producer, the chain-state
    /// detector and the subscriber relay; returns once the producer has
    /// stopped and the helper tasks are gone.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), NodeError> {
        let head = ChainStateStore::new(&self.storage)
            .get_by_chain_id(self.chain_id)?
            .ok_or(NodeError::NotInitialized(self.chain_id))?;
        info!(
            chain_id = self.chain_id,
            number = head.latest_block_number,
            hash = %head.latest_hash,
            "starting node"
        );

        let relay = spawn_relay(self.publisher.subscribe().await?, shutdown.clone());
        let state_handle = spawn_chain_state_detector(
            &self.storage,
            self.chain_id,
            self.publisher.clone(),
            shutdown.clone(),
        );
        let (mempool_handle, pending) = spawn_mempool_detector(&self.storage, shutdown.clone())?;

        let orchestrator = Orchestrator::new(
            self.storage.clone(),
            self.chain_id,
            self.authority.clone(),
            self.publisher.clone(),
            Arc::clone(&self.lock),
        );
        let result = orchestrator.run(pending, shutdown).await;

        for handle in [mempool_handle, state_handle, relay] {
            handle.abort();
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "node task failed");
                }
            }
        }
        if let Err(err) = self.storage.flush() {
            warn!(error = %err, "flush on shutdown failed");
        }

        info!(chain_id = self.chain_id, "node stopped");
        result.map_err(NodeError::from)
    }
}

/// Log every chain head delivered to subscribers of the state channel.
fn spawn_relay(
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                payload = subscription.next() => match payload {
                    Some(payload) => match decode_state(&payload) {
                        Ok(state) => info!(
                            channel = subscription.channel(),
                            number = state.latest_block_number,
                            hash = %state.latest_hash,
                            latest_token_id = state.latest_token_id,
                            "chain head"
                        ),
                        Err(err) => warn!(error = %err, "undecodable chain-state payload"),
                    },
                    None => break,
                },
            }
        }
    })
}
