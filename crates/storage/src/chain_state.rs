//! Chain-head record storage.

use crate::db::{KvStore, Result, Storage};
use tokenchain_core::{BlockchainState, ChainId};

/// The singleton [`BlockchainState`] of each chain.
pub struct ChainStateStore<'a, S: KvStore> {
    store: &'a S,
}

impl<'a, S: KvStore> ChainStateStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn get_by_chain_id(&self, chain_id: ChainId) -> Result<Option<BlockchainState>> {
        self.store.get(&Storage::chain_state_key(chain_id))
    }

    pub fn upsert_by_chain_id(&self, state: &BlockchainState) -> Result<()> {
        self.store.put(&Storage::chain_state_key(state.chain_id), state)
    }
}

impl ChainStateStore<'_, Storage> {
    /// Stream of every later write to this chain's head record.
    pub fn watch(&self, chain_id: ChainId) -> ChainStateWatcher {
        ChainStateWatcher {
            subscriber: self.store.watch_prefix(&Storage::chain_state_key(chain_id)),
        }
    }
}

pub struct ChainStateWatcher {
    subscriber: sled::Subscriber,
}

impl ChainStateWatcher {
    /// Wait for the next write. `None` once the database is closed.
    pub async fn next(&mut self) -> Option<Result<BlockchainState>> {
        loop {
            match (&mut self.subscriber).await? {
                sled::Event::Insert { value, .. } => {
                    return Some(bincode::deserialize(&value).map_err(Into::into));
                }
                sled::Event::Remove { .. } => continue,
            }
        }
    }
}
