//! Block storage.

use crate::db::{KvStore, Result, Storage};
use tokenchain_core::{BlockData, Hash};

/// Persisted blocks, indexed by hash and by number.
pub struct BlockStore<'a, S: KvStore> {
    store: &'a S,
}

impl<'a, S: KvStore> BlockStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Store a block with both indexes.
    ///
    /// - Primary: `block:hash:{hash}` → full block data
    /// - Secondary: `block:number:{number}` → hash
    pub fn upsert(&self, block: &BlockData) -> Result<()> {
        self.store.put(&Storage::block_hash_key(&block.hash), block)?;
        self.store
            .put(&Storage::block_number_key(block.number()), &block.hash)
    }

    pub fn get_by_hash(&self, hash: &Hash) -> Result<Option<BlockData>> {
        self.store.get(&Storage::block_hash_key(hash))
    }

    pub fn get_by_number(&self, number: u64) -> Result<Option<BlockData>> {
        let hash: Option<Hash> = self.store.get(&Storage::block_number_key(number))?;
        match hash {
            Some(hash) => self.get_by_hash(&hash),
            None => Ok(None),
        }
    }

    pub fn contains(&self, hash: &Hash) -> Result<bool> {
        self.store.contains(&Storage::block_hash_key(hash))
    }

    /// Up to `count` blocks ending at `latest`, newest first.
    pub fn recent(&self, latest: u64, count: usize) -> Result<Vec<BlockData>> {
        let mut blocks = Vec::with_capacity(count);
        let mut number = Some(latest);
        while let Some(n) = number {
            if blocks.len() >= count {
                break;
            }
            if let Some(block) = self.get_by_number(n)? {
                blocks.push(block);
            }
            number = n.checked_sub(1);
        }
        Ok(blocks)
    }
}
