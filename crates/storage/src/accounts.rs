//! Account repository.

use crate::db::{KvStore, Result, Storage};
use tokenchain_core::{hash_encoded, merkle_root, Account, Address, ChainId, Hash};

/// Accounts of one chain.
pub struct AccountStore<'a, S: KvStore> {
    store: &'a S,
    chain_id: ChainId,
}

impl<'a, S: KvStore> AccountStore<'a, S> {
    pub fn new(store: &'a S, chain_id: ChainId) -> Self {
        Self { store, chain_id }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Get an account by address. Unlike a balance lookup, a missing account
    /// is reported as `None`: existence is a validation rule here.
    pub fn get(&self, address: &Address) -> Result<Option<Account>> {
        self.store.get(&Storage::account_key(self.chain_id, address))
    }

    pub fn exists(&self, address: &Address) -> Result<bool> {
        self.store.contains(&Storage::account_key(self.chain_id, address))
    }

    /// Get an account, falling back to a fresh zero-balance one.
    pub fn get_or_new(&self, address: &Address) -> Result<Account> {
        Ok(self
            .get(address)?
            .unwrap_or_else(|| Account::new(self.chain_id, *address)))
    }

    /// Create or replace an account.
    pub fn upsert(&self, account: &Account) -> Result<()> {
        self.store
            .put(&Storage::account_key(self.chain_id, &account.address), account)
    }

    /// Every account of the chain, sorted by address.
    pub fn list(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .store
            .scan_prefix(&Storage::account_prefix(self.chain_id))?;
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(accounts)
    }

    /// Merkle root over every account of the chain, sorted by address.
    ///
    /// Recomputed from scratch each time so that anyone holding the same
    /// account set arrives at the same root.
    pub fn hash_state(&self) -> Result<Hash> {
        let leaves: Vec<Hash> = self.list()?.iter().map(hash_encoded).collect();
        Ok(merkle_root(&leaves))
    }
}
