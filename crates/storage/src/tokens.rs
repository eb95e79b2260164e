//! Token repository.

use crate::db::{KvStore, Result, Storage};
use tokenchain_core::{hash_encoded, merkle_root, Address, Hash, Token, TokenId};

/// Every token, keyed by id.
///
/// Tokens are not scoped to a chain; a database holds one token namespace.
pub struct TokenStore<'a, S: KvStore> {
    store: &'a S,
}

impl<'a, S: KvStore> TokenStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn get(&self, id: TokenId) -> Result<Option<Token>> {
        self.store.get(&Storage::token_key(id))
    }

    /// Write `token` only if its nonce is strictly greater than the stored
    /// one. A missing token is always written.
    ///
    /// Returns whether the write happened.
    pub fn upsert_if_nonce_gt(&self, token: &Token) -> Result<bool> {
        if let Some(existing) = self.get(token.id)? {
            if token.nonce <= existing.nonce {
                return Ok(false);
            }
        }
        self.store.put(&Storage::token_key(token.id), token)?;
        Ok(true)
    }

    /// Every token, in id order.
    pub fn list(&self) -> Result<Vec<Token>> {
        self.store.scan_prefix(Storage::TOKEN_PREFIX)
    }

    /// Tokens currently owned by `owner`, in id order.
    pub fn list_by_owner(&self, owner: &Address) -> Result<Vec<Token>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|token| token.owner == *owner)
            .collect())
    }

    /// Highest token id ever written, 0 when there are none.
    pub fn latest_id(&self) -> Result<TokenId> {
        Ok(self.list()?.last().map(|token| token.id).unwrap_or(0))
    }

    /// Merkle root over every token, sorted by id.
    pub fn hash_state(&self) -> Result<Hash> {
        let mut tokens = self.list()?;
        tokens.sort_by_key(|token| token.id);
        let leaves: Vec<Hash> = tokens.iter().map(hash_encoded).collect();
        Ok(merkle_root(&leaves))
    }
}
