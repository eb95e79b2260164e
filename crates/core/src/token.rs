//! Non-fungible token records.

use crate::crypto::Address;
use serde::{Deserialize, Serialize};

/// Authority-assigned token identifier. Ids are handed out in increasing
/// order starting at 1.
pub type TokenId = u64;

/// A non-fungible token.
///
/// `nonce` moves forward with every mint/transfer/burn and is what the token
/// store's conditional upsert compares against, so a replayed operation can
/// never overwrite a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub owner: Address,
    pub metadata_uri: String,
    pub nonce: u64,
}

impl Token {
    pub fn new(id: TokenId, owner: Address, metadata_uri: impl Into<String>, nonce: u64) -> Self {
        Self {
            id,
            owner,
            metadata_uri: metadata_uri.into(),
            nonce,
        }
    }

    /// Burned tokens are owned by the burn address.
    pub fn is_burned(&self) -> bool {
        self.owner == Address::BURN
    }

    pub fn next_nonce(&self) -> u64 {
        self.nonce.saturating_add(1)
    }
}
