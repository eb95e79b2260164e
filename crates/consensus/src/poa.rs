//! Proof of Authority (PoA) header signing.
//!
//! A single authority produces every block. Its identity is the validator
//! record stored on each block; the next block may only be signed by the key
//! recorded on its parent.

use crate::{ConsensusError, Result};
use tokenchain_core::{Address, BlockData, BlockHeader, Keypair, Signature, Signer, Validator};
use tracing::debug;

/// The block-producing authority.
#[derive(Clone)]
pub struct Authority {
    keypair: Keypair,
    validator: Validator,
}

impl Authority {
    pub fn new(id: impl Into<String>, keypair: Keypair) -> Self {
        let validator = Validator::new(id, keypair.public_key);
        Self { keypair, validator }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// The record written onto every block this authority signs.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn signer(&self) -> &Keypair {
        &self.keypair
    }

    /// Sign `header`, which must extend `parent`.
    ///
    /// Fails with [`ConsensusError::NotAuthority`] unless the parent's
    /// validator record names this authority's key.
    pub fn sign_header(&self, header: &BlockHeader, parent: &BlockData) -> Result<Signature> {
        if parent.validator.public_key != self.validator.public_key {
            return Err(ConsensusError::NotAuthority {
                expected: parent.validator.address(),
                got: self.address(),
            });
        }

        let hash = header.hash();
        let signature = self.keypair.sign_hash(&hash)?;
        debug!(number = header.number, %hash, "header signed");
        Ok(signature)
    }
}
