//! Transactions: unsigned intents, signed transactions, mempool entries and
//! the per-block inclusion record.

use crate::account::ChainId;
use crate::crypto::{Address, CryptoError, Signature, Signer};
use crate::hash::{hash_encoded, Hash};
use crate::token::TokenId;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),
    #[error("missing signature")]
    MissingSignature,
    #[error("signature recovers to {recovered}, expected {expected}")]
    SignerMismatch { expected: Address, recovered: Address },
    #[error("token transaction is missing {0}")]
    MissingTokenField(&'static str),
}

/// What a transaction moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Coin,
    Token,
}

/// An unsigned transaction.
///
/// For coin transactions `value` is the gross amount taken from the sender;
/// the recipient receives `value - fee`. For token transactions `value`
/// carries only the fee and the `token_*` fields describe the token write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub chain_id: ChainId,
    /// Must equal the sender's stored nonce + 1.
    pub nonce: u64,
    pub from: Address,
    pub to: Address,
    pub value: u64,
    pub data: Vec<u8>,
    pub kind: TransactionKind,
    pub token_id: Option<TokenId>,
    pub token_metadata_uri: Option<String>,
    pub token_nonce: Option<u64>,
}

impl Transaction {
    /// A coin transfer.
    pub fn coin(chain_id: ChainId, nonce: u64, from: Address, to: Address, value: u64) -> Self {
        Self {
            chain_id,
            nonce,
            from,
            to,
            value,
            data: Vec::new(),
            kind: TransactionKind::Coin,
            token_id: None,
            token_metadata_uri: None,
            token_nonce: None,
        }
    }

    /// A token write (mint, transfer or burn). `fee` travels in `value`.
    #[allow(clippy::too_many_arguments)]
    pub fn token(
        chain_id: ChainId,
        nonce: u64,
        from: Address,
        to: Address,
        fee: u64,
        token_id: TokenId,
        metadata_uri: impl Into<String>,
        token_nonce: u64,
    ) -> Self {
        Self {
            chain_id,
            nonce,
            from,
            to,
            value: fee,
            data: Vec::new(),
            kind: TransactionKind::Token,
            token_id: Some(token_id),
            token_metadata_uri: Some(metadata_uri.into()),
            token_nonce: Some(token_nonce),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn is_coin(&self) -> bool {
        self.kind == TransactionKind::Coin
    }

    pub fn is_token(&self) -> bool {
        self.kind == TransactionKind::Token
    }

    /// Token id, metadata URI and token nonce of a token transaction.
    pub fn token_fields(&self) -> Result<(TokenId, &str, u64), TransactionError> {
        let id = self
            .token_id
            .ok_or(TransactionError::MissingTokenField("token id"))?;
        let uri = self
            .token_metadata_uri
            .as_deref()
            .ok_or(TransactionError::MissingTokenField("metadata uri"))?;
        let nonce = self
            .token_nonce
            .ok_or(TransactionError::MissingTokenField("token nonce"))?;
        Ok((id, uri, nonce))
    }

    /// Digest covered by the signature: the whole unsigned payload.
    pub fn signing_hash(&self) -> Hash {
        hash_encoded(self)
    }

    pub fn sign<S: Signer + ?Sized>(self, signer: &S) -> Result<SignedTransaction, TransactionError> {
        let signature = signer.sign_hash(&self.signing_hash())?;
        Ok(SignedTransaction {
            transaction: self,
            signature,
        })
    }
}

/// A transaction with its `(V, R, S)` signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
}

impl SignedTransaction {
    pub fn new(transaction: Transaction, signature: Signature) -> Self {
        Self {
            transaction,
            signature,
        }
    }

    /// Hash over the transaction and its signature.
    pub fn hash(&self) -> Hash {
        hash_encoded(self)
    }

    pub fn recover_sender(&self) -> Result<Address, TransactionError> {
        if self.signature.is_empty() {
            return Err(TransactionError::MissingSignature);
        }
        Ok(self
            .signature
            .recover_address(&self.transaction.signing_hash())?)
    }

    /// Check that the signature recovers to `from`.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let recovered = self.recover_sender()?;
        if recovered != self.transaction.from {
            return Err(TransactionError::SignerMismatch {
                expected: self.transaction.from,
                recovered,
            });
        }
        Ok(())
    }
}

impl Deref for SignedTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        &self.transaction
    }
}

/// A signed transaction waiting in the mempool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolTransaction {
    /// Unique, increasing with arrival order.
    pub id: u64,
    /// Enqueue time, Unix milliseconds.
    pub received_at: u64,
    pub signed: SignedTransaction,
}

impl MempoolTransaction {
    pub fn new(id: u64, signed: SignedTransaction) -> Self {
        Self {
            id,
            received_at: crate::block::current_timestamp_ms(),
            signed,
        }
    }

    pub fn verify(&self) -> Result<(), TransactionError> {
        self.signed.verify()
    }
}

impl Deref for MempoolTransaction {
    type Target = SignedTransaction;

    fn deref(&self) -> &SignedTransaction {
        &self.signed
    }
}

/// A transaction as included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTransaction {
    pub signed: SignedTransaction,
    /// Inclusion time, Unix milliseconds.
    pub timestamp: u64,
    pub fee: u64,
}

impl BlockTransaction {
    pub fn new(signed: SignedTransaction, timestamp: u64, fee: u64) -> Self {
        Self {
            signed,
            timestamp,
            fee,
        }
    }

    /// Merkle leaf for this transaction.
    pub fn hash(&self) -> Hash {
        hash_encoded(self)
    }
}
