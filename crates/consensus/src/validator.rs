//! Transaction and block validation rules.
//!
//! Transactions are checked against the ledger before they are applied;
//! committed blocks can be re-checked end to end by [`BlockVerifier`].

use crate::pow::ProofOfWork;
use crate::ConsensusError;
use thiserror::Error;
use tokenchain_core::{
    Address, BlockData, ChainId, MempoolTransaction, TokenId, TransactionError,
};
use tokenchain_storage::{AccountStore, KvStore, StorageError, TokenStore};

/// Errors that can occur during transaction validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("transaction signature verification failed: {0}")]
    InvalidSignature(#[from] TransactionError),

    #[error("transaction is for chain {got}, expected {expected}")]
    WrongChain { expected: ChainId, got: ChainId },

    #[error("sender account {0} does not exist")]
    UnknownSender(Address),

    #[error("transaction nonce mismatch (expected {expected}, got {got})")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("insufficient balance (required {required}, available {available})")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("token {token_id} is owned by {owner}, not {sender}")]
    NotTokenOwner {
        token_id: TokenId,
        owner: Address,
        sender: Address,
    },

    #[error("malformed transaction: {0}")]
    Malformed(TransactionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ValidationError {
    /// Whether retrying the same transaction can never succeed.
    ///
    /// Everything except a storage failure is a property of the transaction
    /// itself against the current ledger.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ValidationError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Checks a pending transaction against the ledger of one chain.
#[derive(Debug, Clone, Copy)]
pub struct TransactionValidator {
    chain_id: ChainId,
}

impl TransactionValidator {
    pub fn new(chain_id: ChainId) -> Self {
        Self { chain_id }
    }

    /// Validate `entry` against the accounts and tokens in `store`.
    ///
    /// Checks, in order:
    /// 1. the signature recovers to `from` and the chain id matches
    /// 2. the sender account exists
    /// 3. the nonce is the sender's stored nonce + 1
    /// 4. the sender can pay `value` (the gross amount for coins, the fee
    ///    for tokens)
    /// 5. for tokens, an existing token is owned by the sender; a missing
    ///    token is about to be minted
    pub fn validate<S: KvStore>(&self, store: &S, entry: &MempoolTransaction) -> Result<()> {
        self.check(store, entry, None)
    }

    /// Like [`validate`](Self::validate), for a transaction queued behind
    /// other pending ones from the same sender: the nonce must equal
    /// `expected_nonce` instead of the stored nonce + 1.
    pub fn validate_queued<S: KvStore>(
        &self,
        store: &S,
        entry: &MempoolTransaction,
        expected_nonce: u64,
    ) -> Result<()> {
        self.check(store, entry, Some(expected_nonce))
    }

    fn check<S: KvStore>(
        &self,
        store: &S,
        entry: &MempoolTransaction,
        expected_nonce: Option<u64>,
    ) -> Result<()> {
        entry.verify()?;
        if entry.chain_id != self.chain_id {
            return Err(ValidationError::WrongChain {
                expected: self.chain_id,
                got: entry.chain_id,
            });
        }

        let sender = AccountStore::new(store, self.chain_id)
            .get(&entry.from)?
            .ok_or(ValidationError::UnknownSender(entry.from))?;

        let expected = expected_nonce.unwrap_or_else(|| sender.next_nonce());
        if entry.nonce != expected {
            return Err(ValidationError::InvalidNonce {
                expected,
                got: entry.nonce,
            });
        }

        if !sender.has_balance(entry.value) {
            return Err(ValidationError::InsufficientBalance {
                required: entry.value,
                available: sender.balance,
            });
        }

        if entry.is_token() {
            let (token_id, _, _) = entry.token_fields().map_err(ValidationError::Malformed)?;
            if let Some(token) = TokenStore::new(store).get(token_id)? {
                if token.owner != entry.from {
                    return Err(ValidationError::NotTokenOwner {
                        token_id,
                        owner: token.owner,
                        sender: entry.from,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Re-checks a committed block.
pub struct BlockVerifier;

impl BlockVerifier {
    /// Verify everything a block carries about itself: its hash, Merkle
    /// root, proof-of-work (skipped for genesis), header signature and the
    /// signature of every included transaction.
    pub fn verify_block(block: &BlockData) -> std::result::Result<(), ConsensusError> {
        if block.hash != block.header.hash() {
            return Err(ConsensusError::HashMismatch);
        }

        if !block.verify_transactions_root() {
            return Err(ConsensusError::InvalidMerkleRoot);
        }

        if block.number() > 0 && !ProofOfWork::verify(&block.header) {
            return Err(ConsensusError::InsufficientWork {
                difficulty: block.header.difficulty,
            });
        }

        if !block.verify_header_signature() {
            return Err(ConsensusError::InvalidHeaderSignature);
        }

        for (index, tx) in block.transactions.iter().enumerate() {
            tx.signed
                .verify()
                .map_err(|source| ConsensusError::InvalidTransaction { index, source })?;
        }

        Ok(())
    }

    /// Verify that `block` extends `parent` and was produced by the same
    /// authority.
    pub fn verify_extends(
        block: &BlockData,
        parent: &BlockData,
    ) -> std::result::Result<(), ConsensusError> {
        let expected = parent.number() + 1;
        if block.number() != expected {
            return Err(ConsensusError::InvalidNumber {
                expected,
                got: block.number(),
            });
        }

        if block.header.prev_hash != parent.hash {
            return Err(ConsensusError::InvalidPrevHash);
        }

        if block.validator.public_key != parent.validator.public_key {
            return Err(ConsensusError::NotAuthority {
                expected: parent.validator.address(),
                got: block.validator.address(),
            });
        }

        Ok(())
    }

    /// Both checks.
    pub fn verify_child(
        block: &BlockData,
        parent: &BlockData,
    ) -> std::result::Result<(), ConsensusError> {
        Self::verify_extends(block, parent)?;
        Self::verify_block(block)
    }
}
