//! Proof of Authority consensus for tokenchain.
//!
//! This crate provides the pieces the block producer runs per transaction:
//! - Transaction validation (signature, chain id, sender, nonce, balance,
//!   token ownership)
//! - Cancellable proof-of-work nonce search
//! - Header signing by the single authority
//! - End-to-end verification of committed blocks
//!
//! # Example
//!
//! ```rust,no_run
//! use tokenchain_consensus::{Authority, BlockVerifier, ProofOfWork};
//! use tokenchain_core::{genesis_block, Block, BlockData, GenesisSpec, Hash, Keypair};
//! use tokio::sync::watch;
//!
//! let authority = Authority::new("authority", Keypair::generate());
//! let spec = GenesisSpec {
//!     chain_id: 1,
//!     authority: authority.address(),
//!     difficulty: 1,
//!     transaction_fee: 1,
//!     state_root: Hash::ZERO,
//!     tokens_root: Hash::ZERO,
//! };
//! let genesis = genesis_block(&spec, authority.signer(), authority.validator().clone()).unwrap();
//!
//! let mut header = genesis.header.clone();
//! header.number = 1;
//! header.prev_hash = genesis.hash;
//! let (_cancel_tx, cancel) = watch::channel(false);
//! ProofOfWork::solve(&mut header, &cancel).unwrap();
//!
//! let signature = authority.sign_header(&header, &genesis).unwrap();
//! let block = BlockData::new(Block::new(header, vec![]), signature, authority.validator().clone());
//! BlockVerifier::verify_child(&block, &genesis).unwrap();
//! ```

pub mod poa;
pub mod pow;
pub mod validator;

use thiserror::Error;
use tokenchain_core::{Address, CryptoError, TransactionError};

/// Errors that can occur during consensus operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("difficulty {0} can never be met")]
    UnreachableDifficulty(u16),

    #[error("proof-of-work nonce space exhausted")]
    NonceSpaceExhausted,

    #[error("block must be signed by {expected}, not {got}")]
    NotAuthority { expected: Address, got: Address },

    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("block hash does not match its header")]
    HashMismatch,

    #[error("block merkle root verification failed")]
    InvalidMerkleRoot,

    #[error("block hash does not meet difficulty {difficulty}")]
    InsufficientWork { difficulty: u16 },

    #[error("invalid block header signature")]
    InvalidHeaderSignature,

    #[error("transaction {index} in block is invalid: {source}")]
    InvalidTransaction {
        index: usize,
        source: TransactionError,
    },

    #[error("block number mismatch (expected {expected}, got {got})")]
    InvalidNumber { expected: u64, got: u64 },

    #[error("block prev_hash mismatch")]
    InvalidPrevHash,
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

// Re-export commonly used types
pub use poa::Authority;
pub use pow::ProofOfWork;
pub use validator::{BlockVerifier, TransactionValidator, ValidationError};
