//! Core ledger primitives for tokenchain.
//!
//! This crate provides the fundamental types used throughout the ledger:
//! - Hashing and secp256k1 recoverable signatures
//! - Accounts and non-fungible tokens
//! - Transactions in their unsigned, signed, pending and included forms
//! - Blocks, persisted block data and the chain-head record
//! - Merkle trees

pub mod account;
pub mod block;
pub mod crypto;
pub mod hash;
pub mod merkle;
pub mod token;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use account::{Account, ChainId};
pub use block::{
    current_timestamp_ms, genesis_block, Block, BlockData, BlockHeader, BlockchainState,
    GenesisSpec, Validator,
};
pub use crypto::{Address, CryptoError, Keypair, PublicKey, Signature, Signer};
pub use hash::{hash, hash_concat, hash_encoded, Hash, H256};
pub use merkle::{merkle_root, MerkleProof, MerkleTree};
pub use token::{Token, TokenId};
pub use transaction::{
    BlockTransaction, MempoolTransaction, SignedTransaction, Transaction, TransactionError,
    TransactionKind,
};
