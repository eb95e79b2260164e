//! Persistent storage layer for tokenchain.
//!
//! This crate provides the repositories the ledger engine works through:
//! - Accounts (per chain) and tokens, with reproducible state roots
//! - The durable mempool and its rejected-transaction collection
//! - Blocks (by hash and number) and the chain-head record
//! - Change notification for the mempool and the chain head
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Ledger / Orchestrator                 │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────────┐
//! │   AccountStore  TokenStore  MempoolStore  BlockStore     │
//! │                    ChainStateStore                       │
//! └──────────────┬──────────────────────────┬───────────────┘
//!                │ KvStore                  │ KvStore
//! ┌──────────────▼─────────┐   ┌────────────▼───────────────┐
//! │  Storage (sled, live)  │◄──│ UnitOfWork (staged writes) │
//! └────────────────────────┘   └────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tokenchain_storage::{AccountStore, Storage, UnitOfWork};
//! use tokenchain_core::{Account, Address};
//!
//! let storage = Storage::open("./tokenchain_data").unwrap();
//! let alice = Address([0xAA; 20]);
//!
//! let uow = UnitOfWork::begin(&storage);
//! AccountStore::new(&uow, 1)
//!     .upsert(&Account::with_balance(1, alice, 1_000))
//!     .unwrap();
//! uow.commit().unwrap();
//! ```

pub mod accounts;
pub mod blocks;
pub mod chain_state;
pub mod db;
pub mod mempool;
pub mod tokens;
pub mod unit_of_work;

// Re-export commonly used types
pub use accounts::AccountStore;
pub use blocks::BlockStore;
pub use chain_state::{ChainStateStore, ChainStateWatcher};
pub use db::{BatchOp, KvStore, Result, Storage, StorageError};
pub use mempool::{MempoolStore, MempoolWatcher, RejectedTransaction};
pub use tokens::TokenStore;
pub use unit_of_work::UnitOfWork;
