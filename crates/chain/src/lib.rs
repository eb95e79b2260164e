//! Ledger engine, block production and node wiring for tokenchain.
//!
//! This crate brings the lower layers together into a running chain:
//! - **Builders**: sign and enqueue coin and token transactions
//! - **Mempool detector**: feeds pending transactions to the producer in order
//! - **Ledger**: balance, nonce and token ownership transitions
//! - **Orchestrator**: one transaction per block, under the consensus lock
//! - **Publisher**: announces each new chain head with bounded retry
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokenchain_chain::{
//!     genesis, ChainConfig, CoinTransfer, KeyedMutex, MemoryKeystore, Node, TransactionBuilder,
//! };
//! use tokenchain_consensus::Authority;
//! use tokenchain_core::{Address, Keypair};
//! use tokenchain_storage::Storage;
//! use tokio::sync::watch;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Storage::open("./tokenchain_data/db")?;
//! let keypair = Keypair::generate();
//! let config = ChainConfig {
//!     chain_id: 1,
//!     authority: keypair.address().to_hex(),
//!     authority_key: "authority".into(),
//!     transaction_fee: 1,
//!     difficulty: 2,
//!     initial_supply: 1_000_000,
//!     state_channel: "chain-state".into(),
//! };
//! let authority = Authority::new("authority", keypair.clone());
//! genesis::initialize(&storage, &config, &authority)?;
//!
//! let keystore = Arc::new(MemoryKeystore::new());
//! keystore.insert(keypair.clone(), "secret");
//! let builder = TransactionBuilder::new(
//!     storage.clone(),
//!     config.chain_id,
//!     keypair.address(),
//!     keystore,
//!     Arc::new(KeyedMutex::new()),
//! );
//! builder
//!     .transfer_coin(CoinTransfer {
//!         from: keypair.address(),
//!         to: Address::from_bytes([7u8; 20]),
//!         amount: 10,
//!         password: "secret".into(),
//!     })
//!     .await?;
//!
//! let (_stop, shutdown) = watch::channel(false);
//! Node::new(storage, &config, authority).run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod genesis;
pub mod ledger;
pub mod lock;
pub mod mempool;
pub mod node;
pub mod orchestrator;
pub mod publisher;
pub mod pubsub;

// Re-export commonly used types
pub use builder::{
    BuilderError, CoinTransfer, MemoryKeystore, SigningOracle, TokenBurn, TokenMint,
    TokenTransfer, TransactionBuilder,
};
pub use config::{list_key_names, load_keypair, ChainConfig, ConfigError, KeyFile};
pub use genesis::GenesisError;
pub use ledger::{LedgerEngine, LedgerError, LedgerOutcome};
pub use lock::{
    DistributedMutex, KeyedMutex, LockError, LockGuard, CONSENSUS_LOCK_KEY,
    TOKEN_SERVICES_LOCK_KEY,
};
pub use mempool::spawn_mempool_detector;
pub use node::{Node, NodeError};
pub use orchestrator::{Orchestrator, OrchestratorError, Outcome};
pub use publisher::{
    decode_state, spawn_chain_state_detector, PublishError, RetryPolicy, StatePublisher,
};
pub use pubsub::{MemoryPubSub, PubSub, PubSubError, Subscription};

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut tokio::sync::watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
