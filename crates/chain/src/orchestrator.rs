//! The authority's block-production loop.
//!
//! One pending transaction becomes one block:
//!
//! ```text
//! wait for tx ─► validate ─► apply ledger ─► assemble (roots, Merkle)
//!      ▲                                          │
//!      │                                          ▼
//!  delete entry ◄─ publish head ◄─ persist ◄─ sign ◄─ solve PoW
//! ```
//!
//! Everything from validation to the mempool deletion runs inside one
//! [`UnitOfWork`]; any failure drops it and leaves the ledger untouched.

use crate::ledger::{LedgerEngine, LedgerError};
use crate::lock::{DistributedMutex, LockError, CONSENSUS_LOCK_KEY};
use crate::publisher::{PublishError, RetryPolicy, StatePublisher};
use crate::wait_for_shutdown;
use std::sync::Arc;
use thiserror::Error;
use tokenchain_consensus::{
    Authority, ConsensusError, ProofOfWork, TransactionValidator, ValidationError,
};
use tokenchain_core::{
    current_timestamp_ms, Block, BlockData, BlockHeader, BlockTransaction, ChainId, Hash,
    MempoolTransaction,
};
use tokenchain_storage::{
    AccountStore, BlockStore, ChainStateStore, MempoolStore, Storage, StorageError, TokenStore,
    UnitOfWork,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("ledger update failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("consensus failed: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("chain {0} has no head; run genesis first")]
    MissingChainState(ChainId),

    #[error("head block {0} is missing")]
    MissingBlock(Hash),

    #[error("block number overflow")]
    BlockNumberOverflow,

    #[error("proof-of-work task failed: {0}")]
    Worker(String),
}

impl OrchestratorError {
    /// Whether the transaction itself is at fault and must never be retried.
    pub fn is_terminal(&self) -> bool {
        match self {
            OrchestratorError::Validation(err) => err.is_terminal(),
            OrchestratorError::Ledger(err) => err.is_terminal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// What became of one pending transaction.
#[derive(Debug)]
pub enum Outcome {
    Committed(BlockData),
    /// Terminal failure; the entry was moved to the rejected collection.
    Rejected(OrchestratorError),
    /// Transient failure; the entry stays in the mempool and is retried
    /// before anything queued behind it.
    Deferred(OrchestratorError),
}

pub struct Orchestrator {
    storage: Storage,
    chain_id: ChainId,
    authority: Authority,
    validator: TransactionValidator,
    ledger: LedgerEngine,
    publisher: StatePublisher,
    lock: Arc<dyn DistributedMutex>,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        storage: Storage,
        chain_id: ChainId,
        authority: Authority,
        publisher: StatePublisher,
        lock: Arc<dyn DistributedMutex>,
    ) -> Self {
        let ledger = LedgerEngine::new(chain_id, authority.address());
        Self {
            storage,
            chain_id,
            authority,
            validator: TransactionValidator::new(chain_id),
            ledger,
            publisher,
            lock,
            retry: RetryPolicy::default(),
        }
    }

    /// Backoff between retries of a deferred transaction. Only the delays
    /// are used; a deferred transaction is retried until it settles or the
    /// producer stops.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Produce blocks until shutdown or until `pending` closes.
    ///
    /// The consensus lock is held for the whole run, so a second producer
    /// waits here until this one stops.
    pub async fn run(
        &self,
        mut pending: mpsc::Receiver<MempoolTransaction>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let _guard = tokio::select! {
            guard = self.lock.acquire(CONSENSUS_LOCK_KEY) => guard?,
            _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
        };
        info!(
            chain_id = self.chain_id,
            authority = %self.authority.address(),
            "block producer started"
        );

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                next = pending.recv() => match next {
                    Some(entry) => self.settle(entry, &mut shutdown).await,
                    None => break,
                },
            }
        }

        info!(chain_id = self.chain_id, "block producer stopped");
        Ok(())
    }

    /// Handle `entry` until it is committed or rejected, backing off between
    /// transient failures, so later entries of the same sender never run
    /// ahead of it. Returns early on shutdown.
    async fn settle(&self, entry: MempoolTransaction, shutdown: &mut watch::Receiver<bool>) {
        let mut attempt = 1u32;
        while let Outcome::Deferred(_) = self.handle(entry.clone(), shutdown).await {
            let delay = self.retry.backoff(attempt);
            info!(
                tx_id = entry.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying deferred transaction"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(shutdown) => return,
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// Turn one pending transaction into a block, logging and classifying
    /// any failure.
    pub async fn handle(
        &self,
        entry: MempoolTransaction,
        shutdown: &watch::Receiver<bool>,
    ) -> Outcome {
        match self.produce_block(&entry, shutdown).await {
            Ok(block) => {
                info!(
                    number = block.number(),
                    hash = %block.hash,
                    tx_id = entry.id,
                    nonce = entry.nonce,
                    from = %entry.from,
                    to = %entry.to,
                    "block committed"
                );
                Outcome::Committed(block)
            }
            Err(err) if err.is_terminal() => {
                warn!(
                    tx_id = entry.id,
                    nonce = entry.nonce,
                    from = %entry.from,
                    to = %entry.to,
                    error = %err,
                    "transaction rejected"
                );
                let mempool = MempoolStore::new(&self.storage);
                if let Err(store_err) = mempool.dead_letter(&entry, err.to_string()) {
                    error!(tx_id = entry.id, error = %store_err, "failed to dead-letter transaction");
                }
                Outcome::Rejected(err)
            }
            Err(err) => {
                error!(
                    tx_id = entry.id,
                    nonce = entry.nonce,
                    from = %entry.from,
                    to = %entry.to,
                    error = %err,
                    "block production failed; transaction left pending"
                );
                Outcome::Deferred(err)
            }
        }
    }

    /// Validate through delete, inside one unit of work.
    pub async fn produce_block(
        &self,
        entry: &MempoolTransaction,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<BlockData> {
        let uow = UnitOfWork::begin(&self.storage);

        self.validator.validate(&uow, entry)?;

        let head = ChainStateStore::new(&uow)
            .get_by_chain_id(self.chain_id)?
            .ok_or(OrchestratorError::MissingChainState(self.chain_id))?;
        let parent = BlockStore::new(&uow)
            .get_by_hash(&head.latest_hash)?
            .ok_or(OrchestratorError::MissingBlock(head.latest_hash))?;

        let outcome = self.ledger.apply(&uow, entry, &head)?;

        let timestamp = current_timestamp_ms();
        let header = BlockHeader {
            chain_id: self.chain_id,
            number: head
                .latest_block_number
                .checked_add(1)
                .ok_or(OrchestratorError::BlockNumberOverflow)?,
            prev_hash: head.latest_hash,
            timestamp,
            difficulty: parent.header.difficulty,
            beneficiary: self.authority.address(),
            transaction_fee: head.transaction_fee,
            state_root: AccountStore::new(&uow, self.chain_id).hash_state()?,
            transactions_root: Hash::ZERO,
            nonce: 0,
            latest_token_id: outcome.latest_token_id,
            tokens_root: TokenStore::new(&uow).hash_state()?,
        };
        let included = BlockTransaction::new(entry.signed.clone(), timestamp, outcome.fee);
        let mut block = Block::new(header, vec![included]);

        block.header = self.solve(block.header.clone(), shutdown).await?;
        let signature = self.authority.sign_header(&block.header, &parent)?;
        let block = BlockData::new(block, signature, self.authority.validator().clone());

        BlockStore::new(&uow).upsert(&block)?;
        let next_head = head.advanced_to(&block);
        ChainStateStore::new(&uow).upsert_by_chain_id(&next_head)?;

        self.publisher.publish(&next_head, shutdown).await?;

        MempoolStore::new(&uow).delete_by_id(entry.id)?;
        uow.commit()?;
        Ok(block)
    }

    /// Run the nonce search off the async workers.
    async fn solve(
        &self,
        mut header: BlockHeader,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<BlockHeader> {
        let cancel = shutdown.clone();
        tokio::task::spawn_blocking(move || -> Result<BlockHeader> {
            ProofOfWork::solve(&mut header, &cancel)?;
            Ok(header)
        })
        .await
        .map_err(|err| OrchestratorError::Worker(err.to_string()))?
    }
}
