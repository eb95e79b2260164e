//! Named mutual exclusion.
//!
//! Block production and the token services each run under a named lock.
//! [`KeyedMutex`] is the in-process implementation; a deployment with
//! several processes plugs a shared backend in behind [`DistributedMutex`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Held by the single block producer.
pub const CONSENSUS_LOCK_KEY: &str = "ProofOfAuthorityConsensusMechanism";

/// Held while a token operation picks its nonce and token id.
pub const TOKEN_SERVICES_LOCK_KEY: &str = "token-services";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {0} is held elsewhere")]
    Unavailable(String),
}

#[async_trait]
pub trait DistributedMutex: Send + Sync {
    /// Wait until `key` is free and take it.
    async fn acquire(&self, key: &str) -> Result<LockGuard, LockError>;

    /// Take `key` only if it is free right now.
    async fn try_acquire(&self, key: &str) -> Result<LockGuard, LockError>;
}

/// Releases its lock when dropped, on every exit path.
pub struct LockGuard {
    key: String,
    _held: Box<dyn Send + Sync>,
}

impl LockGuard {
    pub fn new(key: impl Into<String>, held: impl Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            _held: Box::new(held),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!(key = %self.key, "lock released");
    }
}

/// One async mutex per key, created on first use.
#[derive(Clone, Default)]
pub struct KeyedMutex {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl DistributedMutex for KeyedMutex {
    async fn acquire(&self, key: &str) -> Result<LockGuard, LockError> {
        let held: OwnedMutexGuard<()> = self.entry(key).await.lock_owned().await;
        debug!(key, "lock acquired");
        Ok(LockGuard::new(key, held))
    }

    async fn try_acquire(&self, key: &str) -> Result<LockGuard, LockError> {
        let held = self
            .entry(key)
            .await
            .try_lock_owned()
            .map_err(|_| LockError::Unavailable(key.to_string()))?;
        debug!(key, "lock acquired");
        Ok(LockGuard::new(key, held))
    }
}
