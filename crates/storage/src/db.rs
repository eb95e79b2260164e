//! sled database wrapper with serialization helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use std::path::Path;
use thiserror::Error;
use tokenchain_core::{Address, ChainId, Hash, TokenId};

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Key/value access shared by the live database and a staged unit of work.
///
/// Every store in this crate is generic over this trait, so the same account,
/// token, block and mempool logic runs either directly against sled or
/// against an uncommitted [`UnitOfWork`](crate::UnitOfWork).
pub trait KvStore: Send + Sync {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put_raw(&self, key: &[u8], value: Vec<u8>) -> Result<()>;

    fn delete_raw(&self, key: &[u8]) -> Result<()>;

    /// All entries under `prefix`, in key order.
    fn scan_prefix_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn get<V>(&self, key: &[u8]) -> Result<Option<V>>
    where
        Self: Sized,
        V: DeserializeOwned,
    {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<V>(&self, key: &[u8], value: &V) -> Result<()>
    where
        Self: Sized,
        V: Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.put_raw(key, encoded)
    }

    fn contains(&self, key: &[u8]) -> Result<bool>
    where
        Self: Sized,
    {
        Ok(self.get_raw(key)?.is_some())
    }

    /// Decode every value under `prefix`, in key order.
    fn scan_prefix<V>(&self, prefix: &[u8]) -> Result<Vec<V>>
    where
        Self: Sized,
        V: DeserializeOwned,
    {
        self.scan_prefix_raw(prefix)?
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(StorageError::from))
            .collect()
    }
}

/// Wrapper around sled database with serialization helpers.
///
/// Cloning is cheap; clones share the same database.
#[derive(Clone)]
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Next value of a database-wide, monotonically increasing counter.
    pub fn next_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()?)
    }

    /// Apply multiple operations atomically.
    ///
    /// Either every operation becomes visible or none does; sled writes the
    /// batch through its write-ahead log in one step.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in operations {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Subscribe to every insert and removal under `prefix`.
    pub fn watch_prefix(&self, prefix: &[u8]) -> sled::Subscriber {
        self.db.watch_prefix(prefix.to_vec())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Prefix of every account of one chain: "account:" + chain id (BE).
    pub fn account_prefix(chain_id: ChainId) -> Vec<u8> {
        let mut key = b"account:".to_vec();
        key.extend_from_slice(&chain_id.to_be_bytes());
        key
    }

    /// "account:" + chain id (BE) + address. Key order is address order.
    pub fn account_key(chain_id: ChainId, address: &Address) -> Vec<u8> {
        let mut key = Self::account_prefix(chain_id);
        key.extend_from_slice(&address.0);
        key
    }

    pub const TOKEN_PREFIX: &'static [u8] = b"token:";

    /// "token:" + id (BE). Key order is id order.
    pub fn token_key(id: TokenId) -> Vec<u8> {
        let mut key = Self::TOKEN_PREFIX.to_vec();
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    pub const MEMPOOL_PREFIX: &'static [u8] = b"mempool:";

    /// "mempool:" + id (BE). Key order is arrival order.
    pub fn mempool_key(id: u64) -> Vec<u8> {
        let mut key = Self::MEMPOOL_PREFIX.to_vec();
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    pub const REJECTED_PREFIX: &'static [u8] = b"rejected:";

    /// "rejected:" + mempool id (BE).
    pub fn rejected_key(id: u64) -> Vec<u8> {
        let mut key = Self::REJECTED_PREFIX.to_vec();
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    /// "block:hash:" + hash bytes.
    pub fn block_hash_key(hash: &Hash) -> Vec<u8> {
        let mut key = b"block:hash:".to_vec();
        key.extend_from_slice(&hash.0);
        key
    }

    /// "block:number:" + number (BE).
    pub fn block_number_key(number: u64) -> Vec<u8> {
        let mut key = b"block:number:".to_vec();
        key.extend_from_slice(&number.to_be_bytes());
        key
    }

    /// "chain:state:" + chain id (BE).
    pub fn chain_state_key(chain_id: ChainId) -> Vec<u8> {
        let mut key = b"chain:state:".to_vec();
        key.extend_from_slice(&chain_id.to_be_bytes());
        key
    }
}

impl KvStore for Storage {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|value| value.to_vec()))
    }

    fn put_raw(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete_raw(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    fn scan_prefix_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db
            .scan_prefix(prefix)
            .map(|entry| -> Result<(Vec<u8>, Vec<u8>)> {
                let (key, value) = entry?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }
}

/// Batch operation for atomic updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}
