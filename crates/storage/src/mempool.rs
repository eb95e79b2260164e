//! Durable mempool and the rejected-transaction collection.

use crate::db::{KvStore, Result, Storage};
use crate::unit_of_work::UnitOfWork;
use serde::{Deserialize, Serialize};
use tokenchain_core::{current_timestamp_ms, MempoolTransaction, SignedTransaction};

/// A mempool entry that failed validation for good, kept with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedTransaction {
    pub entry: MempoolTransaction,
    pub reason: String,
    /// Unix milliseconds.
    pub rejected_at: u64,
}

/// Pending signed transactions, keyed by their arrival id.
pub struct MempoolStore<'a, S: KvStore> {
    store: &'a S,
}

impl<'a, S: KvStore> MempoolStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn upsert(&self, entry: &MempoolTransaction) -> Result<()> {
        self.store.put(&Storage::mempool_key(entry.id), entry)
    }

    pub fn get(&self, id: u64) -> Result<Option<MempoolTransaction>> {
        self.store.get(&Storage::mempool_key(id))
    }

    pub fn delete_by_id(&self, id: u64) -> Result<()> {
        self.store.delete_raw(&Storage::mempool_key(id))
    }

    /// Every pending entry, oldest first.
    pub fn list(&self) -> Result<Vec<MempoolTransaction>> {
        self.store.scan_prefix(Storage::MEMPOOL_PREFIX)
    }

    /// Stage the move of an entry to the rejected collection.
    pub fn reject(&self, entry: &MempoolTransaction, reason: impl Into<String>) -> Result<()> {
        let rejected = RejectedTransaction {
            entry: entry.clone(),
            reason: reason.into(),
            rejected_at: current_timestamp_ms(),
        };
        self.store.put(&Storage::rejected_key(entry.id), &rejected)?;
        self.delete_by_id(entry.id)
    }

    pub fn list_rejected(&self) -> Result<Vec<RejectedTransaction>> {
        self.store.scan_prefix(Storage::REJECTED_PREFIX)
    }
}

impl MempoolStore<'_, Storage> {
    /// Wrap `signed` with the next arrival id without enqueueing it.
    pub fn prepare(&self, signed: SignedTransaction) -> Result<MempoolTransaction> {
        Ok(MempoolTransaction::new(self.store.next_id()?, signed))
    }

    /// Assign the next arrival id and enqueue.
    pub fn submit(&self, signed: SignedTransaction) -> Result<MempoolTransaction> {
        let entry = self.prepare(signed)?;
        self.upsert(&entry)?;
        Ok(entry)
    }

    /// Move an entry to the rejected collection in one atomic batch.
    pub fn dead_letter(&self, entry: &MempoolTransaction, reason: impl Into<String>) -> Result<()> {
        let uow = UnitOfWork::begin(self.store);
        MempoolStore::new(&uow).reject(entry, reason)?;
        uow.commit()
    }

    /// Stream of entries inserted from now on.
    pub fn watch(&self) -> MempoolWatcher {
        MempoolWatcher {
            subscriber: self.store.watch_prefix(Storage::MEMPOOL_PREFIX),
        }
    }
}

/// Insert notifications for the mempool. Removals are skipped.
pub struct MempoolWatcher {
    subscriber: sled::Subscriber,
}

impl MempoolWatcher {
    /// Wait for the next inserted entry. `None` once the database is closed.
    pub async fn next(&mut self) -> Option<Result<MempoolTransaction>> {
        loop {
            match (&mut self.subscriber).await? {
                sled::Event::Insert { value, .. } => {
                    return Some(bincode::deserialize(&value).map_err(Into::into));
                }
                sled::Event::Remove { .. } => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenchain_core::{Address, Keypair, Transaction};

    fn signed(nonce: u64) -> SignedTransaction {
        let kp = Keypair::generate();
        Transaction::coin(1, nonce, kp.address(), Address::from_bytes([2u8; 20]), 10)
            .sign(&kp)
            .unwrap()
    }

    #[test]
    fn test_submit_assigns_increasing_ids() {
        let storage = Storage::open_temporary().unwrap();
        let mempool = MempoolStore::new(&storage);

        let first = mempool.submit(signed(1)).unwrap();
        let second = mempool.submit(signed(1)).unwrap();
        assert!(second.id > first.id);

        let ids: Vec<u64> = mempool.list().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_delete_by_id() {
        let storage = Storage::open_temporary().unwrap();
        let mempool = MempoolStore::new(&storage);

        let entry = mempool.submit(signed(1)).unwrap();
        mempool.delete_by_id(entry.id).unwrap();
        assert_eq!(mempool.get(entry.id).unwrap(), None);
    }

    #[test]
    fn test_reject_moves_entry() {
        let storage = Storage::open_temporary().unwrap();
        let mempool = MempoolStore::new(&storage);

        let entry = mempool.submit(signed(1)).unwrap();
        mempool.dead_letter(&entry, "insufficient balance").unwrap();

        assert!(mempool.list().unwrap().is_empty());
        let rejected = mempool.list_rejected().unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].entry, entry);
        assert_eq!(rejected[0].reason, "insufficient balance");
    }

    #[test]
    fn test_uncommitted_reject_changes_nothing() {
        let storage = Storage::open_temporary().unwrap();
        let mempool = MempoolStore::new(&storage);
        let entry = mempool.submit(signed(1)).unwrap();

        let uow = UnitOfWork::begin(&storage);
        MempoolStore::new(&uow).reject(&entry, "bad nonce").unwrap();
        assert_eq!(uow.len(), 2);
        drop(uow);

        assert_eq!(mempool.list().unwrap(), vec![entry]);
        assert!(mempool.list_rejected().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_yields_inserts_only() {
        let storage = Storage::open_temporary().unwrap();
        let mempool = MempoolStore::new(&storage);
        let mut watcher = mempool.watch();

        let first = mempool.submit(signed(1)).unwrap();
        mempool.delete_by_id(first.id).unwrap();
        let second = mempool.submit(signed(1)).unwrap();

        assert_eq!(watcher.next().await.unwrap().unwrap(), first);
        assert_eq!(watcher.next().await.unwrap().unwrap(), second);
    }
}
