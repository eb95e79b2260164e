//! All-or-nothing unit of work over [`Storage`].
//!
//! Writes are staged in memory; reads see the staged writes layered over the
//! database. `commit` turns the staged set into one sled batch. Dropping the
//! unit without committing discards everything, which is how every failed
//! block-production attempt rolls back.

use crate::db::{BatchOp, KvStore, Result, Storage};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

type Staged = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

pub struct UnitOfWork<'a> {
    storage: &'a Storage,
    /// `Some(value)` for a staged write, `None` for a staged removal.
    staged: Mutex<Staged>,
}

impl<'a> UnitOfWork<'a> {
    pub fn begin(storage: &'a Storage) -> Self {
        Self {
            storage,
            staged: Mutex::new(BTreeMap::new()),
        }
    }

    fn staged(&self) -> MutexGuard<'_, Staged> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of staged writes and removals.
    pub fn len(&self) -> usize {
        self.staged().len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged().is_empty()
    }

    /// Apply every staged change atomically.
    pub fn commit(self) -> Result<()> {
        let staged = self
            .staged
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if staged.is_empty() {
            return Ok(());
        }

        let ops = staged
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOp::Insert { key, value },
                None => BatchOp::Remove { key },
            })
            .collect();
        self.storage.batch(ops)
    }

    /// Discard every staged change.
    pub fn rollback(self) {}
}

impl KvStore for UnitOfWork<'_> {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.staged().get(key) {
            return Ok(staged.clone());
        }
        self.storage.get_raw(key)
    }

    fn put_raw(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.staged().insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete_raw(&self, key: &[u8]) -> Result<()> {
        self.staged().insert(key.to_vec(), None);
        Ok(())
    }

    fn scan_prefix_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.storage.scan_prefix_raw(prefix)?.into_iter().collect();

        for (key, value) in self.staged().range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_writes_are_invisible_until_commit() {
        let storage = Storage::open_temporary().unwrap();
        let uow = UnitOfWork::begin(&storage);

        uow.put(b"k", &1u64).unwrap();
        assert_eq!(uow.get::<u64>(b"k").unwrap(), Some(1));
        assert_eq!(storage.get::<u64>(b"k").unwrap(), None);

        uow.commit().unwrap();
        assert_eq!(storage.get::<u64>(b"k").unwrap(), Some(1));
    }

    #[test]
    fn test_rollback_discards_everything() {
        let storage = Storage::open_temporary().unwrap();
        storage.put(b"keep", &7u64).unwrap();

        let uow = UnitOfWork::begin(&storage);
        uow.put(b"new", &1u64).unwrap();
        uow.delete_raw(b"keep").unwrap();
        assert!(!uow.contains(b"keep").unwrap());
        assert_eq!(uow.len(), 2);
        uow.rollback();

        assert_eq!(storage.get::<u64>(b"keep").unwrap(), Some(7));
        assert!(!storage.contains(b"new").unwrap());
    }

    #[test]
    fn test_scan_merges_staged_changes() {
        let storage = Storage::open_temporary().unwrap();
        storage.put(b"p:1", &1u64).unwrap();
        storage.put(b"p:2", &2u64).unwrap();
        storage.put(b"q:1", &100u64).unwrap();

        let uow = UnitOfWork::begin(&storage);
        uow.delete_raw(b"p:1").unwrap();
        uow.put(b"p:2", &20u64).unwrap();
        uow.put(b"p:3", &3u64).unwrap();
        uow.put(b"q:2", &200u64).unwrap();

        let values: Vec<u64> = uow.scan_prefix(b"p:").unwrap();
        assert_eq!(values, vec![20, 3]);
    }

    #[test]
    fn test_commit_applies_removals() {
        let storage = Storage::open_temporary().unwrap();
        storage.put(b"gone", &1u64).unwrap();

        let uow = UnitOfWork::begin(&storage);
        uow.delete_raw(b"gone").unwrap();
        uow.commit().unwrap();

        assert!(!storage.contains(b"gone").unwrap());
    }
}
