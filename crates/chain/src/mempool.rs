//! Mempool change detection.
//!
//! The detector is the mempool's only consumer. It first replays every entry
//! already pending (left over from a previous run, or from transient
//! failures) in arrival order, then forwards new insertions in the order
//! they land. Builders for different senders may insert out of id order, so
//! every live insert is forwarded.

use std::collections::HashSet;
use tokenchain_core::MempoolTransaction;
use tokenchain_storage::{MempoolStore, Storage, StorageError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pending transactions buffered between the detector and the producer.
const CHANNEL_CAPACITY: usize = 128;

/// Start the detector. Stops on shutdown, when the database closes, or when
/// the receiver is dropped.
pub fn spawn_mempool_detector(
    storage: &Storage,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(JoinHandle<()>, mpsc::Receiver<MempoolTransaction>), StorageError> {
    let mempool = MempoolStore::new(storage);

    // Subscribe before reading the backlog so nothing inserted in between
    // is missed; such entries show up twice and the live copy is dropped.
    let mut watcher = mempool.watch();
    let backlog = mempool.list()?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut replayed: HashSet<u64> = backlog.iter().map(|entry| entry.id).collect();

        if !backlog.is_empty() {
            info!(pending = backlog.len(), "replaying mempool backlog");
        }
        for entry in backlog {
            if tx.send(entry).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = watcher.next() => match event {
                    Some(Ok(entry)) if replayed.remove(&entry.id) => {
                        debug!(id = entry.id, "skipping already replayed entry");
                    }
                    Some(Ok(entry)) => {
                        if tx.send(entry).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => warn!(error = %err, "undecodable mempool entry"),
                    None => break,
                },
            }
        }
        info!("mempool detector stopped");
    });

    Ok((handle, rx))
}
