use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Notify;

use crate::{EphemeralStore, LockError, LockStore};

/// How often a blocked acquirer re-checks the lock table, in case a release
/// notification was missed between the table check and the wait
const LOCK_RECHECK_INTERVAL: Duration = Duration::from_millis(25);

fn unpoisoned<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Debug)]
struct ExpiringEntry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl ExpiringEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| deadline <= now)
    }
}

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashMap<String, Instant>>,
    released: Notify,
}

/// An in-memory [EphemeralStore] and [LockStore] in one: a single
/// coordinator shared by every worker in a test or single-process
/// deployment. Cloning shares the underlying state.
#[derive(Clone, Debug, Default)]
pub struct MemoryCoordinator {
    entries: Arc<Mutex<HashMap<Vec<u8>, ExpiringEntry>>>,
    locks: Arc<LockTable>,
}

impl MemoryCoordinator {
    /// Creates a new, empty [MemoryCoordinator]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EphemeralStore for MemoryCoordinator {
    async fn set_key<K, V>(&self, key: K, value: V, ttl: Option<Duration>) -> Result<()>
    where
        K: AsRef<[u8]> + Send,
        V: Serialize + Send,
    {
        let bytes = serde_json::to_vec(&value)?;
        let mut entries = unpoisoned(&self.entries);
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(
            key.as_ref().to_vec(),
            ExpiringEntry {
                bytes,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn get_key<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]> + Send,
        V: DeserializeOwned + Send,
    {
        let entries = unpoisoned(&self.entries);
        match entries.get(key.as_ref()) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                Ok(Some(serde_json::from_slice(&entry.bytes)?))
            }
            _ => Ok(None),
        }
    }

    async fn unset_key<K>(&self, key: K) -> Result<()>
    where
        K: AsRef<[u8]> + Send,
    {
        unpoisoned(&self.entries).remove(key.as_ref());
        Ok(())
    }
}

/// Lease over a set of keys in a [MemoryCoordinator]; every key releases
/// when this drops
#[derive(Debug)]
pub struct MemoryLease {
    keys: Vec<String>,
    table: Arc<LockTable>,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        let mut held = unpoisoned(&self.table.held);
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.table.released.notify_waiters();
    }
}

#[async_trait]
impl LockStore for MemoryCoordinator {
    type Lease = MemoryLease;

    async fn acquire(
        &self,
        keys: Vec<String>,
        wait: Duration,
        ttl: Duration,
    ) -> Result<Self::Lease, LockError> {
        let deadline = Instant::now() + wait;

        loop {
            {
                let mut held = unpoisoned(&self.locks.held);
                let now = Instant::now();
                held.retain(|_, expiry| *expiry > now);

                if keys.iter().all(|key| !held.contains_key(key)) {
                    for key in &keys {
                        held.insert(key.clone(), now + ttl);
                    }
                    trace!("Acquired {} lock keys", keys.len());
                    return Ok(MemoryLease {
                        keys,
                        table: self.locks.clone(),
                    });
                }
            }

            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return Err(LockError::Timeout(wait)),
            };

            let _ = tokio::time::timeout(
                remaining.min(LOCK_RECHECK_INTERVAL),
                self.locks.released.notified(),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn it_stores_and_expires_values() -> Result<()> {
        let store = MemoryCoordinator::new();

        store.set_key("stable", 7u32, None).await?;
        store
            .set_key("fleeting", 9u32, Some(Duration::from_millis(20)))
            .await?;

        assert_eq!(store.get_key::<_, u32>("stable").await?, Some(7));
        assert_eq!(store.get_key::<_, u32>("fleeting").await?, Some(9));

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get_key::<_, u32>("stable").await?, Some(7));
        assert_eq!(store.get_key::<_, u32>("fleeting").await?, None);

        store.unset_key("stable").await?;
        assert_eq!(store.get_key::<_, u32>("stable").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn it_acquires_disjoint_key_sets_concurrently() -> Result<()> {
        let store = MemoryCoordinator::new();

        let first = store
            .acquire(
                vec!["a".into(), "b".into()],
                Duration::from_millis(100),
                Duration::from_secs(5),
            )
            .await?;
        let second = store
            .acquire(
                vec!["c".into()],
                Duration::from_millis(100),
                Duration::from_secs(5),
            )
            .await?;

        drop(first);
        drop(second);
        Ok(())
    }

    #[tokio::test]
    async fn it_blocks_overlapping_key_sets_until_release() -> Result<()> {
        let store = MemoryCoordinator::new();

        let lease = store
            .acquire(
                vec!["a".into(), "b".into()],
                Duration::from_millis(100),
                Duration::from_secs(5),
            )
            .await?;

        // Overlap on "b": times out while the first lease is held.
        let contender = store
            .acquire(
                vec!["b".into(), "c".into()],
                Duration::from_millis(50),
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(contender, Err(LockError::Timeout(_))));

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .acquire(
                        vec!["b".into(), "c".into()],
                        Duration::from_secs(2),
                        Duration::from_secs(5),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(lease);

        assert!(waiter.await?.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn it_treats_expired_leases_as_released() -> Result<()> {
        let store = MemoryCoordinator::new();

        let stale = store
            .acquire(
                vec!["a".into()],
                Duration::from_millis(50),
                Duration::from_millis(10),
            )
            .await?;

        tokio::time::sleep(Duration::from_millis(30)).await;

        // The stale lease's ttl has lapsed, so a contender may take the key
        // even though the lease was never dropped.
        let fresh = store
            .acquire(
                vec!["a".into()],
                Duration::from_millis(50),
                Duration::from_secs(5),
            )
            .await;
        assert!(fresh.is_ok());

        drop(stale);
        Ok(())
    }
}
