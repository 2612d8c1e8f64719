use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by [LockStore::acquire]
#[derive(Error, Debug)]
pub enum LockError {
    /// The full key set could not be acquired within the caller's wait
    /// budget
    #[error("Timed out acquiring locks after {0:?}")]
    Timeout(Duration),

    /// Any other backend failure
    #[error("{0}")]
    Other(anyhow::Error),
}

/// A [LockStore] provides an all-or-nothing mutex over a set of keys,
/// shared across workers and processes.
///
/// Acquisition is atomic over the whole key set: either every key is taken
/// or none is, and contending acquirers wait up to their own `wait` budget.
/// The returned lease releases every key when dropped, so locks are held
/// across suspension points and released on every exit path, panics
/// included. `ttl` bounds how long a lease may outlive a worker that never
/// drops it (a crashed process, a lost connection).
#[async_trait]
pub trait LockStore: Clone + Send + Sync {
    /// The held-locks handle; dropping it releases every key
    type Lease: Send + Sync + 'static;

    /// Acquire all of `keys`, waiting up to `wait` for contenders to
    /// release them
    async fn acquire(
        &self,
        keys: Vec<String>,
        wait: Duration,
        ttl: Duration,
    ) -> Result<Self::Lease, LockError>;
}
