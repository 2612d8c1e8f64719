use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// An [EphemeralStore] is a shared, process-external store for short-lived
/// coordination records: idempotency markers, completion stamps and the
/// like. Values are serializable, keyed by bytes, and may carry an expiry
/// after which reads behave as if the key were never set.
#[async_trait]
pub trait EphemeralStore: Clone + Send + Sync {
    /// Given some key that can be realized as bytes, persist a serializable
    /// value so that it can later be retrieved by that key. When `ttl` is
    /// provided the value vanishes after that duration.
    async fn set_key<K, V>(&self, key: K, value: V, ttl: Option<Duration>) -> Result<()>
    where
        K: AsRef<[u8]> + Send,
        V: Serialize + Send;

    /// Given some key that can be realized as bytes, retrieve some data that
    /// can be deserialized as the intended data structure. Expired values
    /// read as absent.
    async fn get_key<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]> + Send,
        V: DeserializeOwned + Send;

    /// Given some key that can be realized as bytes, unset the value stored
    /// against that key (if any)
    async fn unset_key<K>(&self, key: K) -> Result<()>
    where
        K: AsRef<[u8]> + Send;
}
