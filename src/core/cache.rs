use async_trait::async_trait;
use std::time::Duration;

/// An async key-value cache with optional per-entry expiry.
///
/// Implementations must treat an entry whose expiry has passed as absent on
/// every read, whether or not [`Cache::sweep`] has run since.
#[async_trait]
pub trait Cache<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &K) -> Option<V>;
    async fn put(&self, key: K, value: V, ttl: Option<Duration>);
    async fn remove(&self, key: &K);
    async fn clear(&self);

    /// Drops expired entries and returns how many were evicted.
    async fn sweep(&self) -> usize;
}
