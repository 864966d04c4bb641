use crate::core::cache::Cache;
use crate::core::error::StoreError;
use crate::core::ledger::{LedgerEntry, LedgerStore, NewTransaction, TransactionRecord};
use crate::core::period::SnapshotSeries;
use crate::core::quote::InstrumentProfile;
use crate::core::valuation::{SnapshotStore, ValuationSnapshot};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

struct CacheValue<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheValue<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// In-memory cache implementation using HashMap and Mutex
pub struct MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Mutex<HashMap<K, CacheValue<V>>>>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new MemoryCache instance
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Spawns a task that sweeps expired entries every `every`.
    ///
    /// The task holds a weak reference and exits once the cache is dropped.
    pub fn spawn_sweeper(cache: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    debug!("Cache dropped, stopping sweeper");
                    break;
                };
                let evicted = cache.sweep().await;
                if evicted > 0 {
                    debug!("Cache SWEEP evicted {} entries", evicted);
                }
            }
        })
    }
}

impl<K, V> Default for MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new MemoryCache instance with default settings
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Cache<K, V> for MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        let cache = self.inner.lock().await;
        if let Some(entry) = cache.get(key) {
            if entry.is_expired(Instant::now()) {
                debug!("Cache entry expired for key: {:?}", key);
                return None;
            }
            debug!("Cache HIT for key: {:?}", key);
            return Some(entry.value.clone());
        }
        debug!("Cache MISS for key: {:?}", key);
        None
    }

    async fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = ttl.map(|duration| Instant::now() + duration);
        let cache_value = CacheValue { value, expires_at };

        let mut cache = self.inner.lock().await;
        debug!("Cache PUT for key: {:?}", key);
        cache.insert(key, cache_value);
    }

    async fn remove(&self, key: &K) {
        let mut cache = self.inner.lock().await;
        cache.remove(key);
        debug!("Cache REMOVE for key: {:?}", key);
    }

    async fn clear(&self) {
        let mut cache = self.inner.lock().await;
        cache.clear();
        debug!("Cache CLEAR");
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.inner.lock().await;
        let before = cache.len();
        cache.retain(|_, entry| !entry.is_expired(now));
        before - cache.len()
    }
}

#[derive(Default)]
struct MemoryTables {
    entries: BTreeMap<(String, String), LedgerEntry>,
    transactions: BTreeMap<String, Vec<TransactionRecord>>,
    snapshots: BTreeMap<(String, SnapshotSeries, String), ValuationSnapshot>,
    instruments: HashMap<String, InstrumentProfile>,
    next_transaction_id: u64,
}

/// Ledger and snapshot store kept entirely in process memory.
///
/// All tables sit behind one lock, so a commit is atomic with respect to
/// every reader.
#[derive(Default)]
pub struct MemoryStore {
    tables: StdMutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn overwrite_entry(&self, entry: LedgerEntry) {
        self.tables()
            .entries
            .insert((entry.account_id.clone(), entry.symbol.clone()), entry);
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn entry(&self, account_id: &str, symbol: &str) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .tables()
            .entries
            .get(&(account_id.to_string(), symbol.to_string()))
            .cloned())
    }

    async fn entries(&self, account_id: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .tables()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn accounts(&self) -> Result<Vec<String>, StoreError> {
        let accounts: BTreeSet<String> = self
            .tables()
            .entries
            .keys()
            .map(|(account, _)| account.clone())
            .collect();
        Ok(accounts.into_iter().collect())
    }

    async fn transactions(&self, account_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self
            .tables()
            .transactions
            .get(account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(
        &self,
        expected: Option<&LedgerEntry>,
        next: &LedgerEntry,
        transaction: NewTransaction,
    ) -> Result<TransactionRecord, StoreError> {
        let mut tables = self.tables();
        let key = (next.account_id.clone(), next.symbol.clone());
        if tables.entries.get(&key) != expected {
            return Err(StoreError::Conflict {
                account_id: key.0,
                symbol: key.1,
            });
        }

        tables.next_transaction_id += 1;
        let record = transaction.into_record(tables.next_transaction_id);
        tables
            .transactions
            .entry(record.account_id.clone())
            .or_default()
            .push(record.clone());
        tables.entries.insert(key, next.clone());
        Ok(record)
    }

    async fn instrument(&self, symbol: &str) -> Result<Option<InstrumentProfile>, StoreError> {
        Ok(self.tables().instruments.get(symbol).cloned())
    }

    async fn save_instrument(&self, profile: &InstrumentProfile) -> Result<(), StoreError> {
        self.tables()
            .instruments
            .insert(profile.symbol.clone(), profile.clone());
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn upsert_snapshot(&self, snapshot: &ValuationSnapshot) -> Result<(), StoreError> {
        self.tables().snapshots.insert(
            (
                snapshot.account_id.clone(),
                snapshot.series,
                snapshot.period_key.clone(),
            ),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn snapshots(
        &self,
        account_id: &str,
        series: SnapshotSeries,
    ) -> Result<Vec<ValuationSnapshot>, StoreError> {
        Ok(self
            .tables()
            .snapshots
            .values()
            .filter(|s| s.account_id == account_id && s.series == series)
            .cloned()
            .collect())
    }
}
