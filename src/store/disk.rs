use crate::core::error::StoreError;
use crate::core::ledger::{LedgerEntry, LedgerStore, NewTransaction, TransactionRecord};
use crate::core::period::SnapshotSeries;
use crate::core::quote::InstrumentProfile;
use crate::core::valuation::{SnapshotStore, ValuationSnapshot};
use async_trait::async_trait;
use fjall::{PartitionCreateOptions, PersistMode, TxKeyspace, TxPartitionHandle};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

const SEPARATOR: char = '\u{0}';
const TRANSACTION_SEQ_KEY: &[u8] = b"transaction_seq";

fn entry_key(account_id: &str, symbol: &str) -> String {
    format!("{account_id}{SEPARATOR}{symbol}")
}

fn account_prefix(account_id: &str) -> String {
    format!("{account_id}{SEPARATOR}")
}

fn transaction_key(account_id: &str, id: u64) -> String {
    // Zero padding keeps lexicographic order equal to commit order
    format!("{account_id}{SEPARATOR}{id:020}")
}

fn snapshot_key(account_id: &str, series: SnapshotSeries, period_key: &str) -> String {
    format!("{account_id}{SEPARATOR}{series}{SEPARATOR}{period_key}")
}

/// Ledger and snapshot store on a transactional fjall keyspace.
///
/// A ledger commit writes the transaction log, the entry and the id
/// sequence in one write transaction and syncs the journal before returning.
pub struct DiskStore {
    keyspace: TxKeyspace,
    ledger: TxPartitionHandle,
    transactions: TxPartitionHandle,
    snapshots: TxPartitionHandle,
    instruments: TxPartitionHandle,
    meta: TxPartitionHandle,
}

impl DiskStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::Backend(format!("Failed to create {}: {}", path.display(), e))
        })?;

        let keyspace = fjall::Config::new(path).open_transactional()?;
        let open = |name: &str| keyspace.open_partition(name, PartitionCreateOptions::default());
        let store = Self {
            ledger: open("ledger")?,
            transactions: open("transactions")?,
            snapshots: open("snapshots")?,
            instruments: open("instruments")?,
            meta: open("meta")?,
            keyspace,
        };
        debug!("Opened ledger store at {}", path.display());
        Ok(store)
    }

    fn read<T: DeserializeOwned>(
        &self,
        partition: &TxPartitionHandle,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let tx = self.keyspace.read_tx();
        match tx.get(partition, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(
        &self,
        partition: &TxPartitionHandle,
        prefix: &str,
    ) -> Result<Vec<T>, StoreError> {
        let tx = self.keyspace.read_tx();
        tx.prefix(partition, prefix.as_bytes())
            .map(|item| {
                let (_, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn write(&self, partition: &TxPartitionHandle, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut tx = self.keyspace.write_tx();
        tx.insert(partition, key.as_bytes(), value);
        tx.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for DiskStore {
    async fn entry(&self, account_id: &str, symbol: &str) -> Result<Option<LedgerEntry>, StoreError> {
        self.read(&self.ledger, &entry_key(account_id, symbol))
    }

    async fn entries(&self, account_id: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        self.scan(&self.ledger, &account_prefix(account_id))
    }

    async fn accounts(&self) -> Result<Vec<String>, StoreError> {
        let tx = self.keyspace.read_tx();
        let mut accounts: Vec<String> = Vec::new();
        for item in tx.iter(&self.ledger) {
            let (key, _) = item?;
            let key = String::from_utf8_lossy(&key);
            let account = key.split(SEPARATOR).next().unwrap_or_default();
            if accounts.last().map(String::as_str) != Some(account) {
                accounts.push(account.to_string());
            }
        }
        Ok(accounts)
    }

    async fn transactions(&self, account_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        self.scan(&self.transactions, &account_prefix(account_id))
    }

    async fn commit(
        &self,
        expected: Option<&LedgerEntry>,
        next: &LedgerEntry,
        transaction: NewTransaction,
    ) -> Result<TransactionRecord, StoreError> {
        let key = entry_key(&next.account_id, &next.symbol);
        let mut tx = self.keyspace.write_tx();

        let stored: Option<LedgerEntry> = match tx.get(&self.ledger, key.as_bytes())? {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        };
        if stored.as_ref() != expected {
            // Dropping the write transaction discards it
            return Err(StoreError::Conflict {
                account_id: next.account_id.clone(),
                symbol: next.symbol.clone(),
            });
        }

        let id = match tx.get(&self.meta, TRANSACTION_SEQ_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes[..].try_into().map_err(|_| {
                    StoreError::Serialization("corrupt transaction sequence".to_string())
                })?;
                u64::from_be_bytes(raw) + 1
            }
            None => 1,
        };
        let record = transaction.into_record(id);

        tx.insert(&self.meta, TRANSACTION_SEQ_KEY, id.to_be_bytes().to_vec());
        tx.insert(
            &self.transactions,
            transaction_key(&record.account_id, id).as_bytes(),
            serde_json::to_vec(&record)?,
        );
        tx.insert(&self.ledger, key.as_bytes(), serde_json::to_vec(next)?);
        tx.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;

        debug!("Committed transaction {} for {}", id, key.replace(SEPARATOR, "/"));
        Ok(record)
    }

    async fn instrument(&self, symbol: &str) -> Result<Option<InstrumentProfile>, StoreError> {
        self.read(&self.instruments, symbol)
    }

    async fn save_instrument(&self, profile: &InstrumentProfile) -> Result<(), StoreError> {
        self.write(&self.instruments, &profile.symbol, serde_json::to_vec(profile)?)
    }
}

#[async_trait]
impl SnapshotStore for DiskStore {
    async fn upsert_snapshot(&self, snapshot: &ValuationSnapshot) -> Result<(), StoreError> {
        let key = snapshot_key(&snapshot.account_id, snapshot.series, &snapshot.period_key);
        self.write(&self.snapshots, &key, serde_json::to_vec(snapshot)?)
    }

    async fn snapshots(
        &self,
        account_id: &str,
        series: SnapshotSeries,
    ) -> Result<Vec<ValuationSnapshot>, StoreError> {
        let prefix = format!("{}{series}{SEPARATOR}", account_prefix(account_id));
        self.scan(&self.snapshots, &prefix)
    }
}
