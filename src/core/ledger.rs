//! Cost-basis ledger per (account, instrument).
//!
//! Every accepted BUY/SELL produces one immutable [`TransactionRecord`] and one
//! [`LedgerEntry`] mutation, committed together through [`LedgerStore::commit`].
//! Entry arithmetic lives in [`LedgerEntry::apply_trade`] and is shared with
//! [`replay`], so the transaction log always reproduces the stored entries.

use crate::core::error::{LedgerError, StoreError};
use crate::core::period::SessionCalendar;
use crate::core::quote::{InstrumentProfile, QuoteSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeKind {
    Buy,
    Sell,
}

impl Display for TradeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TradeKind::Buy => "BUY",
                TradeKind::Sell => "SELL",
            }
        )
    }
}

impl FromStr for TradeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(TradeKind::Buy),
            "SELL" => Ok(TradeKind::Sell),
            _ => Err(anyhow::anyhow!("Invalid trade kind: {}", s)),
        }
    }
}

/// Holding and cost-basis state for one instrument in one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub account_id: String,
    pub symbol: String,
    pub holding_quantity: Decimal,
    /// Amount paid for the units currently held, not lifetime spend.
    pub cost_basis_total: Decimal,
    pub average_cost: Decimal,
    pub realized_gain: Decimal,
    /// Holding as of the close of the session before `last_trade_at`.
    pub previous_day_holding: Decimal,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// An all-zero entry, used when a pair has never traded.
    pub fn new(account_id: &str, symbol: &str) -> Self {
        LedgerEntry {
            account_id: account_id.to_string(),
            symbol: symbol.to_string(),
            holding_quantity: Decimal::ZERO,
            cost_basis_total: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            realized_gain: Decimal::ZERO,
            previous_day_holding: Decimal::ZERO,
            last_trade_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.holding_quantity > Decimal::ZERO
    }

    /// Returns the entry after applying a trade of `quantity` (> 0) units.
    ///
    /// The caller has already rejected sells larger than the holding. Selling
    /// leaves the average cost unchanged and releases cost basis at that
    /// average; a position taken to exactly zero has zero cost basis and
    /// zero average cost. Amounts outside the decimal range are rejected.
    pub fn apply_trade(
        &self,
        kind: TradeKind,
        quantity: Decimal,
        unit_price: Decimal,
        at: DateTime<Utc>,
        calendar: &SessionCalendar,
    ) -> Result<LedgerEntry, LedgerError> {
        let overflow = || {
            LedgerError::Validation(format!(
                "{kind} of {quantity} {} at {unit_price} is out of range",
                self.symbol
            ))
        };
        let mut next = self.clone();

        let new_session = self
            .last_trade_at
            .is_none_or(|last| calendar.session_date(at) > calendar.session_date(last));
        if new_session {
            next.previous_day_holding = self.holding_quantity;
        }

        match kind {
            TradeKind::Buy => {
                let trade_value = unit_price.checked_mul(quantity).ok_or_else(overflow)?;
                next.holding_quantity = self
                    .holding_quantity
                    .checked_add(quantity)
                    .ok_or_else(overflow)?;
                next.cost_basis_total = self
                    .cost_basis_total
                    .checked_add(trade_value)
                    .ok_or_else(overflow)?;
                next.average_cost = if next.holding_quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    next.cost_basis_total
                        .checked_div(next.holding_quantity)
                        .ok_or_else(overflow)?
                };
            }
            TradeKind::Sell => {
                let released = self.average_cost.checked_mul(quantity).ok_or_else(overflow)?;
                let gain = unit_price
                    .checked_sub(self.average_cost)
                    .and_then(|per_unit| per_unit.checked_mul(quantity))
                    .ok_or_else(overflow)?;
                next.holding_quantity = self
                    .holding_quantity
                    .checked_sub(quantity)
                    .ok_or_else(overflow)?;
                next.cost_basis_total = self
                    .cost_basis_total
                    .checked_sub(released)
                    .ok_or_else(overflow)?;
                next.realized_gain = self.realized_gain.checked_add(gain).ok_or_else(overflow)?;
            }
        }

        if next.holding_quantity.is_zero() {
            next.cost_basis_total = Decimal::ZERO;
            next.average_cost = Decimal::ZERO;
        }

        next.last_trade_at = Some(self.last_trade_at.map_or(at, |last| last.max(at)));
        Ok(next)
    }

    /// Holding at the previous session close, as seen at `now`.
    ///
    /// An entry untouched since an earlier session still holds what it held
    /// at that session's close.
    pub fn previous_day_holding_at(&self, now: DateTime<Utc>, calendar: &SessionCalendar) -> Decimal {
        match self.last_trade_at {
            Some(last) if calendar.session_date(last) >= calendar.session_date(now) => {
                self.previous_day_holding
            }
            _ => self.holding_quantity,
        }
    }
}

/// A trade command as received from the caller.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub account_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub kind: TradeKind,
    pub timestamp: DateTime<Utc>,
}

impl TradeRequest {
    pub fn new(
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
        kind: TradeKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        TradeRequest {
            account_id: account_id.trim().to_string(),
            symbol: symbol.trim().to_uppercase(),
            quantity,
            kind,
            timestamp,
        }
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.account_id.is_empty() {
            return Err(LedgerError::Validation("account id is empty".to_string()));
        }
        if self.symbol.is_empty() {
            return Err(LedgerError::Validation("symbol is empty".to_string()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        Ok(())
    }
}

/// A transaction about to be committed; the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub account_id: String,
    pub symbol: String,
    pub signed_quantity: Decimal,
    pub unit_price: Decimal,
    pub kind: TradeKind,
    pub timestamp: DateTime<Utc>,
}

impl NewTransaction {
    pub fn into_record(self, id: u64) -> TransactionRecord {
        TransactionRecord {
            id,
            account_id: self.account_id,
            symbol: self.symbol,
            signed_quantity: self.signed_quantity,
            unit_price: self.unit_price,
            kind: self.kind,
            timestamp: self.timestamp,
        }
    }
}

/// Append-only audit record of an accepted trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: u64,
    pub account_id: String,
    pub symbol: String,
    pub signed_quantity: Decimal,
    pub unit_price: Decimal,
    pub kind: TradeKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryDelta {
    pub holding_change: Decimal,
    pub cost_basis_change: Decimal,
    pub realized_gain_change: Decimal,
}

impl EntryDelta {
    fn between(before: &LedgerEntry, after: &LedgerEntry) -> Self {
        EntryDelta {
            holding_change: after.holding_quantity - before.holding_quantity,
            cost_basis_change: after.cost_basis_total - before.cost_basis_total,
            realized_gain_change: after.realized_gain - before.realized_gain,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Accepted {
    pub transaction: TransactionRecord,
    pub entry: LedgerEntry,
    pub delta: EntryDelta,
}

/// Durable storage for ledger entries, the transaction log and instrument
/// metadata.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn entry(&self, account_id: &str, symbol: &str) -> Result<Option<LedgerEntry>, StoreError>;

    /// All entries of an account, ordered by symbol.
    async fn entries(&self, account_id: &str) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn accounts(&self) -> Result<Vec<String>, StoreError>;

    /// The account's transaction log in commit order.
    async fn transactions(&self, account_id: &str) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Appends `transaction` and replaces the entry with `next` as one atomic
    /// unit, provided the stored entry still equals `expected`. Fails with
    /// [`StoreError::Conflict`] otherwise, with neither write applied.
    async fn commit(
        &self,
        expected: Option<&LedgerEntry>,
        next: &LedgerEntry,
        transaction: NewTransaction,
    ) -> Result<TransactionRecord, StoreError>;

    async fn instrument(&self, symbol: &str) -> Result<Option<InstrumentProfile>, StoreError>;

    async fn save_instrument(&self, profile: &InstrumentProfile) -> Result<(), StoreError>;
}

/// Rebuilds an account's entries from its transaction log.
pub fn replay(
    records: &[TransactionRecord],
    calendar: &SessionCalendar,
) -> Result<BTreeMap<String, LedgerEntry>, LedgerError> {
    let mut ordered: Vec<&TransactionRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.id);

    let mut entries: BTreeMap<String, LedgerEntry> = BTreeMap::new();
    for record in ordered {
        let entry = entries
            .entry(record.symbol.clone())
            .or_insert_with(|| LedgerEntry::new(&record.account_id, &record.symbol));
        *entry = entry.apply_trade(
            record.kind,
            record.signed_quantity.abs(),
            record.unit_price,
            record.timestamp,
            calendar,
        )?;
    }
    Ok(entries)
}

/// A stored entry that disagrees with the replayed transaction log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayMismatch {
    pub symbol: String,
    pub stored: Option<LedgerEntry>,
    pub replayed: Option<LedgerEntry>,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    quotes: Arc<dyn QuoteSource>,
    calendar: SessionCalendar,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        quotes: Arc<dyn QuoteSource>,
        calendar: SessionCalendar,
    ) -> Self {
        Ledger {
            store,
            quotes,
            calendar,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Validates and applies one BUY/SELL command.
    ///
    /// Nothing is written unless the whole command succeeds. Failures are not
    /// retried here: replaying a financial mutation is the caller's decision.
    #[instrument(
        name = "ApplyTransaction",
        skip(self, request),
        fields(account = %request.account_id, symbol = %request.symbol, kind = %request.kind)
    )]
    pub async fn apply_transaction(&self, request: TradeRequest) -> Result<Accepted, LedgerError> {
        request.validate()?;

        let key_lock = self.key_lock(&request.account_id, &request.symbol).await;
        let _guard = key_lock.lock().await;

        let current = self
            .store
            .entry(&request.account_id, &request.symbol)
            .await?;
        let base = current
            .clone()
            .unwrap_or_else(|| LedgerEntry::new(&request.account_id, &request.symbol));

        if request.kind == TradeKind::Sell && request.quantity > base.holding_quantity {
            debug!(
                "Rejecting sell of {} {}: only {} held",
                request.quantity, request.symbol, base.holding_quantity
            );
            return Err(LedgerError::InsufficientHoldings {
                symbol: request.symbol.clone(),
                requested: request.quantity,
                held: base.holding_quantity,
            });
        }

        let (unit_price, onboarded) = self.resolve_price(&request).await?;
        let next = base.apply_trade(
            request.kind,
            request.quantity,
            unit_price,
            request.timestamp,
            &self.calendar,
        )?;

        let signed_quantity = match request.kind {
            TradeKind::Buy => request.quantity,
            TradeKind::Sell => -request.quantity,
        };
        let transaction = NewTransaction {
            account_id: request.account_id.clone(),
            symbol: request.symbol.clone(),
            signed_quantity,
            unit_price,
            kind: request.kind,
            timestamp: request.timestamp,
        };

        let record = self
            .store
            .commit(current.as_ref(), &next, transaction)
            .await?;

        info!(
            transaction_id = record.id,
            quantity = %request.quantity,
            price = %unit_price,
            holding = %next.holding_quantity,
            "Transaction accepted"
        );

        // The trade is durable at this point, so a missing profile is only
        // logged; the next BUY onboards the symbol again.
        if let Some(profile) = onboarded {
            if let Err(e) = self.store.save_instrument(&profile).await {
                warn!(error = %e, "Failed to save instrument profile for {}", profile.symbol);
            }
        }

        Ok(Accepted {
            delta: EntryDelta::between(&base, &next),
            transaction: record,
            entry: next,
        })
    }

    pub async fn entry(&self, account_id: &str, symbol: &str) -> Result<Option<LedgerEntry>, StoreError> {
        self.store.entry(account_id, &symbol.trim().to_uppercase()).await
    }

    pub async fn entries(&self, account_id: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        self.store.entries(account_id).await
    }

    pub async fn transactions(&self, account_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        self.store.transactions(account_id).await
    }

    /// Profile stored when the symbol was first bought.
    pub async fn instrument(&self, symbol: &str) -> Result<Option<InstrumentProfile>, StoreError> {
        self.store.instrument(symbol).await
    }

    pub fn calendar(&self) -> &SessionCalendar {
        &self.calendar
    }

    /// Compares stored entries against a replay of the transaction log.
    pub async fn verify(&self, account_id: &str) -> Result<Vec<ReplayMismatch>, LedgerError> {
        let records = self.store.transactions(account_id).await?;
        let mut replayed = replay(&records, &self.calendar)?;

        let mut mismatches = Vec::new();
        for stored in self.store.entries(account_id).await? {
            let rebuilt = replayed.remove(&stored.symbol);
            if rebuilt.as_ref() != Some(&stored) {
                mismatches.push(ReplayMismatch {
                    symbol: stored.symbol.clone(),
                    stored: Some(stored),
                    replayed: rebuilt,
                });
            }
        }
        for (symbol, rebuilt) in replayed {
            mismatches.push(ReplayMismatch {
                symbol,
                stored: None,
                replayed: Some(rebuilt),
            });
        }

        if !mismatches.is_empty() {
            warn!(
                account = account_id,
                count = mismatches.len(),
                "Ledger entries disagree with transaction log"
            );
        }
        Ok(mismatches)
    }

    /// Current price for the trade, plus the profile of a symbol bought for
    /// the first time. The profile is saved only once the trade commits.
    async fn resolve_price(
        &self,
        request: &TradeRequest,
    ) -> Result<(Decimal, Option<InstrumentProfile>), LedgerError> {
        if request.kind == TradeKind::Buy && self.store.instrument(&request.symbol).await?.is_none() {
            debug!("Onboarding new instrument {}", request.symbol);
            let (profile, quote) = self.quotes.onboard(&request.symbol).await?;
            return Ok((quote.current_price, Some(profile)));
        }
        Ok((self.quotes.quote(&request.symbol).await?.current_price, None))
    }

    async fn key_lock(&self, account_id: &str, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry((account_id.to_string(), symbol.to_string()))
                .or_default(),
        )
    }
}
