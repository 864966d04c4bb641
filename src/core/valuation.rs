//! Point-in-time portfolio valuation and snapshot history.
use crate::core::error::{PartialDataWarning, QuoteError, StoreError, ValuationError};
use crate::core::ledger::{LedgerEntry, LedgerStore};
use crate::core::period::{SessionCalendar, SnapshotSeries};
use crate::core::quote::{Quote, QuoteSource, percent_of};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Most recent valuation computed for an account within one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationSnapshot {
    pub account_id: String,
    pub series: SnapshotSeries,
    pub period_key: String,
    pub total_valuation: Decimal,
    pub computed_at: DateTime<Utc>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Inserts or replaces the snapshot for (account, series, period).
    async fn upsert_snapshot(&self, snapshot: &ValuationSnapshot) -> Result<(), StoreError>;

    /// Snapshots of one series, ordered by period key.
    async fn snapshots(
        &self,
        account_id: &str,
        series: SnapshotSeries,
    ) -> Result<Vec<ValuationSnapshot>, StoreError>;
}

/// Valuation of a single active holding.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingValuation {
    pub symbol: String,
    pub name: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub previous_close: Decimal,
    pub current_value: Decimal,
    pub yesterday_value: Decimal,
    pub cost_basis: Decimal,
    pub overall_pl: Decimal,
    pub today_pl: Decimal,
    pub weight: Decimal,
}

#[derive(Debug, Clone)]
pub struct ValuationReport {
    pub account_id: String,
    pub computed_at: DateTime<Utc>,
    pub total_valuation: Decimal,
    pub total_invested: Decimal,
    pub overall_pl: Decimal,
    pub overall_pl_percent: Decimal,
    pub today_pl: Decimal,
    pub today_pl_percent: Decimal,
    /// Booked gains across every entry, flat ones included.
    pub realized_gain: Decimal,
    pub holdings: Vec<HoldingValuation>,
    pub warnings: Vec<PartialDataWarning>,
}

impl ValuationReport {
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Values an account's entries against the resolved quotes.
///
/// Active entries without a quote are skipped with a warning. Fails only if
/// there were active entries and none of them could be priced.
pub fn value_entries(
    account_id: &str,
    entries: &[LedgerEntry],
    quotes: &HashMap<String, Result<Quote, QuoteError>>,
    now: DateTime<Utc>,
    calendar: &SessionCalendar,
) -> Result<ValuationReport, ValuationError> {
    let mut holdings = Vec::new();
    let mut warnings = Vec::new();
    let mut total_valuation = Decimal::ZERO;
    let mut total_invested = Decimal::ZERO;
    let mut yesterday_total = Decimal::ZERO;

    for entry in entries.iter().filter(|e| e.is_active()) {
        let quote = match quotes.get(&entry.symbol) {
            Some(Ok(quote)) => quote,
            Some(Err(e)) => {
                warnings.push(PartialDataWarning {
                    symbol: entry.symbol.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
            None => {
                warnings.push(PartialDataWarning {
                    symbol: entry.symbol.clone(),
                    reason: "no quote requested".to_string(),
                });
                continue;
            }
        };

        let values = entry
            .holding_quantity
            .checked_mul(quote.current_price)
            .zip(
                entry
                    .previous_day_holding_at(now, calendar)
                    .checked_mul(quote.previous_close),
            )
            .and_then(|(current, yesterday)| {
                Some((
                    current,
                    yesterday,
                    total_valuation.checked_add(current)?,
                    total_invested.checked_add(entry.cost_basis_total)?,
                    yesterday_total.checked_add(yesterday)?,
                ))
            });
        let Some((current_value, yesterday_value, valuation, invested, yesterday)) = values else {
            warn!("Value of {} {} is out of range", entry.holding_quantity, entry.symbol);
            warnings.push(PartialDataWarning {
                symbol: entry.symbol.clone(),
                reason: "value out of range".to_string(),
            });
            continue;
        };
        total_valuation = valuation;
        total_invested = invested;
        yesterday_total = yesterday;

        holdings.push(HoldingValuation {
            symbol: entry.symbol.clone(),
            name: quote.display_name.clone(),
            quantity: entry.holding_quantity,
            price: quote.current_price,
            previous_close: quote.previous_close,
            current_value,
            yesterday_value,
            cost_basis: entry.cost_basis_total,
            overall_pl: current_value - entry.cost_basis_total,
            today_pl: current_value - yesterday_value,
            weight: Decimal::ZERO,
        });
    }

    if holdings.is_empty() && !warnings.is_empty() {
        return Err(ValuationError::NoPricesResolved {
            account_id: account_id.to_string(),
            symbols: warnings.into_iter().map(|w| w.symbol).collect(),
        });
    }

    for holding in &mut holdings {
        holding.weight = percent_of(holding.current_value, total_valuation);
    }

    let overall_pl = total_valuation - total_invested;
    let today_pl = total_valuation - yesterday_total;

    Ok(ValuationReport {
        account_id: account_id.to_string(),
        computed_at: now,
        total_valuation,
        total_invested,
        overall_pl,
        overall_pl_percent: percent_of(overall_pl, total_invested),
        today_pl,
        today_pl_percent: percent_of(today_pl, yesterday_total),
        realized_gain: entries
            .iter()
            .try_fold(Decimal::ZERO, |sum, e| sum.checked_add(e.realized_gain))
            .unwrap_or_else(|| {
                warn!("Realized gain of {account_id} is out of range");
                Decimal::ZERO
            }),
        holdings,
        warnings,
    })
}

pub struct ValuationService {
    ledger: Arc<dyn LedgerStore>,
    snapshots: Arc<dyn SnapshotStore>,
    quotes: Arc<dyn QuoteSource>,
    calendar: SessionCalendar,
}

impl ValuationService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        snapshots: Arc<dyn SnapshotStore>,
        quotes: Arc<dyn QuoteSource>,
        calendar: SessionCalendar,
    ) -> Self {
        ValuationService {
            ledger,
            snapshots,
            quotes,
            calendar,
        }
    }

    pub async fn compute_valuation(&self, account_id: &str) -> Result<ValuationReport, ValuationError> {
        self.compute_valuation_at(account_id, Utc::now()).await
    }

    /// Values the account as of `now` and upserts its daily and hourly
    /// snapshots for the periods containing `now`.
    pub async fn compute_valuation_at(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ValuationReport, ValuationError> {
        let entries = self.ledger.entries(account_id).await?;

        let quote_futures = entries.iter().filter(|e| e.is_active()).map(|entry| async move {
            let quote = self.quotes.quote(&entry.symbol).await;
            (entry.symbol.clone(), quote)
        });
        let quotes: HashMap<String, Result<Quote, QuoteError>> =
            join_all(quote_futures).await.into_iter().collect();

        let report = value_entries(account_id, &entries, &quotes, now, &self.calendar)?;
        for warning in &report.warnings {
            warn!(account = account_id, "Partial valuation: {}", warning);
        }

        for series in [SnapshotSeries::Daily, SnapshotSeries::Hourly] {
            let snapshot = ValuationSnapshot {
                account_id: account_id.to_string(),
                series,
                period_key: self.calendar.period_key(series, now),
                total_valuation: report.total_valuation,
                computed_at: now,
            };
            self.snapshots.upsert_snapshot(&snapshot).await?;
            debug!(
                "Stored {} snapshot {} for {}",
                series, snapshot.period_key, account_id
            );
        }

        info!(
            account = account_id,
            total = %report.total_valuation,
            holdings = report.holdings.len(),
            skipped = report.warnings.len(),
            "Valuation computed"
        );
        Ok(report)
    }

    pub async fn history(
        &self,
        account_id: &str,
        series: SnapshotSeries,
    ) -> Result<Vec<ValuationSnapshot>, StoreError> {
        self.snapshots.snapshots(account_id, series).await
    }

    /// Recomputes every account with at most `concurrency` valuations in
    /// flight. `on_done` is called once per finished account.
    pub async fn revalue_all(
        &self,
        concurrency: usize,
        on_done: &(dyn Fn() + Send + Sync),
    ) -> Result<Vec<(String, Result<ValuationReport, ValuationError>)>, StoreError> {
        let accounts = self.ledger.accounts().await?;
        let now = Utc::now();

        let results = stream::iter(accounts)
            .map(|account_id| async move {
                let result = self.compute_valuation_at(&account_id, now).await;
                on_done();
                (account_id, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        Ok(results)
    }

    pub async fn accounts(&self) -> Result<Vec<String>, StoreError> {
        self.ledger.accounts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::{NewTransaction, TradeKind};
    use crate::core::quote::InstrumentProfile;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    struct FixedQuotes {
        quotes: StdMutex<HashMap<String, Quote>>,
    }

    impl FixedQuotes {
        fn new(quotes: &[(&str, Decimal, Decimal)]) -> Self {
            let quotes = quotes
                .iter()
                .map(|(symbol, price, prev)| (symbol.to_string(), Quote::new(symbol, *price, *prev, "INR")))
                .collect();
            Self {
                quotes: StdMutex::new(quotes),
            }
        }
    }

    #[async_trait]
    impl QuoteSource for FixedQuotes {
        async fn quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
            self.quotes
                .lock()
                .unwrap()
                .get(symbol)
                .cloned()
                .ok_or_else(|| QuoteError::Unavailable {
                    symbol: symbol.to_string(),
                    attempts: 3,
                    reason: "provider down".to_string(),
                })
        }

        async fn onboard(&self, _symbol: &str) -> Result<(InstrumentProfile, Quote), QuoteError> {
            unreachable!("valuation never onboards")
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    async fn seed(store: &MemoryStore, account: &str, symbol: &str, quantity: Decimal, price: Decimal, when: DateTime<Utc>) {
        let current = store.entry(account, symbol).await.unwrap();
        let base = current
            .clone()
            .unwrap_or_else(|| LedgerEntry::new(account, symbol));
        let next = base
            .apply_trade(TradeKind::Buy, quantity, price, when, &SessionCalendar::utc())
            .unwrap();
        store
            .commit(
                current.as_ref(),
                &next,
                NewTransaction {
                    account_id: account.to_string(),
                    symbol: symbol.to_string(),
                    signed_quantity: quantity,
                    unit_price: price,
                    kind: TradeKind::Buy,
                    timestamp: when,
                },
            )
            .await
            .unwrap();
    }

    fn service(store: Arc<MemoryStore>, quotes: FixedQuotes) -> ValuationService {
        ValuationService::new(store.clone(), store, Arc::new(quotes), SessionCalendar::utc())
    }

    #[tokio::test]
    async fn test_valuation_totals_and_day_change() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "acc-1", "AAA", dec!(10), dec!(100), at(2, 10)).await;
        seed(&store, "acc-1", "BBB", dec!(5), dec!(40), at(2, 10)).await;

        let quotes = FixedQuotes::new(&[("AAA", dec!(120), dec!(110)), ("BBB", dec!(50), dec!(50))]);
        let report = service(store, quotes)
            .compute_valuation_at("acc-1", at(3, 12))
            .await
            .unwrap();

        // 10*120 + 5*50
        assert_eq!(report.total_valuation, dec!(1450));
        assert_eq!(report.total_invested, dec!(1200));
        assert_eq!(report.overall_pl, dec!(250));
        // yesterday: 10*110 + 5*50 = 1350
        assert_eq!(report.today_pl, dec!(100));
        assert_eq!(report.today_pl_percent, dec!(100) / dec!(1350) * dec!(100));
        assert!(report.warnings.is_empty());

        let weights: Decimal = report.holdings.iter().map(|h| h.weight).sum();
        assert!((weights - dec!(100)).abs() < dec!(0.0001));
    }

    #[tokio::test]
    async fn test_position_opened_today_has_no_yesterday_value() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "acc-1", "AAA", dec!(10), dec!(100), at(3, 9)).await;

        let quotes = FixedQuotes::new(&[("AAA", dec!(105), dec!(98))]);
        let report = service(store, quotes)
            .compute_valuation_at("acc-1", at(3, 12))
            .await
            .unwrap();

        assert_eq!(report.today_pl, dec!(1050));
        // Zero denominator yields zero, not a division error
        assert_eq!(report.today_pl_percent, Decimal::ZERO);
        assert_eq!(report.overall_pl_percent, dec!(5));
    }

    #[tokio::test]
    async fn test_unresolvable_symbol_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "acc-1", "AAA", dec!(1), dec!(100), at(2, 10)).await;
        seed(&store, "acc-1", "BBB", dec!(2), dec!(100), at(2, 10)).await;
        seed(&store, "acc-1", "CCC", dec!(3), dec!(100), at(2, 10)).await;

        // F: one of three holdings cannot be priced
        let quotes = FixedQuotes::new(&[("AAA", dec!(10), dec!(10)), ("CCC", dec!(20), dec!(20))]);
        let report = service(store, quotes)
            .compute_valuation_at("acc-1", at(3, 12))
            .await
            .unwrap();

        assert_eq!(report.total_valuation, dec!(70));
        assert_eq!(report.holdings.len(), 2);
        assert!(report.is_partial());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].symbol, "BBB");
    }

    #[tokio::test]
    async fn test_out_of_range_holding_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let huge = Decimal::MAX / dec!(1000);
        store.overwrite_entry(
            LedgerEntry::new("acc-1", "BIG")
                .apply_trade(TradeKind::Buy, huge, dec!(1), at(2, 10), &SessionCalendar::utc())
                .unwrap(),
        );
        seed(&store, "acc-1", "AAA", dec!(2), dec!(100), at(2, 10)).await;

        let quotes = FixedQuotes::new(&[("AAA", dec!(100), dec!(100)), ("BIG", dec!(2500), dec!(2500))]);
        let report = service(store, quotes)
            .compute_valuation_at("acc-1", at(3, 12))
            .await
            .unwrap();

        assert_eq!(report.total_valuation, dec!(200));
        assert_eq!(report.total_invested, dec!(200));
        assert_eq!(report.holdings.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].symbol, "BIG");
        assert_eq!(report.warnings[0].reason, "value out of range");
    }

    #[tokio::test]
    async fn test_no_resolvable_symbol_fails() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "acc-1", "AAA", dec!(1), dec!(100), at(2, 10)).await;

        let result = service(store.clone(), FixedQuotes::new(&[]))
            .compute_valuation_at("acc-1", at(3, 12))
            .await;
        assert!(matches!(
            result,
            Err(ValuationError::NoPricesResolved { .. })
        ));
        assert!(
            store
                .snapshots("acc-1", SnapshotSeries::Daily)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_empty_portfolio_is_zero_valuation() {
        let store = Arc::new(MemoryStore::new());
        let report = service(store, FixedQuotes::new(&[]))
            .compute_valuation_at("nobody", at(3, 12))
            .await
            .unwrap();
        assert_eq!(report.total_valuation, Decimal::ZERO);
        assert_eq!(report.overall_pl_percent, Decimal::ZERO);
        assert!(report.holdings.is_empty());
        assert!(!report.is_partial());
    }

    #[tokio::test]
    async fn test_flat_entries_contribute_realized_gain_only() {
        let store = Arc::new(MemoryStore::new());
        let flat = LedgerEntry::new("acc-1", "OLD")
            .apply_trade(TradeKind::Buy, dec!(2), dec!(10), at(1, 10), &SessionCalendar::utc())
            .unwrap()
            .apply_trade(TradeKind::Sell, dec!(2), dec!(15), at(1, 11), &SessionCalendar::utc())
            .unwrap();
        store.overwrite_entry(flat);
        seed(&store, "acc-1", "AAA", dec!(1), dec!(100), at(2, 10)).await;

        let quotes = FixedQuotes::new(&[("AAA", dec!(100), dec!(100))]);
        let report = service(store, quotes)
            .compute_valuation_at("acc-1", at(3, 12))
            .await
            .unwrap();
        assert_eq!(report.realized_gain, dec!(10));
        assert_eq!(report.holdings.len(), 1);
        assert_eq!(report.total_valuation, dec!(100));
    }

    #[tokio::test]
    async fn test_snapshots_are_upserted_per_period() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "acc-1", "AAA", dec!(10), dec!(100), at(2, 10)).await;
        let quotes = FixedQuotes::new(&[("AAA", dec!(120), dec!(110))]);
        let service = service(store.clone(), quotes);

        service.compute_valuation_at("acc-1", at(3, 12)).await.unwrap();
        let first = service.history("acc-1", SnapshotSeries::Daily).await.unwrap();
        service.compute_valuation_at("acc-1", at(3, 12)).await.unwrap();
        let second = service.history("acc-1", SnapshotSeries::Daily).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].period_key, "2024-06-03");
        assert_eq!(second[0].total_valuation, dec!(1200));

        // Same day, next hour: one daily row, two hourly rows
        service.compute_valuation_at("acc-1", at(3, 13)).await.unwrap();
        assert_eq!(service.history("acc-1", SnapshotSeries::Daily).await.unwrap().len(), 1);
        let hourly = service.history("acc-1", SnapshotSeries::Hourly).await.unwrap();
        assert_eq!(
            hourly.iter().map(|s| s.period_key.as_str()).collect::<Vec<_>>(),
            vec!["2024-06-03T12", "2024-06-03T13"]
        );
    }

    #[tokio::test]
    async fn test_revalue_all_covers_every_account() {
        let store = Arc::new(MemoryStore::new());
        for account in ["acc-1", "acc-2", "acc-3"] {
            seed(&store, account, "AAA", dec!(1), dec!(100), at(2, 10)).await;
        }
        seed(&store, "acc-3", "ZZZ", dec!(1), dec!(100), at(2, 10)).await;
        let quotes = FixedQuotes::new(&[("AAA", dec!(150), dec!(150))]);
        let service = service(store, quotes);

        let done = std::sync::atomic::AtomicUsize::new(0);
        let mut results = service
            .revalue_all(2, &|| {
                done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .await
            .unwrap();
        results.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(done.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(results.len(), 3);
        for (_, result) in &results {
            assert_eq!(result.as_ref().unwrap().total_valuation, dec!(150));
        }
        assert!(results[2].1.as_ref().unwrap().is_partial());
    }
}
