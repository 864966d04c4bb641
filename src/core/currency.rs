//! Currency conversion abstractions and the process-wide rate table.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Currency every stored price is normalized to.
pub const BASE_CURRENCY: &str = "INR";

#[async_trait]
pub trait CurrencyRateProvider: Send + Sync {
    /// Units of each currency per one unit of `base`.
    async fn fetch_rates(&self, base: &str) -> Result<HashMap<String, Decimal>>;
}

struct RateTable {
    rates: HashMap<String, Decimal>,
    expires_at: Instant,
}

/// The single base-currency rate table, refreshed once it is older than
/// its TTL.
///
/// A failed refresh drops the table instead of serving stale rates, so every
/// lookup fails until the provider answers again.
pub struct RateCache {
    provider: Arc<dyn CurrencyRateProvider>,
    table: Mutex<Option<RateTable>>,
    ttl: Duration,
}

impl RateCache {
    pub fn new(provider: Arc<dyn CurrencyRateProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            table: Mutex::new(None),
            ttl,
        }
    }

    /// Units of `code` per one unit of the base currency.
    pub async fn get(&self, code: &str) -> Option<Decimal> {
        let code = code.trim().to_uppercase();
        if code == BASE_CURRENCY {
            return Some(Decimal::ONE);
        }

        let mut table = self.table.lock().await;
        let stale = table
            .as_ref()
            .is_none_or(|t| t.expires_at <= Instant::now());
        if stale {
            debug!("Refreshing {} rate table", BASE_CURRENCY);
            match self.provider.fetch_rates(BASE_CURRENCY).await {
                Ok(rates) => {
                    let rates = rates
                        .into_iter()
                        .map(|(code, factor)| (code.to_uppercase(), factor))
                        .collect();
                    *table = Some(RateTable {
                        rates,
                        expires_at: Instant::now() + self.ttl,
                    });
                }
                Err(e) => {
                    warn!("Rate refresh failed, evicting rate table: {e:#}");
                    *table = None;
                    return None;
                }
            }
        }

        let factor = table.as_ref().and_then(|t| t.rates.get(&code).copied());
        if factor.is_none() {
            debug!("No rate for currency {}", code);
        }
        factor
    }

    /// Converts an amount in `from` to the base currency.
    pub async fn to_base(&self, amount: Decimal, from: &str) -> Option<Decimal> {
        let factor = self.get(from).await?;
        if factor.is_zero() {
            return None;
        }
        Some(amount / factor)
    }

    /// Converts a base-currency amount to `to` for display.
    pub async fn convert(&self, amount: Decimal, to: &str) -> Option<Decimal> {
        self.get(to).await.map(|factor| amount * factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockRates {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl MockRates {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CurrencyRateProvider for MockRates {
        async fn fetch_rates(&self, base: &str) -> Result<HashMap<String, Decimal>> {
            assert_eq!(base, BASE_CURRENCY);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("rate service down"));
            }
            Ok(HashMap::from([
                ("usd".to_string(), dec!(0.0125)),
                ("EUR".to_string(), dec!(0.011)),
            ]))
        }
    }

    #[tokio::test]
    async fn test_base_currency_needs_no_lookup() {
        let provider = Arc::new(MockRates::new());
        let cache = RateCache::new(provider.clone(), Duration::from_secs(3600));
        assert_eq!(cache.get("inr").await, Some(Decimal::ONE));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_table_is_fetched_once_within_ttl() {
        let provider = Arc::new(MockRates::new());
        let cache = RateCache::new(provider.clone(), Duration::from_secs(3600));

        assert_eq!(cache.get("USD").await, Some(dec!(0.0125)));
        assert_eq!(cache.get("eur").await, Some(dec!(0.011)));
        assert_eq!(cache.get("JPY").await, None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_evicts_stale_table() {
        let provider = Arc::new(MockRates::new());
        let cache = RateCache::new(provider.clone(), Duration::from_millis(10));
        assert!(cache.get("USD").await.is_some());

        provider.failing.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("USD").await, None);
        assert!(cache.table.lock().await.is_none());

        // Recovers on the next successful refresh
        provider.failing.store(false, Ordering::SeqCst);
        assert_eq!(cache.get("USD").await, Some(dec!(0.0125)));
    }

    #[tokio::test]
    async fn test_conversions() {
        let cache = RateCache::new(Arc::new(MockRates::new()), Duration::from_secs(3600));
        assert_eq!(cache.to_base(dec!(10), "USD").await, Some(dec!(800)));
        assert_eq!(cache.convert(dec!(800), "USD").await, Some(dec!(10)));
        assert_eq!(cache.convert(dec!(800), "INR").await, Some(dec!(800)));
        assert_eq!(cache.to_base(dec!(10), "XYZ").await, None);
    }
}
