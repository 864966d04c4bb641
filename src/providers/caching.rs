use super::util::{RetryPolicy, with_retry};
use crate::core::cache::Cache;
use crate::core::currency::{BASE_CURRENCY, RateCache};
use crate::core::error::QuoteError;
use crate::core::quote::{
    InstrumentProfile, Quote, QuoteProvider, QuoteSource, ScreenerKind, ScreenerResult,
    SearchResult,
};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type InFlight = Shared<BoxFuture<'static, Result<Quote, QuoteError>>>;

/// Turns a provider error left over after retrying into the caller-facing
/// error. Transient failures that outlived every attempt become
/// [`QuoteError::Unavailable`].
fn exhausted(symbol: &str, err: QuoteError, attempts: usize) -> QuoteError {
    if err.is_transient() {
        QuoteError::Unavailable {
            symbol: symbol.to_string(),
            attempts,
            reason: err.to_string(),
        }
    } else {
        err
    }
}

struct Inner {
    provider: Arc<dyn QuoteProvider>,
    cache: Arc<dyn Cache<String, Quote>>,
    rates: Arc<RateCache>,
    retry: RetryPolicy,
    ttl: Duration,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl Inner {
    async fn load_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let quote = with_retry(
            || self.provider.fetch_quote(symbol),
            &self.retry,
            QuoteError::is_transient,
        )
        .await
        .map_err(|(e, attempts)| exhausted(symbol, e, attempts))?;

        let quote = self.to_base(quote).await;
        self.cache
            .put(symbol.to_string(), quote.clone(), Some(self.ttl))
            .await;
        Ok(quote)
    }

    async fn to_base(&self, quote: Quote) -> Quote {
        if quote.currency.eq_ignore_ascii_case(BASE_CURRENCY) {
            return quote;
        }
        match self.rates.get(&quote.currency).await {
            Some(factor) if !factor.is_zero() => quote.converted(factor, BASE_CURRENCY),
            _ => {
                warn!(
                    "No {} rate for {}, using {} prices unconverted",
                    quote.currency, quote.symbol, quote.currency
                );
                quote.converted(Decimal::ONE, BASE_CURRENCY)
            }
        }
    }
}

/// Market data access for the rest of the app: cached, retried, converted to
/// the base currency, with one upstream request per symbol at a time.
#[derive(Clone)]
pub struct QuoteFetcher {
    inner: Arc<Inner>,
}

impl QuoteFetcher {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        cache: Arc<dyn Cache<String, Quote>>,
        rates: Arc<RateCache>,
        retry: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                cache,
                rates,
                retry,
                ttl,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let symbol = symbol.trim().to_uppercase();
        if let Some(quote) = self.inner.cache.get(&symbol).await {
            return Ok(quote);
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(&symbol) {
                Some(pending) => {
                    debug!("Joining in-flight fetch for {}", symbol);
                    pending.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let key = symbol.clone();
                    let pending = async move {
                        let result = inner.load_quote(&key).await;
                        inner.in_flight.lock().await.remove(&key);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(symbol.clone(), pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    pub async fn fetch_profile(&self, symbol: &str) -> Result<InstrumentProfile, QuoteError> {
        let symbol = symbol.trim().to_uppercase();
        with_retry(
            || self.inner.provider.fetch_profile(&symbol),
            &self.inner.retry,
            QuoteError::is_transient,
        )
        .await
        .map_err(|(e, attempts)| exhausted(&symbol, e, attempts))
    }

    pub async fn screener(&self, kind: ScreenerKind, count: usize) -> Result<ScreenerResult, QuoteError> {
        let result = with_retry(
            || self.inner.provider.screener(kind, count),
            &self.inner.retry,
            QuoteError::is_transient,
        )
        .await
        .map_err(|(e, attempts)| exhausted(kind.screener_id(), e, attempts))?;

        let mut quotes = Vec::with_capacity(result.quotes.len());
        for quote in result.quotes {
            quotes.push(self.inner.to_base(quote).await);
        }
        Ok(ScreenerResult { quotes, ..result })
    }

    pub async fn search(&self, query: &str) -> Result<SearchResult, QuoteError> {
        let query = query.trim();
        with_retry(
            || self.inner.provider.search(query),
            &self.inner.retry,
            QuoteError::is_transient,
        )
        .await
        .map_err(|(e, attempts)| exhausted(query, e, attempts))
    }
}

#[async_trait]
impl QuoteSource for QuoteFetcher {
    async fn quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        self.fetch_quote(symbol).await
    }

    async fn onboard(&self, symbol: &str) -> Result<(InstrumentProfile, Quote), QuoteError> {
        tokio::try_join!(self.fetch_profile(symbol), self.fetch_quote(symbol))
    }
}
