//! Market data abstractions and core types

use crate::core::error::QuoteError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketState {
    PreMarket,
    Regular,
    PostMarket,
    Closed,
    Unknown,
}

impl From<&str> for MarketState {
    fn from(code: &str) -> Self {
        match code.to_uppercase().as_str() {
            "PRE" | "PREPRE" => MarketState::PreMarket,
            "REGULAR" => MarketState::Regular,
            "POST" | "POSTPOST" => MarketState::PostMarket,
            "CLOSED" => MarketState::Closed,
            _ => MarketState::Unknown,
        }
    }
}

impl Display for MarketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                MarketState::PreMarket => "Pre-market",
                MarketState::Regular => "Open",
                MarketState::PostMarket => "After hours",
                MarketState::Closed => "Closed",
                MarketState::Unknown => "Unknown",
            }
        )
    }
}

/// A normalized quote snapshot. Cached copies are never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub current_price: Decimal,
    pub previous_close: Decimal,
    pub absolute_change: Decimal,
    pub percent_change: Decimal,
    pub display_name: String,
    pub long_name: Option<String>,
    pub market_state: MarketState,
    pub market_cap: Option<Decimal>,
    pub currency: String,
}

impl Quote {
    /// Builds a quote from its price fields, deriving the day change.
    pub fn new(
        symbol: &str,
        current_price: Decimal,
        previous_close: Decimal,
        currency: &str,
    ) -> Self {
        let absolute_change = current_price - previous_close;
        Quote {
            symbol: symbol.to_string(),
            current_price,
            previous_close,
            absolute_change,
            percent_change: percent_of(absolute_change, previous_close),
            display_name: symbol.to_string(),
            long_name: None,
            market_state: MarketState::Unknown,
            market_cap: None,
            currency: currency.to_string(),
        }
    }

    /// Returns a copy with every price field divided by `factor` and relabelled
    /// as `currency`. Percent change is scale-free and kept as is.
    pub fn converted(&self, factor: Decimal, currency: &str) -> Quote {
        if factor.is_zero() {
            return self.clone();
        }
        Quote {
            current_price: self.current_price / factor,
            previous_close: self.previous_close / factor,
            absolute_change: self.absolute_change / factor,
            market_cap: self.market_cap.map(|cap| cap / factor),
            currency: currency.to_string(),
            ..self.clone()
        }
    }
}

/// `part / whole * 100`, or zero when `whole` is zero or the ratio is out
/// of range.
pub fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    part.checked_div(whole)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

/// Descriptive metadata stored when a symbol is first bought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentProfile {
    pub symbol: String,
    pub name: String,
    pub exchange: Option<String>,
    pub currency: String,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenerKind {
    Gainers,
    Losers,
    MostActive,
}

impl ScreenerKind {
    pub fn screener_id(&self) -> &'static str {
        match self {
            ScreenerKind::Gainers => "day_gainers",
            ScreenerKind::Losers => "day_losers",
            ScreenerKind::MostActive => "most_actives",
        }
    }
}

impl Display for ScreenerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ScreenerKind::Gainers => "Top gainers",
                ScreenerKind::Losers => "Top losers",
                ScreenerKind::MostActive => "Most active",
            }
        )
    }
}

/// A ranked list from a screener query. Entries the provider returned in a
/// shape that could not be read are counted in `rejected`.
#[derive(Debug, Clone)]
pub struct ScreenerResult {
    pub kind: ScreenerKind,
    pub quotes: Vec<Quote>,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentMatch {
    pub symbol: String,
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub quote_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewsHeadline {
    pub title: String,
    pub publisher: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub instruments: Vec<InstrumentMatch>,
    pub news: Vec<NewsHeadline>,
}

/// Raw upstream market-data provider. Prices are in the instrument's own
/// currency; nothing is cached or retried at this layer.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError>;
    async fn fetch_profile(&self, symbol: &str) -> Result<InstrumentProfile, QuoteError>;
    async fn screener(&self, kind: ScreenerKind, count: usize) -> Result<ScreenerResult, QuoteError>;
    async fn search(&self, query: &str) -> Result<SearchResult, QuoteError>;
}

/// Where the ledger and valuation look up prices.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Current quote in the base currency.
    async fn quote(&self, symbol: &str) -> Result<Quote, QuoteError>;

    /// Fetches profile and quote for a symbol seen for the first time.
    async fn onboard(&self, symbol: &str) -> Result<(InstrumentProfile, Quote), QuoteError>;
}
