use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode, Url};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::core::error::QuoteError;
use crate::core::quote::{
    InstrumentMatch, InstrumentProfile, MarketState, NewsHeadline, Quote, QuoteProvider,
    ScreenerKind, ScreenerResult, SearchResult,
};

fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value.and_then(Decimal::from_f64).map(|d| d.round_dp(6))
}

// YahooFinanceProvider implementation for QuoteProvider
pub struct YahooFinanceProvider {
    base_url: String,
    client: Client,
}

impl YahooFinanceProvider {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent("equitrack/0.1")
            .timeout(timeout)
            .build()?;
        Ok(YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, symbol: &str) -> Result<T, QuoteError> {
        debug!("Requesting market data from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| QuoteError::Transport {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(QuoteError::NotFound(symbol.to_string()));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(QuoteError::Transport {
                symbol: symbol.to_string(),
                reason: format!("HTTP error: {status}"),
            });
        }
        if !status.is_success() {
            return Err(QuoteError::InvalidResponse {
                symbol: symbol.to_string(),
                reason: format!("HTTP error: {status}"),
            });
        }

        let text = response.text().await.map_err(|e| QuoteError::Transport {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| QuoteError::InvalidResponse {
            symbol: symbol.to_string(),
            reason: format!("Failed to parse JSON response: {e}"),
        })
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, QuoteError> {
        Url::parse_with_params(&format!("{}{}", self.base_url, path), params).map_err(|e| {
            QuoteError::InvalidResponse {
                symbol: path.to_string(),
                reason: format!("Invalid provider URL: {e}"),
            }
        })
    }

    async fn quote_summary(&self, symbol: &str, modules: &str) -> Result<QuoteSummaryItem, QuoteError> {
        let url = self.url(
            &format!("/v10/finance/quoteSummary/{symbol}"),
            &[("modules", modules)],
        )?;
        let data: QuoteSummaryResponse = self.get_json(url, symbol).await?;

        if let Some(error) = data.quote_summary.error {
            debug!("Provider error for {}: {:?}", symbol, error);
            return Err(QuoteError::NotFound(symbol.to_string()));
        }
        data.quote_summary
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| QuoteError::NotFound(symbol.to_string()))
    }
}

#[derive(Deserialize, Debug)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummary,
}

#[derive(Deserialize, Debug)]
struct QuoteSummary {
    result: Option<Vec<QuoteSummaryItem>>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryItem {
    price: Option<PriceModule>,
    summary_detail: Option<SummaryDetailModule>,
    asset_profile: Option<AssetProfileModule>,
}

#[derive(Deserialize, Debug, Default)]
struct RawNumber {
    raw: Option<f64>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PriceModule {
    short_name: Option<String>,
    long_name: Option<String>,
    currency: Option<String>,
    market_state: Option<String>,
    exchange_name: Option<String>,
    #[serde(default)]
    regular_market_price: RawNumber,
    #[serde(default)]
    regular_market_previous_close: RawNumber,
    #[serde(default)]
    market_cap: RawNumber,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SummaryDetailModule {
    #[serde(default)]
    previous_close: RawNumber,
    currency: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AssetProfileModule {
    sector: Option<String>,
    industry: Option<String>,
    website: Option<String>,
    long_business_summary: Option<String>,
}

fn normalize_quote(symbol: &str, item: &QuoteSummaryItem) -> Result<Quote, QuoteError> {
    let price = item.price.as_ref().ok_or_else(|| QuoteError::InvalidResponse {
        symbol: symbol.to_string(),
        reason: "missing price module".to_string(),
    })?;
    let current_price =
        to_decimal(price.regular_market_price.raw).ok_or_else(|| QuoteError::InvalidResponse {
            symbol: symbol.to_string(),
            reason: "missing regular market price".to_string(),
        })?;

    let summary_close = item
        .summary_detail
        .as_ref()
        .and_then(|s| to_decimal(s.previous_close.raw));
    let previous_close = to_decimal(price.regular_market_previous_close.raw)
        .or(summary_close)
        .unwrap_or(current_price);

    let currency = price
        .currency
        .clone()
        .or_else(|| item.summary_detail.as_ref().and_then(|s| s.currency.clone()))
        .unwrap_or_else(|| crate::core::currency::BASE_CURRENCY.to_string());

    let mut quote = Quote::new(symbol, current_price, previous_close, &currency.to_uppercase());
    quote.display_name = price
        .short_name
        .clone()
        .or_else(|| price.long_name.clone())
        .unwrap_or_else(|| symbol.to_string());
    quote.long_name = price.long_name.clone();
    quote.market_state = price
        .market_state
        .as_deref()
        .map(MarketState::from)
        .unwrap_or(MarketState::Unknown);
    quote.market_cap = to_decimal(price.market_cap.raw);
    Ok(quote)
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ScreenerQuote {
    symbol: String,
    regular_market_price: f64,
    regular_market_previous_close: Option<f64>,
    short_name: Option<String>,
    long_name: Option<String>,
    market_state: Option<String>,
    currency: Option<String>,
    market_cap: Option<f64>,
}

impl ScreenerQuote {
    fn into_quote(self) -> Option<Quote> {
        let current_price = to_decimal(Some(self.regular_market_price))?;
        let previous_close = to_decimal(self.regular_market_previous_close).unwrap_or(current_price);
        let currency = self
            .currency
            .unwrap_or_else(|| crate::core::currency::BASE_CURRENCY.to_string());
        let mut quote = Quote::new(&self.symbol, current_price, previous_close, &currency.to_uppercase());
        quote.display_name = self
            .short_name
            .clone()
            .or_else(|| self.long_name.clone())
            .unwrap_or_else(|| self.symbol.clone());
        quote.long_name = self.long_name;
        quote.market_state = self
            .market_state
            .as_deref()
            .map(MarketState::from)
            .unwrap_or(MarketState::Unknown);
        quote.market_cap = to_decimal(self.market_cap);
        Some(quote)
    }
}

/// Reads a screener payload, keeping every quote that parses.
///
/// The provider sometimes returns result sets where individual rows fail
/// validation; those rows are counted and dropped.
fn parse_screener(kind: ScreenerKind, body: &serde_json::Value) -> Result<ScreenerResult, QuoteError> {
    let rows = body
        .pointer("/finance/result/0/quotes")
        .and_then(|q| q.as_array())
        .ok_or_else(|| QuoteError::InvalidResponse {
            symbol: kind.screener_id().to_string(),
            reason: "missing finance.result[0].quotes".to_string(),
        })?;

    let mut quotes = Vec::with_capacity(rows.len());
    let mut rejected = 0;
    for row in rows {
        match serde_json::from_value::<ScreenerQuote>(row.clone())
            .ok()
            .and_then(ScreenerQuote::into_quote)
        {
            Some(quote) => quotes.push(quote),
            None => {
                rejected += 1;
                debug!("Dropping malformed screener row: {}", row);
            }
        }
    }
    if rejected > 0 {
        warn!(
            "Screener {} returned {} malformed rows, keeping {}",
            kind.screener_id(),
            rejected,
            quotes.len()
        );
    }

    Ok(ScreenerResult {
        kind,
        quotes,
        rejected,
    })
}

#[derive(Deserialize, Debug, Default)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<serde_json::Value>,
    #[serde(default)]
    news: Vec<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SearchQuote {
    symbol: String,
    shortname: Option<String>,
    longname: Option<String>,
    exchange: Option<String>,
    quote_type: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SearchNews {
    title: String,
    publisher: Option<String>,
    link: Option<String>,
    provider_publish_time: Option<i64>,
}

#[async_trait]
impl QuoteProvider for YahooFinanceProvider {
    #[instrument(
        name = "YahooQuoteFetch",
        skip(self),
        fields(symbol = %symbol)
    )]
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let item = self.quote_summary(symbol, "price,summaryDetail").await?;
        normalize_quote(symbol, &item)
    }

    #[instrument(
        name = "YahooProfileFetch",
        skip(self),
        fields(symbol = %symbol)
    )]
    async fn fetch_profile(&self, symbol: &str) -> Result<InstrumentProfile, QuoteError> {
        let item = self.quote_summary(symbol, "price,assetProfile").await?;
        let price = item.price.as_ref();
        let profile = item.asset_profile.as_ref();

        Ok(InstrumentProfile {
            symbol: symbol.to_string(),
            name: price
                .and_then(|p| p.long_name.clone().or_else(|| p.short_name.clone()))
                .unwrap_or_else(|| symbol.to_string()),
            exchange: price.and_then(|p| p.exchange_name.clone()),
            currency: price
                .and_then(|p| p.currency.clone())
                .unwrap_or_else(|| crate::core::currency::BASE_CURRENCY.to_string())
                .to_uppercase(),
            sector: profile.and_then(|p| p.sector.clone()),
            industry: profile.and_then(|p| p.industry.clone()),
            website: profile.and_then(|p| p.website.clone()),
            summary: profile.and_then(|p| p.long_business_summary.clone()),
        })
    }

    #[instrument(name = "YahooScreener", skip(self))]
    async fn screener(&self, kind: ScreenerKind, count: usize) -> Result<ScreenerResult, QuoteError> {
        let count = count.to_string();
        let url = self.url(
            "/v1/finance/screener/predefined/saved",
            &[("scrIds", kind.screener_id()), ("count", &count)],
        )?;
        let body: serde_json::Value = self.get_json(url, kind.screener_id()).await?;
        parse_screener(kind, &body)
    }

    #[instrument(name = "YahooSearch", skip(self))]
    async fn search(&self, query: &str) -> Result<SearchResult, QuoteError> {
        let url = self.url(
            "/v1/finance/search",
            &[("q", query), ("quotesCount", "10"), ("newsCount", "5")],
        )?;
        let data: SearchResponse = self.get_json(url, query).await?;

        let instruments = data
            .quotes
            .into_iter()
            .filter_map(|v| serde_json::from_value::<SearchQuote>(v).ok())
            .map(|q| InstrumentMatch {
                symbol: q.symbol,
                name: q.longname.or(q.shortname),
                exchange: q.exchange,
                quote_type: q.quote_type,
            })
            .collect();
        let news = data
            .news
            .into_iter()
            .filter_map(|v| serde_json::from_value::<SearchNews>(v).ok())
            .map(|n| NewsHeadline {
                title: n.title,
                publisher: n.publisher,
                link: n.link,
                published_at: n
                    .provider_publish_time
                    .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            })
            .collect();

        Ok(SearchResult { instruments, news })
    }
}
