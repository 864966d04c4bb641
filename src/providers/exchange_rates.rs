use crate::core::currency::CurrencyRateProvider;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, instrument};

#[derive(Debug, Deserialize)]
struct RatesResponse {
    result: Option<String>,
    rates: Option<HashMap<String, Decimal>>,
}

/// Open exchange-rate API returning every rate for a base currency in one
/// call.
pub struct ExchangeRateProvider {
    base_url: String,
    client: Client,
}

impl ExchangeRateProvider {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl CurrencyRateProvider for ExchangeRateProvider {
    #[instrument(name = "RateTableFetch", skip(self))]
    async fn fetch_rates(&self, base: &str) -> anyhow::Result<HashMap<String, Decimal>> {
        let url = format!("{}/v6/latest/{}", self.base_url, base);
        debug!("Requesting rate table from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Rate request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {}", response.status()));
        }

        let text = response
            .text()
            .await
            .context("Failed to get response text")?;
        let data: RatesResponse = match serde_json::from_str(&text) {
            Ok(data) => data,
            Err(e) => {
                error!(error = ?e, response = %text, "Failed to parse rate response");
                return Err(e).context("Failed to parse rate response");
            }
        };

        match data.result.as_deref() {
            Some("success") | None => {}
            Some(result) => return Err(anyhow!("Rate service returned result: {result}")),
        }
        let rates = data
            .rates
            .filter(|r| !r.is_empty())
            .ok_or_else(|| anyhow!("Rate response has no rates for {base}"))?;
        debug!("Fetched {} rates against {}", rates.len(), base);
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with(status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v6/latest/INR"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    #[tokio::test]
    async fn test_fetch_rates() {
        let server = server_with(
            200,
            r#"{"result": "success", "base_code": "INR", "rates": {"INR": 1, "USD": 0.012, "EUR": 0.011}}"#,
        )
        .await;
        let provider = ExchangeRateProvider::new(&server.uri(), Duration::from_secs(5)).unwrap();

        let rates = provider.fetch_rates("INR").await.unwrap();
        assert_eq!(rates.get("USD"), Some(&dec!(0.012)));
        assert_eq!(rates.get("INR"), Some(&dec!(1)));
        assert_eq!(rates.len(), 3);
    }

    #[tokio::test]
    async fn test_error_result_is_rejected() {
        let server = server_with(200, r#"{"result": "error", "error-type": "unsupported-code"}"#).await;
        let provider = ExchangeRateProvider::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = provider.fetch_rates("INR").await.unwrap_err();
        assert_eq!(err.to_string(), "Rate service returned result: error");
    }

    #[tokio::test]
    async fn test_http_failure() {
        let server = server_with(500, "").await;
        let provider = ExchangeRateProvider::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = provider.fetch_rates("INR").await.unwrap_err();
        assert!(err.to_string().contains("HTTP error"));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = server_with(200, "not json").await;
        let provider = ExchangeRateProvider::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = provider.fetch_rates("INR").await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse rate response"));
    }
}
