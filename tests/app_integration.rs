use equitrack::AppCommand;
use equitrack::core::ledger::LedgerStore;
use equitrack::core::period::SnapshotSeries;
use equitrack::core::valuation::SnapshotStore;
use equitrack::store::DiskStore;
use rust_decimal_macros::dec;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// Mock market data and rate services
mod test_utils {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub fn quote_summary(price: f64, previous_close: f64, currency: &str, name: &str) -> String {
        format!(
            r#"{{
                "quoteSummary": {{
                    "result": [{{
                        "price": {{
                            "regularMarketPrice": {{"raw": {price}}},
                            "regularMarketPreviousClose": {{"raw": {previous_close}}},
                            "marketState": "REGULAR",
                            "shortName": "{name}",
                            "longName": "{name} Limited",
                            "exchangeName": "NSE",
                            "currency": "{currency}"
                        }},
                        "summaryDetail": {{"previousClose": {{"raw": {previous_close}}}}},
                        "assetProfile": {{"sector": "Energy", "industry": "Oil & Gas"}}
                    }}],
                    "error": null
                }}
            }}"#
        )
    }

    /// Serves quote summaries for the given symbols plus an INR rate table.
    pub async fn create_market_server(quotes: &[(&str, String)]) -> MockServer {
        let mock_server = MockServer::start().await;
        for (symbol, body) in quotes {
            Mock::given(method("GET"))
                .and(path(format!("/v10/finance/quoteSummary/{symbol}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
                .mount(&mock_server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/v6/latest/INR"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"result": "success", "rates": {"INR": 1, "USD": 0.0125}}"#,
            ))
            .mount(&mock_server)
            .await;
        mock_server
    }
}

fn write_config(dir: &Path, market_url: &str) -> String {
    let config_path = dir.join("config.yaml");
    let config_content = format!(
        r#"
        providers:
          yahoo:
            base_url: {market_url}
          rates:
            base_url: {market_url}
        currency: "INR"
        account: "demo"
        data_path: {}
        fetch:
          attempts: 2
          backoff_ms: 1
          timeout_secs: 5
    "#,
        dir.join("data").display()
    );
    fs::write(&config_path, &config_content).expect("Failed to write config file");
    config_path.to_string_lossy().into_owned()
}

async fn run(command: AppCommand, config_path: &str) -> anyhow::Result<()> {
    equitrack::run_command(command, Some(config_path)).await
}

fn buy(symbol: &str, quantity: rust_decimal::Decimal) -> AppCommand {
    AppCommand::Buy {
        account: None,
        symbol: symbol.to_string(),
        quantity,
    }
}

fn sell(symbol: &str, quantity: rust_decimal::Decimal) -> AppCommand {
    AppCommand::Sell {
        account: None,
        symbol: symbol.to_string(),
        quantity,
    }
}

#[test_log::test(tokio::test)]
async fn test_trade_and_valuation_flow() {
    let mock_server = test_utils::create_market_server(&[(
        "RELIANCE.NS",
        test_utils::quote_summary(2500.0, 2400.0, "INR", "Reliance"),
    )])
    .await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(temp_dir.path(), &mock_server.uri());

    run(buy("reliance.ns", dec!(10)), &config_path).await.unwrap();
    run(buy("RELIANCE.NS", dec!(5)), &config_path).await.unwrap();
    run(sell("RELIANCE.NS", dec!(3)), &config_path).await.unwrap();

    // Overselling is rejected and leaves the ledger alone
    let oversell = run(sell("RELIANCE.NS", dec!(100)), &config_path).await;
    assert!(
        oversell
            .unwrap_err()
            .to_string()
            .contains("Insufficient holdings")
    );

    for command in [
        AppCommand::Holdings { account: None },
        AppCommand::Transactions { account: None },
        AppCommand::Verify { account: None },
        AppCommand::Valuation { account: None },
        AppCommand::History {
            account: None,
            series: SnapshotSeries::Daily,
        },
        AppCommand::Snapshot,
        AppCommand::Quote {
            symbols: vec!["RELIANCE.NS".to_string()],
        },
    ] {
        let result = run(command.clone(), &config_path).await;
        assert!(
            result.is_ok(),
            "{:?} failed with: {:?}",
            command,
            result.err()
        );
    }

    let store = DiskStore::open(&temp_dir.path().join("data").join("ledger")).unwrap();
    let entry = store.entry("demo", "RELIANCE.NS").await.unwrap().unwrap();
    assert_eq!(entry.holding_quantity, dec!(12));
    assert_eq!(entry.average_cost, dec!(2500));
    assert_eq!(entry.cost_basis_total, dec!(30000));
    assert_eq!(entry.realized_gain, dec!(0));

    let transactions = store.transactions("demo").await.unwrap();
    assert_eq!(transactions.len(), 3);
    assert_eq!(transactions[2].signed_quantity, dec!(-3));

    let instrument = store.instrument("RELIANCE.NS").await.unwrap().unwrap();
    assert_eq!(instrument.name, "Reliance Limited");
    assert_eq!(instrument.sector.as_deref(), Some("Energy"));

    let daily = store.snapshots("demo", SnapshotSeries::Daily).await.unwrap();
    assert!(!daily.is_empty());
    assert_eq!(daily.last().unwrap().total_valuation, dec!(30000));
    let hourly = store.snapshots("demo", SnapshotSeries::Hourly).await.unwrap();
    assert!(!hourly.is_empty());
    assert!(hourly.iter().all(|s| s.total_valuation == dec!(30000)));
}

#[test_log::test(tokio::test)]
async fn test_foreign_instrument_is_booked_in_base_currency() {
    let mock_server = test_utils::create_market_server(&[(
        "AAPL",
        test_utils::quote_summary(100.0, 95.0, "USD", "Apple"),
    )])
    .await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(temp_dir.path(), &mock_server.uri());

    run(
        AppCommand::Buy {
            account: Some("global".to_string()),
            symbol: "AAPL".to_string(),
            quantity: dec!(2),
        },
        &config_path,
    )
    .await
    .unwrap();

    let store = DiskStore::open(&temp_dir.path().join("data").join("ledger")).unwrap();
    let entry = store.entry("global", "AAPL").await.unwrap().unwrap();
    assert_eq!(entry.average_cost, dec!(8000));
    assert_eq!(entry.cost_basis_total, dec!(16000));
    assert!(store.entries("demo").await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_valuation_fails_when_no_price_resolves() {
    let market = test_utils::create_market_server(&[(
        "TCS.NS",
        test_utils::quote_summary(4000.0, 3900.0, "INR", "TCS"),
    )])
    .await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(temp_dir.path(), &market.uri());
    run(buy("TCS.NS", dec!(1)), &config_path).await.unwrap();

    // Same ledger, but the market data service now knows nothing
    let empty_market = wiremock::MockServer::start().await;
    let config_path = write_config(temp_dir.path(), &empty_market.uri());
    let result = run(AppCommand::Valuation { account: None }, &config_path).await;
    let err = result.unwrap_err().to_string();
    assert!(err.contains("Could not resolve a price"), "{err}");

    // A failed valuation records no snapshot
    let store = DiskStore::open(&temp_dir.path().join("data").join("ledger")).unwrap();
    assert!(
        store
            .snapshots("demo", SnapshotSeries::Daily)
            .await
            .unwrap()
            .is_empty()
    );
}

#[test_log::test(tokio::test)]
async fn test_empty_account_commands_succeed() {
    let market = test_utils::create_market_server(&[]).await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(temp_dir.path(), &market.uri());

    for command in [
        AppCommand::Holdings { account: None },
        AppCommand::Transactions { account: None },
        AppCommand::Verify { account: None },
        AppCommand::Valuation { account: None },
        AppCommand::Snapshot,
    ] {
        let result = run(command.clone(), &config_path).await;
        assert!(result.is_ok(), "{:?} failed with: {:?}", command, result.err());
    }
}

#[test_log::test(tokio::test)]
async fn test_missing_config_is_reported() {
    let result = equitrack::run_command(
        AppCommand::Holdings { account: None },
        Some("/nonexistent/equitrack/config.yaml"),
    )
    .await;
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("Failed to read config file")
    );
}
