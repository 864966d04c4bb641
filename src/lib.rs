pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::core::config::AppConfig;
use crate::core::currency::RateCache;
use crate::core::ledger::{Ledger, LedgerStore, TradeKind};
use crate::core::period::{SessionCalendar, SnapshotSeries};
use crate::core::quote::{Quote, QuoteSource, ScreenerKind};
use crate::core::valuation::{SnapshotStore, ValuationService};
use crate::providers::{ExchangeRateProvider, QuoteFetcher, RetryPolicy, YahooFinanceProvider};
use crate::store::{DiskStore, MemoryCache};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A command dispatched by [`run_command`]. `account: None` selects the
/// configured default account.
#[derive(Debug, Clone)]
pub enum AppCommand {
    Buy {
        account: Option<String>,
        symbol: String,
        quantity: Decimal,
    },
    Sell {
        account: Option<String>,
        symbol: String,
        quantity: Decimal,
    },
    Holdings {
        account: Option<String>,
    },
    Transactions {
        account: Option<String>,
    },
    Verify {
        account: Option<String>,
    },
    Valuation {
        account: Option<String>,
    },
    History {
        account: Option<String>,
        series: SnapshotSeries,
    },
    Snapshot,
    Quote {
        symbols: Vec<String>,
    },
    Movers {
        kind: ScreenerKind,
        count: usize,
    },
    Search {
        query: String,
    },
}

/// The wired application: durable ledger, quote pipeline and valuation.
pub struct App {
    config: AppConfig,
    ledger: Ledger,
    valuation: ValuationService,
    fetcher: QuoteFetcher,
    rates: Arc<RateCache>,
    sweeper: JoinHandle<()>,
}

impl App {
    /// Opens the store under the configured data path and builds the
    /// provider stack. Must be called inside a tokio runtime.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let calendar = SessionCalendar::new(config.session.utc_offset_minutes)?;

        let data_path = config.default_data_path()?.join("ledger");
        debug!("Opening ledger store at {}", data_path.display());
        let store = Arc::new(
            DiskStore::open(&data_path)
                .with_context(|| format!("Failed to open ledger at {}", data_path.display()))?,
        );

        let quote_cache = Arc::new(MemoryCache::<String, Quote>::new());
        let sweeper = MemoryCache::spawn_sweeper(&quote_cache, config.cache.sweep_interval());

        let rate_provider =
            ExchangeRateProvider::new(&config.providers.rates.base_url, config.fetch.timeout())?;
        let rates = Arc::new(RateCache::new(
            Arc::new(rate_provider),
            config.cache.rate_ttl(),
        ));

        let quote_provider =
            YahooFinanceProvider::new(&config.providers.yahoo.base_url, config.fetch.timeout())?;
        let fetcher = QuoteFetcher::new(
            Arc::new(quote_provider),
            quote_cache,
            rates.clone(),
            RetryPolicy::new(config.fetch.attempts, config.fetch.backoff()),
            config.cache.quote_ttl(),
        );

        let quotes: Arc<dyn QuoteSource> = Arc::new(fetcher.clone());
        let ledger_store: Arc<dyn LedgerStore> = store.clone();
        let snapshot_store: Arc<dyn SnapshotStore> = store;
        let ledger = Ledger::new(ledger_store.clone(), quotes.clone(), calendar);
        let valuation = ValuationService::new(ledger_store, snapshot_store, quotes, calendar);

        Ok(Self {
            config,
            ledger,
            valuation,
            fetcher,
            rates,
            sweeper,
        })
    }

    fn account<'a>(&'a self, requested: &'a Option<String>) -> &'a str {
        requested
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.config.account)
    }

    pub async fn run(&self, command: AppCommand) -> Result<()> {
        debug!("Running command: {:?}", command);
        match &command {
            AppCommand::Buy {
                account,
                symbol,
                quantity,
            } => {
                cli::trade::run(&self.ledger, self.account(account), symbol, *quantity, TradeKind::Buy)
                    .await
            }
            AppCommand::Sell {
                account,
                symbol,
                quantity,
            } => {
                cli::trade::run(&self.ledger, self.account(account), symbol, *quantity, TradeKind::Sell)
                    .await
            }
            AppCommand::Holdings { account } => {
                cli::holdings::holdings(&self.ledger, self.account(account)).await
            }
            AppCommand::Transactions { account } => {
                cli::holdings::transactions(&self.ledger, self.account(account)).await
            }
            AppCommand::Verify { account } => {
                cli::holdings::verify(&self.ledger, self.account(account)).await
            }
            AppCommand::Valuation { account } => {
                cli::valuation::valuation(
                    &self.valuation,
                    &self.rates,
                    self.account(account),
                    &self.config.currency,
                )
                .await
            }
            AppCommand::History { account, series } => {
                cli::valuation::history(&self.valuation, self.account(account), *series).await
            }
            AppCommand::Snapshot => {
                cli::valuation::snapshot(&self.valuation, self.config.valuation.concurrency).await
            }
            AppCommand::Quote { symbols } => cli::market::quote(&self.fetcher, symbols).await,
            AppCommand::Movers { kind, count } => {
                cli::market::movers(&self.fetcher, *kind, *count).await
            }
            AppCommand::Search { query } => cli::market::search(&self.fetcher, query).await,
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Loads the configuration, wires the app and runs one command.
pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("equitrack starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let app = App::from_config(config)?;
    app.run(command).await
}
