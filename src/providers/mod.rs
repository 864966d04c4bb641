pub mod caching;
pub mod exchange_rates;
pub mod util;
pub mod yahoo_finance;

pub use caching::QuoteFetcher;
pub use exchange_rates::ExchangeRateProvider;
pub use util::RetryPolicy;
pub use yahoo_finance::YahooFinanceProvider;
