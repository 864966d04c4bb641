//! Core business logic abstractions

pub mod cache;
pub mod config;
pub mod currency;
pub mod error;
pub mod ledger;
pub mod log;
pub mod period;
pub mod quote;
pub mod valuation;

// Re-export main types for cleaner imports
pub use currency::{CurrencyRateProvider, RateCache};
pub use error::{LedgerError, PartialDataWarning, QuoteError, StoreError, ValuationError};
pub use ledger::{Ledger, LedgerEntry, LedgerStore, TradeKind, TradeRequest, TransactionRecord};
pub use period::{SessionCalendar, SnapshotSeries};
pub use quote::{Quote, QuoteProvider, QuoteSource};
pub use valuation::{SnapshotStore, ValuationReport, ValuationService, ValuationSnapshot};
