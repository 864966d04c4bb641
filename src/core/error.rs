//! Error types shared by the ledger, quote and valuation layers.
//!
//! Storage-specific failures (fjall, serialization) are converted to
//! [`StoreError`] by the store implementations so the domain stays
//! backend-agnostic.

use rust_decimal::Decimal;
use thiserror::Error;

/// Failures of the durable store behind the ledger and snapshots.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend failed: {0}")]
    Backend(String),

    #[error("Failed to (de)serialize stored record: {0}")]
    Serialization(String),

    /// The entry changed between the read and the conditional commit.
    #[error("Concurrent update detected for {account_id}/{symbol}")]
    Conflict { account_id: String, symbol: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<fjall::Error> for StoreError {
    fn from(e: fjall::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Errors raised while fetching market data.
///
/// `Clone` so a single in-flight fetch can hand the same outcome to every
/// waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuoteError {
    #[error("Request failed for {symbol}: {reason}")]
    Transport { symbol: String, reason: String },

    #[error("No quote found for symbol: {0}")]
    NotFound(String),

    #[error("Malformed provider response for {symbol}: {reason}")]
    InvalidResponse { symbol: String, reason: String },

    #[error("Quote unavailable for {symbol} after {attempts} attempts: {reason}")]
    Unavailable {
        symbol: String,
        attempts: usize,
        reason: String,
    },
}

impl QuoteError {
    /// Returns true if another attempt against the provider may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuoteError::Transport { .. })
    }
}

/// Rejections and failures of [`crate::core::ledger::Ledger::apply_transaction`].
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid transaction: {0}")]
    Validation(String),

    #[error("Insufficient holdings of {symbol}: requested {requested}, held {held}")]
    InsufficientHoldings {
        symbol: String,
        requested: Decimal,
        held: Decimal,
    },

    #[error("Price unavailable: {0}")]
    PriceUnavailable(#[from] QuoteError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Failures of a whole valuation run.
#[derive(Error, Debug)]
pub enum ValuationError {
    #[error("Could not resolve a price for any holding of {account_id}: {}", .symbols.join(", "))]
    NoPricesResolved {
        account_id: String,
        symbols: Vec<String>,
    },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// A holding that was left out of an otherwise successful valuation.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialDataWarning {
    pub symbol: String,
    pub reason: String,
}

impl std::fmt::Display for PartialDataWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} skipped: {}", self.symbol, self.reason)
    }
}
