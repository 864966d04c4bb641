//! Command implementations and terminal presentation

pub mod holdings;
pub mod market;
pub mod setup;
pub mod trade;
pub mod ui;
pub mod valuation;
