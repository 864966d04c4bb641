//! Trading sessions and snapshot period buckets.

use anyhow::{Result, anyhow};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum SnapshotSeries {
    Daily,
    Hourly,
}

impl Display for SnapshotSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SnapshotSeries::Daily => "daily",
                SnapshotSeries::Hourly => "hourly",
            }
        )
    }
}

impl FromStr for SnapshotSeries {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "day" | "d" => Ok(SnapshotSeries::Daily),
            "hourly" | "hour" | "h" => Ok(SnapshotSeries::Hourly),
            _ => Err(anyhow!("Invalid snapshot series: {}", s)),
        }
    }
}

/// Maps instants to session dates and period keys in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCalendar {
    offset: FixedOffset,
}

impl SessionCalendar {
    pub fn new(utc_offset_minutes: i32) -> Result<Self> {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| anyhow!("UTC offset out of range: {} minutes", utc_offset_minutes))?;
        Ok(Self { offset })
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn session_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// `YYYY-MM-DD` for daily buckets, `YYYY-MM-DDTHH` for hourly ones.
    pub fn period_key(&self, series: SnapshotSeries, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.offset);
        match series {
            SnapshotSeries::Daily => local.format("%Y-%m-%d").to_string(),
            SnapshotSeries::Hourly => local.format("%Y-%m-%dT%H").to_string(),
        }
    }
}

impl Default for SessionCalendar {
    fn default() -> Self {
        Self::utc()
    }
}
