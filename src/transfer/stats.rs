//! Read-only transfer rollups
//!
//! Computed by scanning the store at query time. Staleness is acceptable,
//! incorrectness is not; nothing here has mutation authority.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Optional time window over `created_at`, half-open `[from, to)`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl StatsWindow {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Concrete bounds with open ends widened to the representable range
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = self
            .from
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
        let to = self.to.unwrap_or(DateTime::<Utc>::MAX_UTC);
        (from, to)
    }
}

/// Counts by state, settled volume and fee revenue over a window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferStats {
    pub total_requests: u64,
    pub awaiting_deposit: u64,
    pub deposit_detected: u64,
    pub confirming: u64,
    pub settled: u64,
    pub failed: u64,
    pub expired: u64,
    pub settled_volume: Decimal,
    pub fee_revenue: Decimal,
}

impl TransferStats {
    /// Transfers still awaiting external evidence
    pub fn in_flight(&self) -> u64 {
        self.awaiting_deposit + self.deposit_detected + self.confirming
    }
}
