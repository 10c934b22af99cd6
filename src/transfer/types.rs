//! Transfer core types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::TransferState;
use crate::config::EngineConfig;

/// Transfer ID type - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed between workers
/// - 128-bit with good entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    /// Generate a new unique TransferId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Opaque bank payout payload. Stored and forwarded, never interpreted;
/// the schema version lets downstream consumers pick a parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankDetails {
    pub schema_version: u16,
    pub payload: serde_json::Value,
}

impl BankDetails {
    pub fn new(schema_version: u16, payload: serde_json::Value) -> Self {
        Self {
            schema_version,
            payload,
        }
    }
}

/// Creation request from the API collaborator
#[derive(Debug, Clone)]
pub struct NewTransfer {
    /// Requesting account in the identity collaborator's space
    pub owner_id: Uuid,
    /// Requested crypto amount
    pub source_amount: Decimal,
    pub bank_details: BankDetails,
    /// Chain reference announced by the user upfront, if any.
    /// Verified against the ledger before it is trusted.
    pub announced_tx_reference: Option<String>,
}

impl NewTransfer {
    pub fn new(owner_id: Uuid, source_amount: Decimal, bank_details: BankDetails) -> Self {
        Self {
            owner_id,
            source_amount,
            bank_details,
            announced_tx_reference: None,
        }
    }

    pub fn with_tx_reference(mut self, tx_reference: String) -> Self {
        self.announced_tx_reference = Some(tx_reference);
        self
    }
}

/// One crypto-to-fiat conversion instance, as persisted in the store
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub id: TransferId,
    pub owner_id: Uuid,

    pub source_amount: Decimal,
    pub source_currency: String,
    /// Computed at creation, never recomputed even if config changes
    pub fee_amount: Decimal,
    pub net_payout_amount: Decimal,
    pub payout_currency: String,

    pub bank_details: BankDetails,

    /// House address the user must pay into
    pub deposit_address: String,
    /// On-chain transaction identifier; set once, then immutable and
    /// unique across all transfers
    pub chain_tx_reference: Option<String>,
    /// Last observed confirmation depth; never decreased
    pub confirmation_count: u32,
    /// Threshold frozen at creation time
    pub required_confirmations: u32,

    pub state: TransferState,
    /// Optimistic-concurrency counter; every accepted write increments by 1
    pub state_version: i64,
    pub status_message: Option<String>,

    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Admin account that forced a terminal override, if any
    pub processed_by: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl TransferRecord {
    /// Build a new record in CREATED state from a validated request.
    ///
    /// `fee_amount`/`net_payout_amount` come from the validator; the
    /// threshold, window and currencies are frozen from config here.
    pub fn create(
        req: &NewTransfer,
        fee_amount: Decimal,
        net_payout_amount: Decimal,
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransferId::new(),
            owner_id: req.owner_id,
            source_amount: req.source_amount,
            source_currency: config.source_currency.clone(),
            fee_amount,
            net_payout_amount,
            payout_currency: config.payout_currency.clone(),
            bank_details: req.bank_details.clone(),
            deposit_address: config.deposit_address.clone(),
            chain_tx_reference: None,
            confirmation_count: 0,
            required_confirmations: config.required_confirmations,
            state: TransferState::Created,
            state_version: 1,
            status_message: None,
            retry_count: 0,
            next_retry_at: None,
            processed_by: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::seconds(config.deposit_window_secs as i64),
            settled_at: None,
            failure_reason: None,
        }
    }

    /// Age-based expiry check: past the window with no confirmation progress
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal() && self.confirmation_count == 0 && now > self.expires_at
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transfer[{}] owner={} {} {} state={} v{}",
            self.id,
            self.owner_id,
            self.source_amount,
            self.source_currency,
            self.state,
            self.state_version
        )
    }
}

/// External evidence fed to the state machine by the poller.
///
/// Lookup failures are NOT evidence; they go to the retry scheduler.
#[derive(Debug, Clone)]
pub enum Evidence {
    /// Inbound transaction matching this transfer observed on-chain
    InboundDetected { tx_reference: String },
    /// Current confirmation depth of the recorded chain transaction
    Confirmations { depth: u32 },
    /// Definitive on-chain rejection (double-spend, reversed transaction)
    ChainRejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_request() -> NewTransfer {
        NewTransfer::new(
            Uuid::new_v4(),
            Decimal::new(100_000, 2), // 1000.00
            BankDetails::new(1, json!({"account_number": "1234567890"})),
        )
    }

    #[test]
    fn test_transfer_id_roundtrip() {
        let id = TransferId::new();
        let parsed: TransferId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_record_create_freezes_config() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let record = TransferRecord::create(
            &test_request(),
            Decimal::new(1000, 2),
            Decimal::new(99_000, 2),
            &config,
            now,
        );

        assert_eq!(record.state, TransferState::Created);
        assert_eq!(record.state_version, 1);
        assert_eq!(record.required_confirmations, 6);
        assert_eq!(record.confirmation_count, 0);
        assert_eq!(
            record.expires_at,
            now + Duration::seconds(config.deposit_window_secs as i64)
        );
        assert!(record.settled_at.is_none());
        assert!(record.failure_reason.is_none());
    }

    #[test]
    fn test_expiry_requires_no_progress() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut record = TransferRecord::create(
            &test_request(),
            Decimal::new(1000, 2),
            Decimal::new(99_000, 2),
            &config,
            now - Duration::seconds(config.deposit_window_secs as i64 + 60),
        );

        assert!(record.is_expired(now));

        // Any confirmation progress suppresses expiry
        record.confirmation_count = 1;
        assert!(!record.is_expired(now));
    }
}
