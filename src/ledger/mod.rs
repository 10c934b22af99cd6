//! Ledger collaborator contract
//!
//! The engine never talks to a chain directly; it consumes two idempotent
//! read queries. Which network backs them is a configuration choice.

pub mod trongrid;

pub use trongrid::TronGridLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Transport-level lookup failures. Always treated as transient: they feed
/// the retry scheduler, never the state machine.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger request failed: {0}")]
    Transport(String),

    #[error("Ledger request timed out")]
    Timeout,

    #[error("Malformed ledger response: {0}")]
    Parse(String),
}

/// Result of a confirmation depth query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Transaction is on-chain at this depth
    Depth(u32),
    /// Transaction not (yet) visible on the ledger
    NotFound,
    /// Transaction definitively rejected (double-spend, reverted)
    Rejected(String),
}

/// Idempotent read access to the external ledger. Both queries are safe to
/// call repeatedly and concurrently across distinct transfers.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Current confirmation depth of a known transaction
    async fn confirmation_depth(
        &self,
        tx_reference: &str,
    ) -> Result<ConfirmationStatus, LedgerError>;

    /// Any inbound transaction matching the expected address and amount
    /// since `since`. Returns the chain reference on a match.
    async fn find_inbound_transaction(
        &self,
        address: &str,
        amount: Decimal,
        since: DateTime<Utc>,
    ) -> Result<Option<String>, LedgerError>;
}

/// Scriptable mock ledger for tests
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct MockLedger {
        depths: Mutex<HashMap<String, ConfirmationStatus>>,
        inbound: Mutex<Option<String>>,
        /// Remaining lookups that fail with a transport error
        fail_lookups: Mutex<u32>,
        depth_calls: AtomicUsize,
        inbound_calls: AtomicUsize,
    }

    impl MockLedger {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_depth(&self, tx_reference: &str, depth: u32) {
            self.depths
                .lock()
                .unwrap()
                .insert(tx_reference.to_string(), ConfirmationStatus::Depth(depth));
        }

        pub fn set_rejected(&self, tx_reference: &str, reason: &str) {
            self.depths.lock().unwrap().insert(
                tx_reference.to_string(),
                ConfirmationStatus::Rejected(reason.to_string()),
            );
        }

        pub fn set_inbound(&self, tx_reference: Option<&str>) {
            *self.inbound.lock().unwrap() = tx_reference.map(str::to_string);
        }

        /// Make the next `n` lookups fail with a transport error
        pub fn fail_next(&self, n: u32) {
            *self.fail_lookups.lock().unwrap() = n;
        }

        pub fn depth_calls(&self) -> usize {
            self.depth_calls.load(Ordering::SeqCst)
        }

        pub fn inbound_calls(&self) -> usize {
            self.inbound_calls.load(Ordering::SeqCst)
        }

        fn take_failure(&self) -> bool {
            let mut remaining = self.fail_lookups.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    #[async_trait]
    impl LedgerQuery for MockLedger {
        async fn confirmation_depth(
            &self,
            tx_reference: &str,
        ) -> Result<ConfirmationStatus, LedgerError> {
            self.depth_calls.fetch_add(1, Ordering::SeqCst);
            if self.take_failure() {
                return Err(LedgerError::Transport("mock transport failure".to_string()));
            }
            Ok(self
                .depths
                .lock()
                .unwrap()
                .get(tx_reference)
                .cloned()
                .unwrap_or(ConfirmationStatus::NotFound))
        }

        async fn find_inbound_transaction(
            &self,
            _address: &str,
            _amount: Decimal,
            _since: DateTime<Utc>,
        ) -> Result<Option<String>, LedgerError> {
            self.inbound_calls.fetch_add(1, Ordering::SeqCst);
            if self.take_failure() {
                return Err(LedgerError::Transport("mock transport failure".to_string()));
            }
            Ok(self.inbound.lock().unwrap().clone())
        }
    }
}

#[cfg(test)]
pub use mock::MockLedger;
