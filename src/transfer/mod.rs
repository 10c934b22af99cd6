//! Transfer Lifecycle Engine
//!
//! Tracks a crypto-to-fiat conversion request from submission through
//! on-chain confirmation to settlement or failure.
//!
//! # Architecture
//!
//! The engine reasons about an external, eventually-consistent ledger it
//! does not control. All ledger access is idempotent reads; all internal
//! mutation funnels through the store's compare-and-swap keyed on
//! `state_version`.
//!
//! # State Machine
//!
//! ```text
//! CREATED → AWAITING_DEPOSIT → DEPOSIT_DETECTED → CONFIRMING → SETTLED
//!                 ↓                    ↓               ↓
//!              EXPIRED / FAILED (from any non-terminal state)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **CAS-only writes**: a write naming a stale `state_version` is
//!    rejected, never silently applied
//! 2. **Monotonic confirmations**: `confirmation_count` never decreases,
//!    enforced at the transition boundary
//! 3. **Terminal finality**: stale in-flight results against a terminal
//!    record are discarded on return
//! 4. **One lease per transfer**: at most one in-flight lookup and one
//!    in-flight transition per transfer id

pub mod engine;
pub mod error;
pub mod machine;
pub mod poller;
pub mod retry;
pub mod state;
pub mod stats;
pub mod store;
pub mod types;
pub mod validator;


// Re-exports for convenience
pub use engine::TransferEngine;
pub use error::{EngineError, ValidationError};
pub use machine::Transition;
pub use poller::ConfirmationPoller;
pub use retry::RetryPolicy;
pub use state::TransferState;
pub use stats::{StatsWindow, TransferStats};
pub use store::{CasOutcome, PgTransferStore, StateWrite, TransferStore};
pub use types::{BankDetails, Evidence, NewTransfer, TransferId, TransferRecord};
