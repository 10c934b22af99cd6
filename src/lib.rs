//! xfer-engine - Crypto-to-Fiat Transfer Lifecycle Engine
//!
//! Tracks conversion requests from submission through on-chain
//! confirmation to settlement or failure, against an external ledger the
//! engine does not control.
//!
//! # Modules
//!
//! - [`config`] - Engine configuration, loaded once and passed by reference
//! - [`db`] - PostgreSQL connection management
//! - [`ledger`] - Ledger collaborator contract (confirmation depth, inbound scan)
//! - [`transfer`] - State machine, store, poller, retry scheduler, stats
//! - [`wallet`] - Balance mirror reconciliation
//! - [`notify`] - Terminal transition notifications

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod transfer;
pub mod wallet;

// Convenient re-exports at crate root
pub use config::{AppConfig, EngineConfig};
pub use db::Database;
pub use ledger::{ConfirmationStatus, LedgerError, LedgerQuery, TronGridLedger};
pub use notify::{LogNotifier, Notifier};
pub use transfer::{
    ConfirmationPoller, EngineError, Evidence, NewTransfer, PgTransferStore, TransferEngine,
    TransferId, TransferRecord, TransferState, TransferStore, ValidationError,
};
pub use wallet::{PgWalletLedger, Reconciler, WalletLedger};
