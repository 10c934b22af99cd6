//! Transfer error types

use thiserror::Error;

/// Synchronous creation-time rejections. No record is created when one of
/// these fires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must be a positive value")]
    AmountNotPositive,

    #[error("Amount outside allowed range [{min}, {max}]")]
    AmountOutOfRange { min: String, max: String },

    #[error("Fee equals or exceeds amount, payout would not be positive")]
    FeeExceedsAmount,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::AmountNotPositive => "AMOUNT_NOT_POSITIVE",
            ValidationError::AmountOutOfRange { .. } => "AMOUNT_OUT_OF_RANGE",
            ValidationError::FeeExceedsAmount => "FEE_EXCEEDS_AMOUNT",
        }
    }
}

/// Engine error taxonomy
///
/// Transient external failures never surface here; the poller hands them to
/// the retry scheduler. What remains is validation, concurrency conflicts,
/// store failures, and programming-contract violations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Optimistic-concurrency collision that survived the bounded
    /// re-read/re-derive loop
    #[error("Concurrent writer conflict on transfer {0}")]
    Conflict(String),

    /// Attempted transition out of a terminal state. Contract failure:
    /// the operation aborts loudly, state is never coerced.
    #[error("Transfer {0} is terminal, no further transitions accepted")]
    TerminalState(String),

    /// Another transfer already claimed this on-chain transaction
    #[error("Chain reference already claimed: {0}")]
    DuplicateChainReference(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Admins may not force settlement")]
    SettlementForbidden,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Wallet reconciliation error: {0}")]
    Wallet(String),
}

impl EngineError {
    /// Stable error code for status queries and notification payloads
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(e) => e.code(),
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::TerminalState(_) => "TERMINAL_STATE",
            EngineError::DuplicateChainReference(_) => "DUPLICATE_CHAIN_REFERENCE",
            EngineError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            EngineError::SettlementForbidden => "SETTLEMENT_FORBIDDEN",
            EngineError::Store(_) => "STORE_ERROR",
            EngineError::Wallet(_) => "WALLET_ERROR",
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Store(e.to_string())
    }
}
