//! Transfer lifecycle states
//!
//! State IDs are designed for PostgreSQL storage as SMALLINT.

use std::fmt;

/// Transfer lifecycle states
///
/// ```text
/// CREATED → AWAITING_DEPOSIT → DEPOSIT_DETECTED → CONFIRMING → SETTLED
///                 ↓                    ↓               ↓
///              EXPIRED / FAILED (any non-terminal state)
/// ```
///
/// Terminal states: SETTLED (40), FAILED (-10), EXPIRED (-20)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferState {
    /// Request validated and recorded, not yet watched
    Created = 0,

    /// Waiting for the user's inbound transaction to appear on-chain
    AwaitingDeposit = 10,

    /// Inbound transaction observed, chain reference recorded
    DepositDetected = 20,

    /// Accumulating confirmations toward the required threshold
    Confirming = 30,

    /// Terminal: confirmed and reconciled, payout owed
    Settled = 40,

    /// Terminal: on-chain rejection, exhausted retries, or admin override
    Failed = -10,

    /// Terminal: deposit window elapsed with no confirmation progress
    Expired = -20,
}

impl TransferState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Settled | TransferState::Failed | TransferState::Expired
        )
    }

    /// Check if the poller still expects external evidence for this state
    #[inline]
    pub fn is_watchable(&self) -> bool {
        matches!(
            self,
            TransferState::AwaitingDeposit
                | TransferState::DepositDetected
                | TransferState::Confirming
        )
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferState::Created),
            10 => Some(TransferState::AwaitingDeposit),
            20 => Some(TransferState::DepositDetected),
            30 => Some(TransferState::Confirming),
            40 => Some(TransferState::Settled),
            -10 => Some(TransferState::Failed),
            -20 => Some(TransferState::Expired),
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Created => "CREATED",
            TransferState::AwaitingDeposit => "AWAITING_DEPOSIT",
            TransferState::DepositDetected => "DEPOSIT_DETECTED",
            TransferState::Confirming => "CONFIRMING",
            TransferState::Settled => "SETTLED",
            TransferState::Failed => "FAILED",
            TransferState::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferState::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransferState::Settled.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(TransferState::Expired.is_terminal());

        assert!(!TransferState::Created.is_terminal());
        assert!(!TransferState::AwaitingDeposit.is_terminal());
        assert!(!TransferState::DepositDetected.is_terminal());
        assert!(!TransferState::Confirming.is_terminal());
    }

    #[test]
    fn test_watchable_states() {
        assert!(TransferState::AwaitingDeposit.is_watchable());
        assert!(TransferState::DepositDetected.is_watchable());
        assert!(TransferState::Confirming.is_watchable());

        assert!(!TransferState::Created.is_watchable());
        assert!(!TransferState::Settled.is_watchable());
        assert!(!TransferState::Failed.is_watchable());
        assert!(!TransferState::Expired.is_watchable());
    }

    #[test]
    fn test_state_id_roundtrip() {
        let states = [
            TransferState::Created,
            TransferState::AwaitingDeposit,
            TransferState::DepositDetected,
            TransferState::Confirming,
            TransferState::Settled,
            TransferState::Failed,
            TransferState::Expired,
        ];

        for state in states {
            let id = state.id();
            let recovered = TransferState::from_id(id).unwrap();
            assert_eq!(state, recovered);
        }
    }

    #[test]
    fn test_invalid_state_id() {
        assert!(TransferState::from_id(999).is_none());
        assert!(TransferState::from_id(-999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferState::Created.to_string(), "CREATED");
        assert_eq!(TransferState::Settled.to_string(), "SETTLED");
        assert_eq!(TransferState::Expired.to_string(), "EXPIRED");
    }
}
