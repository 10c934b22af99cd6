//! Transfer state machine
//!
//! Pure transition logic: given the current record and one piece of
//! external evidence, decide the next state. No I/O here; the engine owns
//! committing decisions through the store's compare-and-swap.

use super::error::EngineError;
use super::state::TransferState;
use super::types::{Evidence, TransferRecord};

/// Failure reason written when the deposit window elapses
pub const DEPOSIT_WINDOW_REASON: &str = "deposit window elapsed";

/// Decision produced by the state machine for one evidence event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Evidence warrants no state change (stale, duplicate, or not yet
    /// meaningful)
    Hold,
    /// Record the observed inbound transaction and advance to
    /// DEPOSIT_DETECTED
    RecordDeposit { tx_reference: String },
    /// Advance to / stay in CONFIRMING with an updated confirmation count
    TrackConfirmations { depth: u32 },
    /// Threshold reached: settle. The only path into SETTLED.
    Settle { depth: u32 },
    /// Definitive failure (on-chain rejection, exhausted retries, override)
    Fail { reason: String },
    /// Deposit window elapsed with no confirmation progress
    Expire,
}

/// Decide the next transition for `record` given `evidence`.
///
/// Callers must not feed evidence for terminal records; doing so is a
/// programming-contract violation and aborts the operation loudly rather
/// than coercing state.
///
/// Monotonicity is enforced here, at the transition boundary: a
/// confirmation count below the stored value is lifted to it, so stale
/// cached depths can never walk the count backwards regardless of event
/// arrival order.
pub fn next(record: &TransferRecord, evidence: &Evidence) -> Result<Transition, EngineError> {
    if record.state.is_terminal() {
        return Err(EngineError::TerminalState(record.id.to_string()));
    }

    let transition = match evidence {
        Evidence::InboundDetected { tx_reference } => match record.state {
            // Re-observation of an already recorded deposit is a no-op
            _ if record.chain_tx_reference.is_some() => Transition::Hold,
            TransferState::AwaitingDeposit => Transition::RecordDeposit {
                tx_reference: tx_reference.clone(),
            },
            _ => Transition::Hold,
        },

        Evidence::Confirmations { depth } => {
            let watchable_with_reference = record.chain_tx_reference.is_some()
                && matches!(
                    record.state,
                    TransferState::AwaitingDeposit
                        | TransferState::DepositDetected
                        | TransferState::Confirming
                );

            if !watchable_with_reference {
                Transition::Hold
            } else {
                let effective = (*depth).max(record.confirmation_count);
                if effective >= record.required_confirmations {
                    Transition::Settle { depth: effective }
                } else {
                    Transition::TrackConfirmations { depth: effective }
                }
            }
        }

        Evidence::ChainRejected { reason } => Transition::Fail {
            reason: reason.clone(),
        },
    };

    Ok(transition)
}
