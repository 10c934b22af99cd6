//! Notification collaborator seam
//!
//! The engine emits one fire-and-forget event per terminal transition.
//! Delivery failure must never roll back the transfer's own state, so the
//! trait is infallible from the caller's side; implementations log their
//! own trouble.

use async_trait::async_trait;
use tracing::info;

use crate::transfer::types::TransferRecord;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called exactly once per transfer, at the terminal transition commit
    async fn terminal_transition(&self, transfer: &TransferRecord);
}

/// Log-only notifier used when no delivery collaborator is wired
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn terminal_transition(&self, transfer: &TransferRecord) {
        info!(
            transfer_id = %transfer.id,
            owner_id = %transfer.owner_id,
            state = %transfer.state,
            failure_reason = transfer.failure_reason.as_deref().unwrap_or(""),
            "Terminal transition"
        );
    }
}


#[cfg(test)]
pub use mock::MockNotifier;
