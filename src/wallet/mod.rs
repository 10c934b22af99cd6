//! Wallet balance reconciliation
//!
//! The engine keeps an internal mirror of each user's crypto balance. When
//! a transfer settles, the mirror is debited by the source amount (the
//! deposit already happened on-chain) and the fee is recorded as revenue.
//! Funds are not held provisionally at creation, so failed and expired
//! transfers apply no balance change; the wallet invariant is *balance
//! reflects settled transfers only*.
//!
//! Exactly-once: the engine invokes the reconciler only from the winner of
//! the terminal compare-and-swap, and the ledger additionally records a
//! posting row per transfer id so a crash-retry cannot double-apply.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::transfer::error::EngineError;
use crate::transfer::state::TransferState;
use crate::transfer::types::TransferRecord;

/// Bounded attempts for the wallet's own version CAS loop
const WALLET_CAS_ATTEMPTS: u32 = 5;

/// Balance mirror for one owner/currency pair
#[derive(Debug, Clone, PartialEq)]
pub struct WalletBalance {
    pub owner_id: Uuid,
    pub currency: String,
    pub balance: Decimal,
    pub version: i64,
}

/// Wallet-side collaborator contract.
///
/// `apply_settlement` must be idempotent per transfer id: the first call
/// applies the debit and fee posting and returns true, every later call is
/// a no-op returning false.
#[async_trait]
pub trait WalletLedger: Send + Sync {
    async fn apply_settlement(&self, transfer: &TransferRecord) -> Result<bool, EngineError>;

    async fn balance(
        &self,
        owner_id: Uuid,
        currency: &str,
    ) -> Result<Option<WalletBalance>, EngineError>;
}

/// Applies the net effect of a terminal transfer to the wallet mirror
/// exactly once.
pub struct Reconciler {
    ledger: std::sync::Arc<dyn WalletLedger>,
}

impl Reconciler {
    pub fn new(ledger: std::sync::Arc<dyn WalletLedger>) -> Self {
        Self { ledger }
    }

    /// Invoked by the engine synchronously with the terminal CAS commit.
    pub async fn reconcile(&self, transfer: &TransferRecord) -> Result<(), EngineError> {
        match transfer.state {
            TransferState::Settled => {
                let applied = self.ledger.apply_settlement(transfer).await?;
                if applied {
                    info!(
                        transfer_id = %transfer.id,
                        owner_id = %transfer.owner_id,
                        amount = %transfer.source_amount,
                        fee = %transfer.fee_amount,
                        "Settlement reconciled"
                    );
                } else {
                    warn!(
                        transfer_id = %transfer.id,
                        "Settlement already reconciled, skipping"
                    );
                }
                Ok(())
            }
            // No provisional hold exists, so there is nothing to reverse
            TransferState::Failed | TransferState::Expired => Ok(()),
            state => Err(EngineError::Wallet(format!(
                "reconcile called for non-terminal state {}",
                state
            ))),
        }
    }
}

/// PostgreSQL wallet ledger
///
/// The fee is credited to a per-currency revenue row keyed by the nil
/// owner id, debits and postings commit in one transaction, and the
/// balance update is version-checked like every other write in the system.
pub struct PgWalletLedger {
    pool: PgPool,
}

impl PgWalletLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletLedger for PgWalletLedger {
    async fn apply_settlement(&self, transfer: &TransferRecord) -> Result<bool, EngineError> {
        for _ in 0..WALLET_CAS_ATTEMPTS {
            let mut tx = self.pool.begin().await?;

            // Posting row is the idempotency guard
            let posted = sqlx::query(
                r#"
                INSERT INTO wallet_postings_tb (transfer_id, owner_id, currency, amount, fee, posted_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (transfer_id) DO NOTHING
                "#,
            )
            .bind(transfer.id.to_string())
            .bind(transfer.owner_id)
            .bind(&transfer.source_currency)
            .bind(transfer.source_amount)
            .bind(transfer.fee_amount)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            if posted.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(false);
            }

            let row = sqlx::query(
                "SELECT balance, version FROM wallets_tb WHERE owner_id = $1 AND currency = $2",
            )
            .bind(transfer.owner_id)
            .bind(&transfer.source_currency)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                tx.rollback().await?;
                return Err(EngineError::Wallet(format!(
                    "no wallet for owner {} currency {}",
                    transfer.owner_id, transfer.source_currency
                )));
            };

            let version: i64 = row.get("version");

            let debited = sqlx::query(
                r#"
                UPDATE wallets_tb
                SET balance = balance - $1, version = version + 1, updated_at = NOW()
                WHERE owner_id = $2 AND currency = $3 AND version = $4
                "#,
            )
            .bind(transfer.source_amount)
            .bind(transfer.owner_id)
            .bind(&transfer.source_currency)
            .bind(version)
            .execute(&mut *tx)
            .await?;

            if debited.rows_affected() == 0 {
                // Another writer moved the wallet; retry the whole unit
                tx.rollback().await?;
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO wallets_tb (owner_id, currency, balance, version, updated_at)
                VALUES ($1, $2, $3, 1, NOW())
                ON CONFLICT (owner_id, currency) DO UPDATE
                SET balance = wallets_tb.balance + EXCLUDED.balance,
                    version = wallets_tb.version + 1,
                    updated_at = NOW()
                "#,
            )
            .bind(Uuid::nil()) // revenue account
            .bind(&transfer.payout_currency)
            .bind(transfer.fee_amount)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(true);
        }

        Err(EngineError::Conflict(format!(
            "wallet update for transfer {} lost {} CAS rounds",
            transfer.id, WALLET_CAS_ATTEMPTS
        )))
    }

    async fn balance(
        &self,
        owner_id: Uuid,
        currency: &str,
    ) -> Result<Option<WalletBalance>, EngineError> {
        let row = sqlx::query(
            "SELECT owner_id, currency, balance, version FROM wallets_tb WHERE owner_id = $1 AND currency = $2",
        )
        .bind(owner_id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| WalletBalance {
            owner_id: r.get("owner_id"),
            currency: r.get("currency"),
            balance: r.get("balance"),
            version: r.get("version"),
        }))
    }
}


#[cfg(test)]
pub use mock::MockWalletLedger;
