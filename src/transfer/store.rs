//! Transfer store contract and PostgreSQL implementation
//!
//! The compare-and-swap is the sole mutation path: every writer constructs
//! the new field values and names the `state_version` it derived them from.
//! A conflict means another writer already advanced the record; the caller
//! must re-read and re-derive, never blind-retry the same write.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::error::EngineError;
use super::state::TransferState;
use super::stats::{StatsWindow, TransferStats};
use super::types::{BankDetails, TransferId, TransferRecord};

/// Upper bound on transfers returned per watchable scan
const WATCHABLE_BATCH: i64 = 500;

/// Field values for one CAS state write.
///
/// Start from the current record with [`StateWrite::from_record`] and change
/// only what the transition moved; unset optionals preserve stored values.
#[derive(Debug, Clone)]
pub struct StateWrite {
    pub state: TransferState,
    pub confirmation_count: u32,
    /// Write-once: only populated by the transition that records the
    /// deposit; preserved otherwise
    pub chain_tx_reference: Option<String>,
    pub status_message: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub processed_by: Option<Uuid>,
}

impl StateWrite {
    pub fn from_record(record: &TransferRecord) -> Self {
        Self {
            state: record.state,
            confirmation_count: record.confirmation_count,
            chain_tx_reference: record.chain_tx_reference.clone(),
            status_message: record.status_message.clone(),
            retry_count: record.retry_count,
            next_retry_at: record.next_retry_at,
            settled_at: record.settled_at,
            failure_reason: record.failure_reason.clone(),
            processed_by: record.processed_by,
        }
    }
}

/// Outcome of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Write accepted; the record now carries this version
    Applied { new_version: i64 },
    /// Another writer advanced the record first
    Conflict,
}

impl CasOutcome {
    #[inline]
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied { .. })
    }
}

/// Durable record of transfers and their state transitions.
///
/// Backing implementations must provide atomic conditional writes; a store
/// without them cannot uphold the lost-update guarantee.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Persist a freshly created record (state CREATED, version 1)
    async fn create(&self, record: &TransferRecord) -> Result<(), EngineError>;

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, EngineError>;

    /// All non-terminal transfers in a watchable state whose retry backoff
    /// has elapsed (`next_retry_at <= now` or unset)
    async fn list_watchable(&self, now: DateTime<Utc>)
    -> Result<Vec<TransferRecord>, EngineError>;

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<TransferRecord>, EngineError>;

    /// Sole mutation path. Applies `write` and bumps `state_version` by 1
    /// only if the stored version still equals `expected_version`.
    async fn compare_and_swap(
        &self,
        id: TransferId,
        expected_version: i64,
        write: StateWrite,
    ) -> Result<CasOutcome, EngineError>;

    /// Claim the per-transfer exclusion lease. Returns false while another
    /// live owner holds it; an expired lease is taken over.
    async fn acquire_lease(
        &self,
        id: TransferId,
        owner: Uuid,
        ttl: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError>;

    /// Release a lease held by `owner`. Releasing someone else's lease is a
    /// no-op.
    async fn release_lease(&self, id: TransferId, owner: Uuid) -> Result<(), EngineError>;

    /// Read-only rollup over the store; reflects the store at query time
    async fn aggregate_stats(&self, window: StatsWindow) -> Result<TransferStats, EngineError>;
}

/// PostgreSQL-backed transfer store
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<TransferRecord, EngineError> {
        let id_str: String = row.get("id");
        let id: TransferId = id_str
            .parse()
            .map_err(|_| EngineError::Store("Invalid transfer id format".to_string()))?;

        let state_id: i16 = row.get("state");
        let state = TransferState::from_id(state_id)
            .ok_or_else(|| EngineError::Store(format!("Invalid state ID: {}", state_id)))?;

        Ok(TransferRecord {
            id,
            owner_id: row.get("owner_id"),
            source_amount: row.get("source_amount"),
            source_currency: row.get("source_currency"),
            fee_amount: row.get("fee_amount"),
            net_payout_amount: row.get("net_payout_amount"),
            payout_currency: row.get("payout_currency"),
            bank_details: BankDetails {
                schema_version: row.get::<i16, _>("bank_schema_version") as u16,
                payload: row.get("bank_details"),
            },
            deposit_address: row.get("deposit_address"),
            chain_tx_reference: row.get("chain_tx_reference"),
            confirmation_count: row.get::<i32, _>("confirmation_count") as u32,
            required_confirmations: row.get::<i32, _>("required_confirmations") as u32,
            state,
            state_version: row.get("state_version"),
            status_message: row.get("status_message"),
            retry_count: row.get::<i32, _>("retry_count") as u32,
            next_retry_at: row.get("next_retry_at"),
            processed_by: row.get("processed_by"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            expires_at: row.get("expires_at"),
            settled_at: row.get("settled_at"),
            failure_reason: row.get("failure_reason"),
        })
    }

    fn map_unique_violation(e: sqlx::Error, tx_reference: Option<&str>) -> EngineError {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return EngineError::DuplicateChainReference(
                    tx_reference.unwrap_or("<unknown>").to_string(),
                );
            }
        }
        EngineError::from(e)
    }
}

const RECORD_COLUMNS: &str = "id, owner_id, source_amount, source_currency, fee_amount, \
     net_payout_amount, payout_currency, bank_schema_version, bank_details, deposit_address, \
     chain_tx_reference, confirmation_count, required_confirmations, state, state_version, \
     status_message, retry_count, next_retry_at, processed_by, created_at, updated_at, \
     expires_at, settled_at, failure_reason";

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn create(&self, record: &TransferRecord) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO transfers_tb
                (id, owner_id, source_amount, source_currency, fee_amount, net_payout_amount,
                 payout_currency, bank_schema_version, bank_details, deposit_address,
                 chain_tx_reference, confirmation_count, required_confirmations, state,
                 state_version, status_message, retry_count, next_retry_at, processed_by,
                 created_at, updated_at, expires_at, settled_at, failure_reason)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                 $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.owner_id)
        .bind(record.source_amount)
        .bind(&record.source_currency)
        .bind(record.fee_amount)
        .bind(record.net_payout_amount)
        .bind(&record.payout_currency)
        .bind(record.bank_details.schema_version as i16)
        .bind(&record.bank_details.payload)
        .bind(&record.deposit_address)
        .bind(&record.chain_tx_reference)
        .bind(record.confirmation_count as i32)
        .bind(record.required_confirmations as i32)
        .bind(record.state.id())
        .bind(record.state_version)
        .bind(&record.status_message)
        .bind(record.retry_count as i32)
        .bind(record.next_retry_at)
        .bind(record.processed_by)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.expires_at)
        .bind(record.settled_at)
        .bind(&record.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_unique_violation(e, record.chain_tx_reference.as_deref()))?;

        Ok(())
    }

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM transfers_tb WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_watchable(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransferRecord>, EngineError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM transfers_tb
            WHERE state IN ($1, $2, $3)
              AND (next_retry_at IS NULL OR next_retry_at <= $4)
            ORDER BY updated_at ASC
            LIMIT $5
            "#
        ))
        .bind(TransferState::AwaitingDeposit.id())
        .bind(TransferState::DepositDetected.id())
        .bind(TransferState::Confirming.id())
        .bind(now)
        .bind(WATCHABLE_BATCH)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<TransferRecord>, EngineError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM transfers_tb
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn compare_and_swap(
        &self,
        id: TransferId,
        expected_version: i64,
        write: StateWrite,
    ) -> Result<CasOutcome, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE transfers_tb
            SET state = $1,
                confirmation_count = $2,
                chain_tx_reference = COALESCE($3, chain_tx_reference),
                status_message = $4,
                retry_count = $5,
                next_retry_at = $6,
                settled_at = COALESCE($7, settled_at),
                failure_reason = COALESCE($8, failure_reason),
                processed_by = COALESCE($9, processed_by),
                state_version = state_version + 1,
                updated_at = NOW()
            WHERE id = $10 AND state_version = $11
            "#,
        )
        .bind(write.state.id())
        .bind(write.confirmation_count as i32)
        .bind(&write.chain_tx_reference)
        .bind(&write.status_message)
        .bind(write.retry_count as i32)
        .bind(write.next_retry_at)
        .bind(write.settled_at)
        .bind(&write.failure_reason)
        .bind(write.processed_by)
        .bind(id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_unique_violation(e, write.chain_tx_reference.as_deref()))?;

        if result.rows_affected() > 0 {
            Ok(CasOutcome::Applied {
                new_version: expected_version + 1,
            })
        } else {
            Ok(CasOutcome::Conflict)
        }
    }

    async fn acquire_lease(
        &self,
        id: TransferId,
        owner: Uuid,
        ttl: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let expires_at = now + Duration::milliseconds(ttl.as_millis() as i64);

        let result = sqlx::query(
            r#"
            INSERT INTO transfer_leases_tb (transfer_id, owner, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (transfer_id) DO UPDATE
            SET owner = EXCLUDED.owner, expires_at = EXCLUDED.expires_at
            WHERE transfer_leases_tb.expires_at <= $4
               OR transfer_leases_tb.owner = EXCLUDED.owner
            "#,
        )
        .bind(id.to_string())
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, id: TransferId, owner: Uuid) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM transfer_leases_tb WHERE transfer_id = $1 AND owner = $2")
            .bind(id.to_string())
            .bind(owner)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn aggregate_stats(&self, window: StatsWindow) -> Result<TransferStats, EngineError> {
        let (from, to) = window.bounds();

        let row = sqlx::query(
            r#"
            SELECT count(*) AS total,
                   count(*) FILTER (WHERE state = $1) AS awaiting_deposit,
                   count(*) FILTER (WHERE state = $2) AS deposit_detected,
                   count(*) FILTER (WHERE state = $3) AS confirming,
                   count(*) FILTER (WHERE state = $4) AS settled,
                   count(*) FILTER (WHERE state = $5) AS failed,
                   count(*) FILTER (WHERE state = $6) AS expired,
                   COALESCE(sum(source_amount) FILTER (WHERE state = $4), 0) AS settled_volume,
                   COALESCE(sum(fee_amount) FILTER (WHERE state = $4), 0) AS fee_revenue
            FROM transfers_tb
            WHERE created_at >= $7 AND created_at < $8
            "#,
        )
        .bind(TransferState::AwaitingDeposit.id())
        .bind(TransferState::DepositDetected.id())
        .bind(TransferState::Confirming.id())
        .bind(TransferState::Settled.id())
        .bind(TransferState::Failed.id())
        .bind(TransferState::Expired.id())
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(TransferStats {
            total_requests: row.get::<i64, _>("total") as u64,
            awaiting_deposit: row.get::<i64, _>("awaiting_deposit") as u64,
            deposit_detected: row.get::<i64, _>("deposit_detected") as u64,
            confirming: row.get::<i64, _>("confirming") as u64,
            settled: row.get::<i64, _>("settled") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            expired: row.get::<i64, _>("expired") as u64,
            settled_volume: row.get::<Decimal, _>("settled_volume"),
            fee_revenue: row.get::<Decimal, _>("fee_revenue"),
        })
    }
}


#[cfg(test)]
pub use mem::MemoryStore;

#[cfg(test)]
mod tests {
    use super::mem::MemoryStore;
    use super::*;
    use crate::config::EngineConfig;
    use crate::transfer::types::{BankDetails, NewTransfer};
    use serde_json::json;

    fn record() -> TransferRecord {
        let req = NewTransfer::new(
            Uuid::new_v4(),
            Decimal::new(100_000, 2),
            BankDetails::new(1, json!({"account_number": "99"})),
        );
        TransferRecord::create(
            &req,
            Decimal::new(1000, 2),
            Decimal::new(99_000, 2),
            &EngineConfig::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_cas_applies_and_increments_version() {
        let store = MemoryStore::new();
        let record = record();
        store.create(&record).await.unwrap();

        let mut write = StateWrite::from_record(&record);
        write.state = TransferState::AwaitingDeposit;

        let outcome = store
            .compare_and_swap(record.id, record.state_version, write)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied { new_version: 2 });

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, TransferState::AwaitingDeposit);
        assert_eq!(stored.state_version, 2);
    }

    #[tokio::test]
    async fn test_cas_stale_version_conflicts() {
        let store = MemoryStore::new();
        let record = record();
        store.create(&record).await.unwrap();

        let mut write = StateWrite::from_record(&record);
        write.state = TransferState::AwaitingDeposit;
        store
            .compare_and_swap(record.id, record.state_version, write.clone())
            .await
            .unwrap();

        // Same expected version again: the record moved on, so conflict
        let outcome = store
            .compare_and_swap(record.id, record.state_version, write)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_chain_reference_unique_across_transfers() {
        let store = MemoryStore::new();
        let first = record();
        let second = record();
        store.create(&first).await.unwrap();
        store.create(&second).await.unwrap();

        let mut claim = StateWrite::from_record(&first);
        claim.state = TransferState::DepositDetected;
        claim.chain_tx_reference = Some("tx-abc".to_string());
        store
            .compare_and_swap(first.id, 1, claim)
            .await
            .unwrap();

        let mut duplicate = StateWrite::from_record(&second);
        duplicate.state = TransferState::DepositDetected;
        duplicate.chain_tx_reference = Some("tx-abc".to_string());
        let err = store
            .compare_and_swap(second.id, 1, duplicate)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateChainReference(_)));
    }

    #[tokio::test]
    async fn test_watchable_respects_backoff() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut ready = record();
        ready.state = TransferState::AwaitingDeposit;
        store.create(&ready).await.unwrap();

        let mut backing_off = record();
        backing_off.state = TransferState::Confirming;
        backing_off.next_retry_at = Some(now + Duration::seconds(60));
        store.create(&backing_off).await.unwrap();

        let watchable = store.list_watchable(now).await.unwrap();
        assert_eq!(watchable.len(), 1);
        assert_eq!(watchable[0].id, ready.id);

        // Once the backoff elapses it is picked up again
        let later = now + Duration::seconds(61);
        assert_eq!(store.list_watchable(later).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lease_exclusivity_and_takeover() {
        let store = MemoryStore::new();
        let record = record();
        store.create(&record).await.unwrap();

        let now = Utc::now();
        let ttl = std::time::Duration::from_secs(30);
        let first_owner = Uuid::new_v4();
        let second_owner = Uuid::new_v4();

        assert!(store.acquire_lease(record.id, first_owner, ttl, now).await.unwrap());
        // Held: second owner bounces
        assert!(!store.acquire_lease(record.id, second_owner, ttl, now).await.unwrap());
        // Re-entrant for the same owner
        assert!(store.acquire_lease(record.id, first_owner, ttl, now).await.unwrap());

        // Expired lease is taken over
        let after_expiry = now + Duration::seconds(31);
        assert!(
            store
                .acquire_lease(record.id, second_owner, ttl, after_expiry)
                .await
                .unwrap()
        );

        // Release by non-holder is a no-op
        store.release_lease(record.id, first_owner).await.unwrap();
        assert!(!store.acquire_lease(record.id, first_owner, ttl, after_expiry).await.unwrap());

        store.release_lease(record.id, second_owner).await.unwrap();
        assert!(store.acquire_lease(record.id, first_owner, ttl, after_expiry).await.unwrap());
    }
}
