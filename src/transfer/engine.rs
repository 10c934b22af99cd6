//! Transfer engine
//!
//! Owns the write path: creation, evidence application, retry bookkeeping,
//! expiry and admin overrides all funnel through one bounded
//! read/derive/compare-and-swap loop. Terminal commits invoke the wallet
//! reconciler synchronously and then emit the notification event, so no
//! settled transfer is ever left un-reconciled.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::EngineError;
use super::machine::{self, DEPOSIT_WINDOW_REASON, Transition};
use super::retry::{RETRIES_EXHAUSTED_REASON, RetryPolicy};
use super::state::TransferState;
use super::stats::{StatsWindow, TransferStats};
use super::store::{CasOutcome, StateWrite, TransferStore};
use super::types::{Evidence, NewTransfer, TransferId, TransferRecord};
use super::validator;
use crate::config::EngineConfig;
use crate::notify::Notifier;
use crate::wallet::Reconciler;

pub struct TransferEngine {
    store: Arc<dyn TransferStore>,
    reconciler: Reconciler,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    retry_policy: RetryPolicy,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn TransferStore>,
        reconciler: Reconciler,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let retry_policy = RetryPolicy::new(&config.retry);
        Self {
            store,
            reconciler,
            notifier,
            config,
            retry_policy,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Store access for the poller's watchable scan and leases
    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    /// Validate and persist a new transfer request.
    ///
    /// The record is created in CREATED and advanced to AWAITING_DEPOSIT in
    /// the same call; the second step is purely administrative. A typed
    /// validation rejection creates no record at all.
    pub async fn create(&self, req: NewTransfer) -> Result<TransferRecord, EngineError> {
        let breakdown = validator::validate(req.source_amount, &self.config)?;
        let now = Utc::now();

        let mut record = TransferRecord::create(
            &req,
            breakdown.fee_amount,
            breakdown.net_payout_amount,
            &self.config,
            now,
        );
        if let Some(ref tx_reference) = req.announced_tx_reference {
            record.chain_tx_reference = Some(tx_reference.clone());
        }

        self.store.create(&record).await?;

        let mut write = StateWrite::from_record(&record);
        write.state = TransferState::AwaitingDeposit;
        write.status_message = Some("awaiting deposit".to_string());

        match self
            .store
            .compare_and_swap(record.id, record.state_version, write)
            .await?
        {
            CasOutcome::Applied { .. } => {}
            // Nobody else can know this id yet
            CasOutcome::Conflict => {
                return Err(EngineError::Conflict(record.id.to_string()));
            }
        }

        info!(
            transfer_id = %record.id,
            owner_id = %record.owner_id,
            amount = %record.source_amount,
            fee = %record.fee_amount,
            "Transfer created"
        );

        self.must_get(record.id).await
    }

    pub async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, EngineError> {
        self.store.get(id).await
    }

    pub async fn list_by_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<TransferRecord>, EngineError> {
        self.store.list_by_owner(owner_id).await
    }

    pub async fn stats(&self, window: StatsWindow) -> Result<TransferStats, EngineError> {
        self.store.aggregate_stats(window).await
    }

    /// Apply one piece of poller evidence.
    ///
    /// Evidence against a record that turned terminal while the lookup was
    /// in flight is discarded, not applied; terminal states are final.
    pub async fn apply_evidence(
        &self,
        id: TransferId,
        evidence: Evidence,
    ) -> Result<TransferRecord, EngineError> {
        self.transition_loop(id, |record| {
            let transition = machine::next(record, &evidence)?;
            Ok(Self::write_for(record, transition))
        })
        .await
    }

    /// Expire the transfer if its deposit window has elapsed with no
    /// confirmation progress. Returns the record either way.
    pub async fn expire_if_due(&self, id: TransferId) -> Result<TransferRecord, EngineError> {
        let now = Utc::now();
        self.transition_loop(id, move |record| {
            if !record.is_expired(now) {
                return Ok(None);
            }
            Ok(Self::write_for(record, Transition::Expire))
        })
        .await
    }

    /// Record a transient external lookup failure for this transfer.
    ///
    /// Increments the retry counter and schedules the next attempt with
    /// exponential backoff; past the ceiling the transfer fails terminally.
    pub async fn record_lookup_failure(
        &self,
        id: TransferId,
        error: &str,
    ) -> Result<TransferRecord, EngineError> {
        let policy = self.retry_policy.clone();
        let error = error.to_string();
        self.transition_loop(id, move |record| {
            let failures = record.retry_count + 1;

            if policy.is_exhausted(failures) {
                return Ok(Self::write_for(
                    record,
                    Transition::Fail {
                        reason: RETRIES_EXHAUSTED_REASON.to_string(),
                    },
                ));
            }

            let mut write = StateWrite::from_record(record);
            write.retry_count = failures;
            write.next_retry_at = Some(policy.next_retry_at(record.retry_count, Utc::now()));
            write.status_message = Some(format!(
                "ledger lookup failed ({}), attempt {}/{}",
                error,
                failures,
                policy.max_retries()
            ));
            Ok(Some(write))
        })
        .await
    }

    /// Clear retry bookkeeping after a lookup succeeded without producing a
    /// transition.
    pub async fn record_lookup_success(
        &self,
        id: TransferId,
    ) -> Result<TransferRecord, EngineError> {
        self.transition_loop(id, |record| {
            if record.retry_count == 0 && record.next_retry_at.is_none() {
                return Ok(None);
            }
            let mut write = StateWrite::from_record(record);
            write.retry_count = 0;
            write.next_retry_at = None;
            Ok(Some(write))
        })
        .await
    }

    /// Manual override: force a non-terminal transfer to FAILED.
    ///
    /// Settlement can never be forced; it is only reachable through
    /// confirmation evidence. The override takes the same per-transfer
    /// lease as the poller, so it cannot race an automatic transition.
    pub async fn admin_fail(
        &self,
        id: TransferId,
        admin_id: Uuid,
        reason: &str,
    ) -> Result<TransferRecord, EngineError> {
        let lease_owner = Uuid::new_v4();
        let ttl = std::time::Duration::from_secs(self.config.poller.lease_ttl_secs);

        if !self
            .store
            .acquire_lease(id, lease_owner, ttl, Utc::now())
            .await?
        {
            return Err(EngineError::Conflict(format!(
                "transfer {} is being processed, retry shortly",
                id
            )));
        }

        let reason = reason.to_string();
        let result = self
            .transition_loop(id, move |record| {
                if record.state.is_terminal() {
                    return Err(EngineError::TerminalState(record.id.to_string()));
                }
                let mut write = StateWrite::from_record(record);
                write.state = TransferState::Failed;
                write.failure_reason = Some(reason.clone());
                write.status_message = Some(reason.clone());
                write.processed_by = Some(admin_id);
                write.retry_count = 0;
                write.next_retry_at = None;
                Ok(Some(write))
            })
            .await;

        self.store.release_lease(id, lease_owner).await?;

        if let Ok(ref record) = result {
            info!(
                transfer_id = %id,
                admin_id = %admin_id,
                state = %record.state,
                "Admin override applied"
            );
        }

        result
    }

    /// Bounded read/derive/CAS loop shared by every mutation path.
    ///
    /// `derive` inspects the freshly read record and returns the write to
    /// attempt, or None for a no-op. A conflict re-reads and re-derives;
    /// evidence against a now-terminal record is dropped silently. Terminal
    /// commits trigger reconciliation and notification exactly once, on the
    /// winning write.
    async fn transition_loop<F>(
        &self,
        id: TransferId,
        derive: F,
    ) -> Result<TransferRecord, EngineError>
    where
        F: Fn(&TransferRecord) -> Result<Option<StateWrite>, EngineError>,
    {
        let attempts = self.config.poller.cas_retry_limit.max(1);

        for _ in 0..attempts {
            let record = self.must_get(id).await?;

            if record.state.is_terminal() {
                debug!(
                    transfer_id = %id,
                    state = %record.state,
                    "Record is terminal, discarding stale transition"
                );
                return Ok(record);
            }

            let Some(write) = derive(&record)? else {
                return Ok(record);
            };
            let new_state = write.state;

            match self
                .store
                .compare_and_swap(id, record.state_version, write)
                .await?
            {
                CasOutcome::Applied { .. } => {
                    let updated = self.must_get(id).await?;
                    if new_state.is_terminal() {
                        self.commit_terminal(&updated).await?;
                    }
                    return Ok(updated);
                }
                CasOutcome::Conflict => {
                    debug!(transfer_id = %id, "CAS conflict, re-reading");
                    continue;
                }
            }
        }

        warn!(transfer_id = %id, attempts, "Transition lost all CAS rounds");
        Err(EngineError::Conflict(id.to_string()))
    }

    /// Reconcile then notify. Runs only on the write that won the terminal
    /// CAS; the posting guard in the wallet ledger absorbs crash-retries.
    async fn commit_terminal(&self, record: &TransferRecord) -> Result<(), EngineError> {
        self.reconciler.reconcile(record).await?;
        self.notifier.terminal_transition(record).await;
        Ok(())
    }

    async fn must_get(&self, id: TransferId) -> Result<TransferRecord, EngineError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::TransferNotFound(id.to_string()))
    }

    fn write_for(record: &TransferRecord, transition: Transition) -> Option<StateWrite> {
        match transition {
            Transition::Hold => None,

            Transition::RecordDeposit { tx_reference } => {
                let mut write = Self::reset_retry(record);
                write.state = TransferState::DepositDetected;
                write.status_message = Some(format!("deposit detected ({})", tx_reference));
                write.chain_tx_reference = Some(tx_reference);
                Some(write)
            }

            Transition::TrackConfirmations { depth } => {
                let unchanged = record.state == TransferState::Confirming
                    && record.confirmation_count == depth
                    && record.retry_count == 0
                    && record.next_retry_at.is_none();
                if unchanged {
                    return None;
                }
                let mut write = Self::reset_retry(record);
                write.state = TransferState::Confirming;
                write.confirmation_count = depth;
                write.status_message = Some(format!(
                    "waiting for confirmations ({}/{})",
                    depth, record.required_confirmations
                ));
                Some(write)
            }

            Transition::Settle { depth } => {
                let mut write = Self::reset_retry(record);
                write.state = TransferState::Settled;
                write.confirmation_count = depth;
                write.settled_at = Some(Utc::now());
                write.status_message =
                    Some(format!("confirmed with {} confirmations", depth));
                Some(write)
            }

            Transition::Fail { reason } => {
                let mut write = Self::reset_retry(record);
                write.state = TransferState::Failed;
                write.status_message = Some(reason.clone());
                write.failure_reason = Some(reason);
                Some(write)
            }

            Transition::Expire => {
                let mut write = Self::reset_retry(record);
                write.state = TransferState::Expired;
                write.status_message = Some(DEPOSIT_WINDOW_REASON.to_string());
                write.failure_reason = Some(DEPOSIT_WINDOW_REASON.to_string());
                Some(write)
            }
        }
    }

    fn reset_retry(record: &TransferRecord) -> StateWrite {
        let mut write = StateWrite::from_record(record);
        write.retry_count = 0;
        write.next_retry_at = None;
        write
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MockNotifier;
    use crate::transfer::store::MemoryStore;
    use crate::transfer::types::BankDetails;
    use crate::wallet::MockWalletLedger;
    use rust_decimal::Decimal;
    use serde_json::json;

    struct TestHarness {
        engine: TransferEngine,
        store: Arc<MemoryStore>,
        wallet: Arc<MockWalletLedger>,
        notifier: Arc<MockNotifier>,
    }

    impl TestHarness {
        fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        fn with_config(config: EngineConfig) -> Self {
            let store = Arc::new(MemoryStore::new());
            let wallet = Arc::new(MockWalletLedger::new());
            let notifier = Arc::new(MockNotifier::new());
            let engine = TransferEngine::new(
                store.clone(),
                Reconciler::new(wallet.clone()),
                notifier.clone(),
                config,
            );
            Self {
                engine,
                store,
                wallet,
                notifier,
            }
        }

        async fn created_transfer(&self) -> TransferRecord {
            let req = NewTransfer::new(
                Uuid::new_v4(),
                Decimal::new(100_000, 2), // 1000.00
                BankDetails::new(1, json!({"account_number": "1234567890"})),
            );
            self.engine.create(req).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_advances_to_awaiting_deposit() {
        let harness = TestHarness::new();
        let record = harness.created_transfer().await;

        assert_eq!(record.state, TransferState::AwaitingDeposit);
        assert_eq!(record.state_version, 2);
        assert_eq!(record.fee_amount, Decimal::new(1000, 2)); // 10.00
        assert_eq!(record.net_payout_amount, Decimal::new(99_000, 2)); // 990.00
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_range_without_record() {
        let harness = TestHarness::new();
        let owner = Uuid::new_v4();

        for amount in [Decimal::new(500, 2), Decimal::new(6_000_000, 2)] {
            let req = NewTransfer::new(owner, amount, BankDetails::new(1, json!({})));
            let err = harness.engine.create(req).await.unwrap_err();
            assert_eq!(err.code(), "AMOUNT_OUT_OF_RANGE");
        }

        assert!(harness.engine.list_by_owner(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_settlement() {
        let harness = TestHarness::new();
        let record = harness.created_transfer().await;
        harness
            .wallet
            .fund(record.owner_id, "USDT", Decimal::new(200_000, 2));

        let record = harness
            .engine
            .apply_evidence(
                record.id,
                Evidence::InboundDetected {
                    tx_reference: "tx-life".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(record.state, TransferState::DepositDetected);
        assert_eq!(record.chain_tx_reference.as_deref(), Some("tx-life"));

        let record = harness
            .engine
            .apply_evidence(record.id, Evidence::Confirmations { depth: 3 })
            .await
            .unwrap();
        assert_eq!(record.state, TransferState::Confirming);
        assert_eq!(record.confirmation_count, 3);

        let record = harness
            .engine
            .apply_evidence(record.id, Evidence::Confirmations { depth: 6 })
            .await
            .unwrap();
        assert_eq!(record.state, TransferState::Settled);
        assert!(record.settled_at.is_some());
        assert!(record.failure_reason.is_none());

        // Reconciled and notified exactly once
        assert_eq!(harness.wallet.applied_count(), 1);
        assert_eq!(harness.notifier.count_for(record.id), 1);

        let balance = harness
            .wallet
            .balance(record.owner_id, "USDT")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(balance.balance, Decimal::new(100_000, 2)); // 2000 - 1000
    }

    #[tokio::test]
    async fn test_terminal_immutability_under_stale_evidence() {
        let harness = TestHarness::new();
        let record = harness.created_transfer().await;

        harness
            .engine
            .apply_evidence(
                record.id,
                Evidence::InboundDetected {
                    tx_reference: "tx-term".to_string(),
                },
            )
            .await
            .unwrap();
        let settled = harness
            .engine
            .apply_evidence(record.id, Evidence::Confirmations { depth: 9 })
            .await
            .unwrap();
        assert_eq!(settled.state, TransferState::Settled);

        // Stale and duplicate evidence after settlement changes nothing
        let after = harness
            .engine
            .apply_evidence(record.id, Evidence::Confirmations { depth: 2 })
            .await
            .unwrap();
        assert_eq!(after.state, TransferState::Settled);
        assert_eq!(after.state_version, settled.state_version);
        assert_eq!(after.settled_at, settled.settled_at);

        let after = harness
            .engine
            .apply_evidence(
                record.id,
                Evidence::ChainRejected {
                    reason: "late rejection".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(after.state, TransferState::Settled);
        assert!(after.failure_reason.is_none());

        assert_eq!(harness.wallet.applied_count(), 1);
        assert_eq!(harness.notifier.count_for(record.id), 1);
    }

    #[tokio::test]
    async fn test_monotonic_confirmation_count() {
        let harness = TestHarness::new();
        let record = harness.created_transfer().await;

        harness
            .engine
            .apply_evidence(
                record.id,
                Evidence::InboundDetected {
                    tx_reference: "tx-mono".to_string(),
                },
            )
            .await
            .unwrap();

        for depth in [4, 1, 3, 2] {
            harness
                .engine
                .apply_evidence(record.id, Evidence::Confirmations { depth })
                .await
                .unwrap();
        }

        let stored = harness.store.snapshot(record.id).unwrap();
        assert_eq!(stored.confirmation_count, 4);
        assert_eq!(stored.state, TransferState::Confirming);
    }

    #[tokio::test]
    async fn test_chain_rejection_fails_and_notifies() {
        let harness = TestHarness::new();
        let record = harness.created_transfer().await;

        harness
            .engine
            .apply_evidence(
                record.id,
                Evidence::InboundDetected {
                    tx_reference: "tx-reject".to_string(),
                },
            )
            .await
            .unwrap();
        let failed = harness
            .engine
            .apply_evidence(
                record.id,
                Evidence::ChainRejected {
                    reason: "double-spend detected".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(failed.state, TransferState::Failed);
        assert_eq!(
            failed.failure_reason.as_deref(),
            Some("double-spend detected")
        );
        assert!(failed.settled_at.is_none());

        // Failure applies no balance change under the no-hold design
        assert_eq!(harness.wallet.applied_count(), 0);
        assert_eq!(harness.notifier.count_for(record.id), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_terminally() {
        let mut config = EngineConfig::default();
        config.retry.max_retries = 3;
        let harness = TestHarness::with_config(config);
        let record = harness.created_transfer().await;

        for attempt in 1..=3 {
            let updated = harness
                .engine
                .record_lookup_failure(record.id, "connection refused")
                .await
                .unwrap();
            assert_eq!(updated.retry_count, attempt);
            assert!(updated.next_retry_at.is_some());
            assert_eq!(updated.state, TransferState::AwaitingDeposit);
        }

        // Failure N+1 crosses the ceiling
        let failed = harness
            .engine
            .record_lookup_failure(record.id, "connection refused")
            .await
            .unwrap();
        assert_eq!(failed.state, TransferState::Failed);
        assert_eq!(
            failed.failure_reason.as_deref(),
            Some(RETRIES_EXHAUSTED_REASON)
        );

        // No longer watchable
        let watchable = harness.store.list_watchable(Utc::now()).await.unwrap();
        assert!(watchable.iter().all(|r| r.id != record.id));
        assert_eq!(harness.notifier.count_for(record.id), 1);
    }

    #[tokio::test]
    async fn test_lookup_success_resets_retries() {
        let harness = TestHarness::new();
        let record = harness.created_transfer().await;

        let updated = harness
            .engine
            .record_lookup_failure(record.id, "timeout")
            .await
            .unwrap();
        assert_eq!(updated.retry_count, 1);

        let updated = harness.engine.record_lookup_success(record.id).await.unwrap();
        assert_eq!(updated.retry_count, 0);
        assert!(updated.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_expiry_after_window() {
        let mut config = EngineConfig::default();
        config.deposit_window_secs = 0;
        let harness = TestHarness::with_config(config);
        let record = harness.created_transfer().await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let expired = harness.engine.expire_if_due(record.id).await.unwrap();

        assert_eq!(expired.state, TransferState::Expired);
        assert_eq!(
            expired.failure_reason.as_deref(),
            Some(DEPOSIT_WINDOW_REASON)
        );
        assert_eq!(harness.notifier.count_for(record.id), 1);
    }

    #[tokio::test]
    async fn test_confirmation_progress_suppresses_expiry() {
        let mut config = EngineConfig::default();
        config.deposit_window_secs = 0;
        let harness = TestHarness::with_config(config);
        let record = harness.created_transfer().await;

        harness
            .engine
            .apply_evidence(
                record.id,
                Evidence::InboundDetected {
                    tx_reference: "tx-progress".to_string(),
                },
            )
            .await
            .unwrap();
        harness
            .engine
            .apply_evidence(record.id, Evidence::Confirmations { depth: 1 })
            .await
            .unwrap();

        let record = harness.engine.expire_if_due(record.id).await.unwrap();
        assert_eq!(record.state, TransferState::Confirming);
    }

    #[tokio::test]
    async fn test_admin_fail_override() {
        let harness = TestHarness::new();
        let record = harness.created_transfer().await;
        let admin_id = Uuid::new_v4();

        let failed = harness
            .engine
            .admin_fail(record.id, admin_id, "manual review rejected")
            .await
            .unwrap();

        assert_eq!(failed.state, TransferState::Failed);
        assert_eq!(failed.processed_by, Some(admin_id));
        assert_eq!(
            failed.failure_reason.as_deref(),
            Some("manual review rejected")
        );
        assert_eq!(harness.notifier.count_for(record.id), 1);
    }

    #[tokio::test]
    async fn test_admin_cannot_touch_terminal() {
        let harness = TestHarness::new();
        let record = harness.created_transfer().await;
        let admin_id = Uuid::new_v4();

        harness
            .engine
            .admin_fail(record.id, admin_id, "first override")
            .await
            .unwrap();

        let err = harness
            .engine
            .admin_fail(record.id, admin_id, "second override")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TerminalState(_)));
    }

    #[tokio::test]
    async fn test_admin_fail_blocked_by_held_lease() {
        let harness = TestHarness::new();
        let record = harness.created_transfer().await;

        // Poller-style worker holds the lease
        let worker = Uuid::new_v4();
        assert!(
            harness
                .store
                .acquire_lease(
                    record.id,
                    worker,
                    std::time::Duration::from_secs(30),
                    Utc::now()
                )
                .await
                .unwrap()
        );

        let err = harness
            .engine
            .admin_fail(record.id, Uuid::new_v4(), "should bounce")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_announced_reference_settles_without_inbound_scan() {
        let harness = TestHarness::new();
        let req = NewTransfer::new(
            Uuid::new_v4(),
            Decimal::new(50_000, 2),
            BankDetails::new(1, json!({})),
        )
        .with_tx_reference("tx-announced".to_string());

        let record = harness.engine.create(req).await.unwrap();
        assert_eq!(record.state, TransferState::AwaitingDeposit);
        assert_eq!(record.chain_tx_reference.as_deref(), Some("tx-announced"));

        let record = harness
            .engine
            .apply_evidence(record.id, Evidence::Confirmations { depth: 6 })
            .await
            .unwrap();
        assert_eq!(record.state, TransferState::Settled);
    }

    #[tokio::test]
    async fn test_duplicate_announced_reference_rejected() {
        let harness = TestHarness::new();
        let req = NewTransfer::new(
            Uuid::new_v4(),
            Decimal::new(50_000, 2),
            BankDetails::new(1, json!({})),
        )
        .with_tx_reference("tx-claimed".to_string());
        harness.engine.create(req).await.unwrap();

        let req = NewTransfer::new(
            Uuid::new_v4(),
            Decimal::new(50_000, 2),
            BankDetails::new(1, json!({})),
        )
        .with_tx_reference("tx-claimed".to_string());
        let err = harness.engine.create(req).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateChainReference(_)));
    }

    #[tokio::test]
    async fn test_stats_reflect_store() {
        let harness = TestHarness::new();
        let settled = harness.created_transfer().await;
        harness
            .engine
            .apply_evidence(
                settled.id,
                Evidence::InboundDetected {
                    tx_reference: "tx-stats".to_string(),
                },
            )
            .await
            .unwrap();
        harness
            .engine
            .apply_evidence(settled.id, Evidence::Confirmations { depth: 6 })
            .await
            .unwrap();

        let pending = harness.created_transfer().await;
        harness
            .engine
            .admin_fail(pending.id, Uuid::new_v4(), "cancelled")
            .await
            .unwrap();
        harness.created_transfer().await;

        let stats = harness.engine.stats(StatsWindow::all()).await.unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.settled, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.awaiting_deposit, 1);
        assert_eq!(stats.settled_volume, Decimal::new(100_000, 2));
        assert_eq!(stats.fee_revenue, Decimal::new(1000, 2));
    }
}
