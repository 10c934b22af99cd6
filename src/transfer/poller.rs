//! Confirmation poller
//!
//! Fixed-interval background loop. Each cycle scans the store for
//! watchable transfers whose backoff has elapsed, then fans out over a
//! bounded worker pool: one ledger lookup per transfer, never two for the
//! same transfer at once. The per-transfer lease provides that exclusion;
//! a transfer whose lease is held is skipped, not queued.
//!
//! Lookup results become state machine evidence; lookup failures go to the
//! retry scheduler, never to the state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::engine::TransferEngine;
use super::error::EngineError;
use super::types::{Evidence, TransferRecord};
use crate::ledger::{ConfirmationStatus, LedgerQuery};

pub struct ConfirmationPoller {
    engine: Arc<TransferEngine>,
    ledger: Arc<dyn LedgerQuery>,
}

impl ConfirmationPoller {
    pub fn new(engine: Arc<TransferEngine>, ledger: Arc<dyn LedgerQuery>) -> Self {
        Self { engine, ledger }
    }

    /// Run the polling loop forever
    pub async fn run(&self) -> ! {
        let interval = Duration::from_millis(self.engine.config().poller.poll_interval_ms);
        info!(
            poll_interval_ms = interval.as_millis() as u64,
            concurrency = self.engine.config().poller.concurrency,
            "Confirmation poller starting"
        );

        loop {
            match self.poll_once().await {
                Ok(processed) if processed > 0 => {
                    debug!(processed, "Poll cycle complete");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Poll cycle failed");
                }
            }

            sleep(interval).await;
        }
    }

    /// Run a single poll cycle. Returns the number of transfers processed
    /// (transfers skipped because their lease is held do not count).
    pub async fn poll_once(&self) -> Result<usize, EngineError> {
        let now = Utc::now();
        let batch = self.engine.store().list_watchable(now).await?;

        if batch.is_empty() {
            return Ok(0);
        }

        let semaphore = Arc::new(Semaphore::new(self.engine.config().poller.concurrency));
        let mut handles = Vec::with_capacity(batch.len());

        for record in batch {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");
            let engine = self.engine.clone();
            let ledger = self.ledger.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                Self::process_one(engine, ledger, record).await
            }));
        }

        let mut processed = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => error!(error = %e, "Poller worker panicked"),
            }
        }

        Ok(processed)
    }

    /// Process one transfer under its exclusion lease.
    ///
    /// Returns false when the lease is held elsewhere. Errors inside the
    /// lookup/transition are logged and absorbed; one sick transfer must
    /// not poison the cycle.
    async fn process_one(
        engine: Arc<TransferEngine>,
        ledger: Arc<dyn LedgerQuery>,
        record: TransferRecord,
    ) -> bool {
        let lease_owner = Uuid::new_v4();
        let ttl = Duration::from_secs(engine.config().poller.lease_ttl_secs);

        let acquired = match engine
            .store()
            .acquire_lease(record.id, lease_owner, ttl, Utc::now())
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                error!(transfer_id = %record.id, error = %e, "Lease acquisition failed");
                return false;
            }
        };
        if !acquired {
            debug!(transfer_id = %record.id, "Lease held elsewhere, skipping");
            return false;
        }

        if let Err(e) = Self::observe(&engine, ledger.as_ref(), &record).await {
            error!(transfer_id = %record.id, error = %e, "Transfer processing failed");
        }

        if let Err(e) = engine.store().release_lease(record.id, lease_owner).await {
            warn!(transfer_id = %record.id, error = %e, "Lease release failed");
        }

        true
    }

    /// Query the ledger for this transfer and feed the outcome onward
    async fn observe(
        engine: &TransferEngine,
        ledger: &dyn LedgerQuery,
        record: &TransferRecord,
    ) -> Result<(), EngineError> {
        // Expiry first: a transfer past its window needs no lookup
        if record.is_expired(Utc::now()) {
            engine.expire_if_due(record.id).await?;
            return Ok(());
        }

        match &record.chain_tx_reference {
            Some(tx_reference) => match ledger.confirmation_depth(tx_reference).await {
                Ok(ConfirmationStatus::Depth(depth)) => {
                    engine
                        .apply_evidence(record.id, Evidence::Confirmations { depth })
                        .await?;
                }
                Ok(ConfirmationStatus::NotFound) => {
                    // Successful read, the transaction just is not visible
                    // yet
                    debug!(transfer_id = %record.id, "Chain transaction not yet visible");
                    engine.record_lookup_success(record.id).await?;
                }
                Ok(ConfirmationStatus::Rejected(reason)) => {
                    engine
                        .apply_evidence(record.id, Evidence::ChainRejected { reason })
                        .await?;
                }
                Err(e) => {
                    warn!(transfer_id = %record.id, error = %e, "Confirmation lookup failed");
                    engine
                        .record_lookup_failure(record.id, &e.to_string())
                        .await?;
                }
            },

            None => {
                match ledger
                    .find_inbound_transaction(
                        &record.deposit_address,
                        record.source_amount,
                        record.created_at,
                    )
                    .await
                {
                    Ok(Some(tx_reference)) => {
                        engine
                            .apply_evidence(record.id, Evidence::InboundDetected { tx_reference })
                            .await?;
                    }
                    Ok(None) => {
                        engine.record_lookup_success(record.id).await?;
                    }
                    Err(e) => {
                        warn!(transfer_id = %record.id, error = %e, "Inbound scan failed");
                        engine
                            .record_lookup_failure(record.id, &e.to_string())
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }
}
