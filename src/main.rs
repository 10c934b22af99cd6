use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use xfer_engine::config::AppConfig;
use xfer_engine::db::Database;
use xfer_engine::ledger::TronGridLedger;
use xfer_engine::logging::init_logging;
use xfer_engine::notify::LogNotifier;
use xfer_engine::transfer::{ConfirmationPoller, PgTransferStore, TransferEngine};
use xfer_engine::wallet::{PgWalletLedger, Reconciler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = AppConfig::load(&env);
    let _log_guard = init_logging(&config);

    info!(env = %env, "xfer-engine starting");

    let db = Database::connect(&config.postgres_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.health_check()
        .await
        .context("Database health check failed")?;
    db.init_schema()
        .await
        .context("Schema initialization failed")?;

    let store = Arc::new(PgTransferStore::new(db.pool().clone()));
    let wallet = Arc::new(PgWalletLedger::new(db.pool().clone()));
    let ledger =
        Arc::new(TronGridLedger::new(config.ledger.clone()).context("Ledger client setup failed")?);

    let engine = Arc::new(TransferEngine::new(
        store,
        Reconciler::new(wallet),
        Arc::new(LogNotifier),
        config.engine.clone(),
    ));

    let poller = ConfirmationPoller::new(engine, ledger);
    tokio::spawn(async move { poller.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
