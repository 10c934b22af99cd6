use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    /// PostgreSQL connection URL for the transfer store and wallet mirror
    pub postgres_url: String,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Ledger collaborator connection settings (TronGrid HTTP API)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.trongrid.io".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Engine parameters. Loaded once at startup and passed by reference into
/// the validator, state machine and poller. Fee and limits are frozen onto
/// each transfer record at creation, so changing these values never
/// re-prices an in-flight transfer.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    /// Fee as a fraction of the source amount (0.01 = 1%)
    pub fee_percentage: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    /// Decimal places of the fiat payout currency
    pub payout_scale: u32,
    pub source_currency: String,
    pub payout_currency: String,
    /// House address users deposit into; watched by the poller
    pub deposit_address: String,
    pub required_confirmations: u32,
    /// Validity window: a transfer with no confirmation progress past this
    /// age is expired
    pub deposit_window_secs: u64,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_percentage: Decimal::new(1, 2), // 1%
            min_amount: Decimal::new(1000, 2),  // 10.00
            max_amount: Decimal::new(5_000_000, 2), // 50000.00
            payout_scale: 2,
            source_currency: "USDT".to_string(),
            payout_currency: "USD".to_string(),
            deposit_address: String::new(),
            required_confirmations: 6,
            deposit_window_secs: 24 * 3600,
            poller: PollerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollerConfig {
    pub poll_interval_ms: u64,
    /// Max transfers processed concurrently per cycle
    pub concurrency: usize,
    pub lease_ttl_secs: u64,
    /// Bounded re-read attempts after a CAS conflict
    pub cas_retry_limit: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            concurrency: 8,
            lease_ttl_secs: 30,
            cas_retry_limit: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Consecutive lookup failures tolerated before the transfer is failed
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_delay_secs: 300,
            max_retries: 8,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
