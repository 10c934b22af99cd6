//! TronGrid ledger implementation
//!
//! Implements the two ledger queries against the TronGrid HTTP API:
//! transaction info + latest block for confirmation depth, and the TRC20
//! transfer listing for inbound deposit matching.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::{ConfirmationStatus, LedgerError, LedgerQuery};
use crate::config::LedgerConfig;

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";

/// USDT TRC20 token decimals; raw transfer values are integer token units
const TOKEN_DECIMALS: u32 = 6;

pub struct TronGridLedger {
    config: LedgerConfig,
    client: reqwest::Client,
}

#[derive(Deserialize, Debug, Default)]
struct TransactionInfo {
    #[serde(rename = "blockNumber")]
    block_number: Option<u64>,
    receipt: Option<TransactionReceipt>,
}

#[derive(Deserialize, Debug)]
struct TransactionReceipt {
    result: Option<String>,
}

#[derive(Deserialize, Debug)]
struct NowBlock {
    block_header: BlockHeader,
}

#[derive(Deserialize, Debug)]
struct BlockHeader {
    raw_data: BlockRawData,
}

#[derive(Deserialize, Debug)]
struct BlockRawData {
    number: u64,
}

#[derive(Deserialize, Debug)]
struct Trc20Transfers {
    #[serde(default)]
    data: Vec<Trc20Transfer>,
}

#[derive(Deserialize, Debug)]
struct Trc20Transfer {
    transaction_id: String,
    value: String,
}

impl TronGridLedger {
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    fn map_transport(e: reqwest::Error) -> LedgerError {
        if e.is_timeout() {
            LedgerError::Timeout
        } else {
            LedgerError::Transport(e.to_string())
        }
    }

    async fn latest_block_number(&self) -> Result<u64, LedgerError> {
        let response = self
            .request(
                self.client
                    .post(format!("{}/wallet/getnowblock", self.config.api_url)),
            )
            .send()
            .await
            .map_err(Self::map_transport)?;

        let block: NowBlock = response
            .json()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))?;

        Ok(block.block_header.raw_data.number)
    }
}

#[async_trait]
impl LedgerQuery for TronGridLedger {
    async fn confirmation_depth(
        &self,
        tx_reference: &str,
    ) -> Result<ConfirmationStatus, LedgerError> {
        let response = self
            .request(
                self.client
                    .post(format!(
                        "{}/wallet/gettransactioninfobyid",
                        self.config.api_url
                    ))
                    .json(&serde_json::json!({ "value": tx_reference })),
            )
            .send()
            .await
            .map_err(Self::map_transport)?;

        let info: TransactionInfo = response
            .json()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))?;

        // TronGrid answers an unknown hash with an empty object
        let Some(block_number) = info.block_number else {
            debug!(tx_reference, "Transaction not yet on-chain");
            return Ok(ConfirmationStatus::NotFound);
        };

        if let Some(receipt) = &info.receipt {
            if let Some(result) = &receipt.result {
                if result != "SUCCESS" {
                    return Ok(ConfirmationStatus::Rejected(format!(
                        "transaction result {}",
                        result
                    )));
                }
            }
        }

        let latest = self.latest_block_number().await?;
        let depth = latest.saturating_sub(block_number) + 1;

        Ok(ConfirmationStatus::Depth(depth.min(u32::MAX as u64) as u32))
    }

    async fn find_inbound_transaction(
        &self,
        address: &str,
        amount: Decimal,
        since: DateTime<Utc>,
    ) -> Result<Option<String>, LedgerError> {
        let url = format!(
            "{}/v1/accounts/{}/transactions/trc20",
            self.config.api_url, address
        );

        let response = self
            .request(self.client.get(url).query(&[
                ("only_to", "true".to_string()),
                ("min_timestamp", since.timestamp_millis().to_string()),
                ("limit", "50".to_string()),
            ]))
            .send()
            .await
            .map_err(Self::map_transport)?;

        let transfers: Trc20Transfers = response
            .json()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))?;

        for transfer in transfers.data {
            let raw: i128 = transfer
                .value
                .parse()
                .map_err(|_| LedgerError::Parse(format!("bad token value {}", transfer.value)))?;
            let value = Decimal::from_i128_with_scale(raw, TOKEN_DECIMALS);

            if value == amount {
                return Ok(Some(transfer.transaction_id));
            }
        }

        Ok(None)
    }
}
