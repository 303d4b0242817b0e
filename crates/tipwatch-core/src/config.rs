//! Indexer configuration.

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::error::IndexerError;

/// Configuration shared by the head tracker and the donation indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// JSON-RPC endpoint of the chain.
    pub rpc_url: String,
    /// Address of the contract emitting `Donate` events.
    pub contract_address: String,
    /// Floor height: used as the cursor while a table is empty, so the first
    /// indexed height is `start_block + 1`.
    pub start_block: u64,
    /// Maximum number of heights indexed per pass.
    pub max_batch: u64,
    /// Wait between passes once caught up (milliseconds).
    pub poll_interval_ms: u64,
    /// Wait between passes while catching up (milliseconds).
    pub min_interval_ms: u64,
    /// Backoff after transient failures.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Base URL of the donation alert webhook. `None` disables notifications.
    #[serde(default)]
    pub notification_base_url: Option<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            contract_address: String::new(),
            start_block: 0,
            max_batch: 50,
            poll_interval_ms: 2_000,
            min_interval_ms: 0,
            backoff: BackoffConfig::default(),
            notification_base_url: None,
        }
    }
}

impl IndexerConfig {
    /// Reject configurations the indexers cannot start with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.rpc_url.trim().is_empty() {
            return Err(IndexerError::Config("RPC URL is required".into()));
        }
        if !is_hex_address(&self.contract_address) {
            return Err(IndexerError::Config(format!(
                "invalid contract address: '{}'",
                self.contract_address
            )));
        }
        if self.max_batch == 0 {
            return Err(IndexerError::Config("max batch must be at least 1".into()));
        }
        if let Some(url) = &self.notification_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(IndexerError::Config(format!(
                    "notification base URL must be http(s): '{url}'"
                )));
            }
        }
        Ok(())
    }
}

/// `0x` followed by 40 hex digits.
fn is_hex_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
