//! Donation alerts.
//!
//! After a block's donations are committed, each record is handed to a
//! [`Notifier`]. Delivery is best-effort: the indexer never waits for it and
//! never fails because of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use tipwatch_core::types::DonationRecord;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("webhook returned HTTP {status}")]
    Status { status: u16 },

    #[error("invalid amount '{0}'")]
    Amount(String),
}

/// Receives every committed donation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, record: &DonationRecord) -> Result<(), NotifyError>;
}

/// Hand `record` to `notifier` on a background task.
pub fn spawn_notify(notifier: Arc<dyn Notifier>, record: DonationRecord) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&record).await {
            warn!(
                error = %e,
                height = record.height,
                tx = %record.tx_hash,
                recipient = %record.recipient,
                "donation alert not delivered"
            );
        }
    });
}

// ─── Token registry ───────────────────────────────────────────────────────────

/// Display details of an ERC-20 token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u8,
}

/// Tokens alerts are sent for, keyed by address (case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, TokenInfo>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, address: &str, symbol: impl Into<String>, decimals: u8) -> Self {
        self.insert(
            address,
            TokenInfo {
                symbol: symbol.into(),
                decimals,
            },
        );
        self
    }

    pub fn insert(&mut self, address: &str, info: TokenInfo) {
        self.tokens.insert(address.to_ascii_lowercase(), info);
    }

    pub fn get(&self, address: &str) -> Option<&TokenInfo> {
        self.tokens.get(&address.to_ascii_lowercase())
    }

    /// Load from a JSON object `{ "<address>": { "symbol": "...", "decimals": n } }`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, TokenInfo> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for (address, info) in raw {
            registry.insert(&address, info);
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

// ─── Webhook ──────────────────────────────────────────────────────────────────

/// JSON body posted to the alert endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationAlert {
    pub sender_name: String,
    pub message: String,
    /// Token symbol followed by the whole-token amount, e.g. `USDC12`.
    pub tip_amount: String,
}

/// Posts alerts to `{base_url}/users/{recipient}/alerts`.
pub struct WebhookNotifier {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenRegistry,
}

impl WebhookNotifier {
    pub fn new(base_url: impl Into<String>, tokens: TokenRegistry) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            tokens,
        })
    }

    pub fn alert_url(&self, recipient: &str) -> String {
        format!(
            "{}/users/{recipient}/alerts",
            self.base_url.trim_end_matches('/')
        )
    }

    /// Build the alert for `record`; `None` if its token is not tracked.
    pub fn alert_for(&self, record: &DonationRecord) -> Result<Option<DonationAlert>, NotifyError> {
        let Some(token) = self.tokens.get(&record.token_address) else {
            return Ok(None);
        };

        let net = parse_amount(&record.net_amount)?;
        let commission = parse_amount(&record.commission)?;
        let divisor = U256::from(10u64).pow(U256::from(token.decimals));
        let whole = net.saturating_add(commission) / divisor;

        Ok(Some(DonationAlert {
            sender_name: record.donor_name.clone(),
            message: record.message.clone(),
            tip_amount: format!("{}{whole}", token.symbol),
        }))
    }
}

fn parse_amount(s: &str) -> Result<U256, NotifyError> {
    s.parse::<U256>().map_err(|_| NotifyError::Amount(s.to_string()))
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, record: &DonationRecord) -> Result<(), NotifyError> {
        let Some(alert) = self.alert_for(record)? else {
            debug!(token = %record.token_address, "token not tracked, no alert");
            return Ok(());
        };

        let resp = self
            .http
            .post(self.alert_url(&record.recipient))
            .json(&alert)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NotifyError::Status {
                status: resp.status().as_u16(),
            });
        }
        debug!(recipient = %record.recipient, tip = %alert.tip_amount, "donation alert sent");
        Ok(())
    }
}
