//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Transient transport failures (connection errors, timeouts, HTTP 429/5xx)
//! are retried in place with exponential backoff. Node-side JSON-RPC errors
//! are returned immediately. Whatever still fails surfaces as
//! [`IndexerError::Rpc`] and aborts the pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use tipwatch_core::backoff::{Backoff, BackoffConfig};
use tipwatch_core::error::IndexerError;
use tipwatch_core::types::BlockHeader;

use crate::fetcher::{block_from_json, parse_hex_u64, EvmRpcClient, LogFilter, RawLog};

// ─── Wire types ───────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return the node's error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ─── Transport errors ─────────────────────────────────────────────────────────

/// Errors that can occur while talking to the node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure, ...
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    /// JSON-RPC error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl TransportError {
    /// Returns `true` if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Rpc(_) | Self::Deserialization(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Deserialization(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<TransportError> for IndexerError {
    fn from(e: TransportError) -> Self {
        IndexerError::Rpc(e.to_string())
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// Configuration for [`HttpRpcClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_backoff: BackoffConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: BackoffConfig {
                initial_ms: 100,
                max_ms: 10_000,
                multiplier: 2.0,
                jitter_fraction: 0.1,
            },
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC over HTTP with per-request retry.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    max_retries: u32,
    backoff: Backoff,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create a client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            max_retries: config.max_retries,
            backoff: Backoff::new(config.retry_backoff),
            next_id: AtomicU64::new(1),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, HttpClientConfig::default())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<Value, TransportError> {
        let resp = self.http.post(&self.url).json(req).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        resp.json::<JsonRpcResponse>()
            .await?
            .into_result()
            .map_err(TransportError::Rpc)
    }

    /// Call `method` with `params`, retrying transient failures.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let req = JsonRpcRequest::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        );

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        url = %self.url,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        let value = self.call("eth_blockNumber", vec![]).await?;
        value
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| IndexerError::Rpc(format!("malformed eth_blockNumber result: {value}")))
    }

    async fn get_block(&self, height: u64) -> Result<Option<BlockHeader>, IndexerError> {
        let value = self
            .call("eth_getBlockByNumber", vec![json!(format!("0x{height:x}")), json!(false)])
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        block_from_json(&value)
            .map(Some)
            .ok_or_else(|| IndexerError::Rpc(format!("malformed block {height}")))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        let value = self.call("eth_getLogs", vec![filter.to_param()]).await?;
        serde_json::from_value(value)
            .map_err(|e| IndexerError::Rpc(format!("malformed eth_getLogs result: {e}")))
    }
}
