//! EVM block and log fetching.
//!
//! [`EvmRpcClient`] is the seam between the indexers and the node: the HTTP
//! implementation lives in [`crate::rpc`], tests use scripted mocks.
//! [`RpcHashSource`] exposes a client as the head tracker's source of truth.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tipwatch_core::error::IndexerError;
use tipwatch_core::reorg::HashSource;
use tipwatch_core::types::BlockHeader;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Block number as u64, `None` if the node sent garbage.
    pub fn block_number_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.log_index)
    }

    /// Returns `true` if the node flagged this log as removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// `eth_getLogs` filter pinned to a single block by hash.
///
/// Filtering by `blockHash` instead of a number range guarantees the logs
/// belong to exactly the block the caller confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    /// `topics[0]` filter; empty means any event.
    pub topics: Vec<String>,
    pub block_hash: String,
}

impl LogFilter {
    /// JSON object passed as the single `eth_getLogs` parameter.
    pub fn to_param(&self) -> Value {
        let topics = if self.topics.is_empty() {
            json!([])
        } else {
            json!([self.topics])
        };
        json!({
            "address": self.address,
            "topics": topics,
            "blockHash": self.block_hash,
        })
    }
}

/// Trait for fetching EVM data from a JSON-RPC provider.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    /// Current chain head height.
    async fn get_block_number(&self) -> Result<u64, IndexerError>;

    /// Header at `height`, `None` if the node has no block there yet.
    async fn get_block(&self, height: u64) -> Result<Option<BlockHeader>, IndexerError>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError>;
}

#[async_trait]
impl<C: EvmRpcClient + ?Sized> EvmRpcClient for Arc<C> {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        (**self).get_block_number().await
    }

    async fn get_block(&self, height: u64) -> Result<Option<BlockHeader>, IndexerError> {
        (**self).get_block(height).await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        (**self).get_logs(filter).await
    }
}

/// The RPC provider seen as a [`HashSource`].
pub struct RpcHashSource<C> {
    client: C,
}

impl<C: EvmRpcClient> RpcHashSource<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: EvmRpcClient> HashSource for RpcHashSource<C> {
    async fn tip(&self) -> Result<Option<u64>, IndexerError> {
        self.client.get_block_number().await.map(Some)
    }

    async fn hash_at(&self, height: u64) -> Result<Option<String>, IndexerError> {
        Ok(self.client.get_block(height).await?.map(|block| block.hash))
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

/// Convert an `eth_getBlockByNumber` result to a [`BlockHeader`].
pub fn block_from_json(v: &Value) -> Option<BlockHeader> {
    Some(BlockHeader {
        height: parse_hex_u64(v["number"].as_str()?)?,
        hash: v["hash"].as_str()?.to_string(),
        parent_hash: v["parentHash"].as_str()?.to_string(),
    })
}
