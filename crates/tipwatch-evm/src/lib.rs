//! tipwatch-evm: EVM adapters and the two indexers.
//!
//! - [`HeadTracker`]: mirrors canonical block hashes from the node
//! - [`DonationIndexer`]: decodes `Donate` events for heights the tracker confirmed
//! - [`DonationDecoder`]: raw log → [`DonationRecord`](tipwatch_core::DonationRecord)
//! - [`HttpRpcClient`]: JSON-RPC over HTTP with per-request retry
//! - [`WebhookNotifier`]: fire-and-forget donation alerts

pub mod builder;
pub mod decoder;
pub mod donation_indexer;
pub mod fetcher;
pub mod head_tracker;
pub mod notifier;
pub mod rpc;

pub use builder::{IndexerBuilder, Pipeline};
pub use decoder::DonationDecoder;
pub use donation_indexer::DonationIndexer;
pub use fetcher::{EvmRpcClient, LogFilter, RawLog, RpcHashSource};
pub use head_tracker::HeadTracker;
pub use notifier::{Notifier, TokenInfo, TokenRegistry, WebhookNotifier};
pub use rpc::{HttpClientConfig, HttpRpcClient};
