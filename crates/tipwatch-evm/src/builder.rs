//! Fluent builder API for wiring the two indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tipwatch_evm::IndexerBuilder;
//! use tipwatch_storage::InMemoryStorage;
//!
//! # fn example() -> Result<(), tipwatch_core::IndexerError> {
//! let pipeline = IndexerBuilder::new()
//!     .rpc_url("http://localhost:8545")
//!     .contract_address("0x5FbDB2315678afecb367f032d93F642f64180aa3")
//!     .start_block(19_000_000)
//!     .max_batch(50)
//!     .build(Arc::new(InMemoryStorage::new()))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tipwatch_core::backoff::BackoffConfig;
use tipwatch_core::config::IndexerConfig;
use tipwatch_core::error::IndexerError;
use tipwatch_core::reorg::CatchUp;
use tipwatch_core::runner::PollOptions;
use tipwatch_core::store::DonationStore;

use crate::donation_indexer::DonationIndexer;
use crate::head_tracker::HeadTracker;
use crate::notifier::{TokenRegistry, WebhookNotifier};
use crate::rpc::{HttpClientConfig, HttpRpcClient};

/// Both indexers over one RPC client and one store, plus their loop timing.
pub struct Pipeline<S: ?Sized> {
    pub heads: HeadTracker<Arc<HttpRpcClient>, S>,
    pub donations: DonationIndexer<Arc<HttpRpcClient>, S>,
    pub options: PollOptions,
}

/// Fluent builder for [`IndexerConfig`] and the [`Pipeline`] it describes.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    tokens: TokenRegistry,
    http: HttpClientConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    pub fn contract_address(mut self, address: impl Into<String>) -> Self {
        self.config.contract_address = address.into();
        self
    }

    /// Set the floor height; indexing starts at `block + 1`.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set the number of heights indexed per pass.
    pub fn max_batch(mut self, n: u64) -> Self {
        self.config.max_batch = n;
        self
    }

    /// Wait between passes once caught up.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Wait between passes while catching up.
    pub fn min_interval_ms(mut self, ms: u64) -> Self {
        self.config.min_interval_ms = ms;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Enable donation alerts for the tokens in `tokens`.
    pub fn notifications(mut self, base_url: impl Into<String>, tokens: TokenRegistry) -> Self {
        self.config.notification_base_url = Some(base_url.into());
        self.tokens = tokens;
        self
    }

    /// Per-request retry policy of the JSON-RPC client.
    pub fn http_client(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }

    /// Validate and return the `IndexerConfig`.
    pub fn build_config(self) -> Result<IndexerConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build both indexers on top of `store`.
    pub fn build<S: DonationStore + ?Sized>(
        self,
        store: Arc<S>,
    ) -> Result<Pipeline<S>, IndexerError> {
        self.config.validate()?;

        let client = Arc::new(HttpRpcClient::new(&self.config.rpc_url, self.http)?);
        let catch_up = CatchUp::new(self.config.start_block, self.config.max_batch);

        let heads = HeadTracker::new(Arc::clone(&client), Arc::clone(&store), catch_up);
        let mut donations =
            DonationIndexer::new(client, store, catch_up, &self.config.contract_address);

        if let Some(base_url) = &self.config.notification_base_url {
            let notifier = WebhookNotifier::new(base_url, self.tokens)
                .map_err(|e| IndexerError::Config(format!("notifier: {e}")))?;
            donations = donations.with_notifier(Arc::new(notifier));
        }

        Ok(Pipeline {
            heads,
            donations,
            options: PollOptions::from_config(&self.config),
        })
    }
}
