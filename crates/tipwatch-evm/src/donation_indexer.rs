//! Donation indexer: decodes `Donate` logs for blocks the head tracker has
//! already confirmed.
//!
//! The source of truth is the tracker's cursor table, never the node. Logs
//! are fetched by block hash, so a block the tracker confirmed can only
//! yield that block's logs. Each height is committed in one transaction:
//! the donation cursor row together with every record decoded from it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use tipwatch_core::cursor::{CursorEntry, CursorTable};
use tipwatch_core::error::IndexerError;
use tipwatch_core::reorg::{CatchUp, Plan};
use tipwatch_core::runner::{PassOutcome, Reconciler};
use tipwatch_core::store::{CursorStore, DonationStore};
use tipwatch_core::tracker::ConfirmedHeads;
use tipwatch_core::types::{same_hash, DonationRecord};

use crate::decoder::DonationDecoder;
use crate::fetcher::{EvmRpcClient, LogFilter};
use crate::notifier::{spawn_notify, Notifier};

pub struct DonationIndexer<C, S: ?Sized> {
    client: C,
    store: Arc<S>,
    heads: ConfirmedHeads<S>,
    catch_up: CatchUp,
    contract_address: String,
    decoder: DonationDecoder,
    notifier: Option<Arc<dyn Notifier>>,
}

impl<C: EvmRpcClient, S: DonationStore + ?Sized> DonationIndexer<C, S> {
    pub fn new(
        client: C,
        store: Arc<S>,
        catch_up: CatchUp,
        contract_address: impl Into<String>,
    ) -> Self {
        Self {
            client,
            heads: ConfirmedHeads::new(Arc::clone(&store)),
            store,
            catch_up,
            contract_address: contract_address.into(),
            decoder: DonationDecoder::new(),
            notifier: None,
        }
    }

    /// Send every committed donation to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// The most recent donation cursor row, `None` before the first block.
    pub async fn current_donation_cursor(&self) -> Result<Option<CursorEntry>, IndexerError> {
        self.store.latest(CursorTable::Donations).await
    }

    /// Fetch and decode the donations of the block `(height, hash)`.
    async fn donations_in(
        &self,
        height: u64,
        hash: &str,
    ) -> Result<Vec<DonationRecord>, IndexerError> {
        let filter = LogFilter {
            address: self.contract_address.clone(),
            topics: vec![self.decoder.donate_topic().to_string()],
            block_hash: hash.to_string(),
        };

        let mut records = Vec::new();
        for log in self.client.get_logs(&filter).await? {
            if log.is_removed() {
                debug!(height, tx = %log.tx_hash, "skipping removed log");
                continue;
            }
            if !same_hash(&log.block_hash, hash) {
                return Err(IndexerError::Rpc(format!(
                    "node returned a log of block {} when asked for {hash}",
                    log.block_hash
                )));
            }
            records.push(self.decoder.decode(&log, height, hash)?);
        }
        Ok(records)
    }

    fn notify(&self, records: Vec<DonationRecord>) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        for record in records {
            spawn_notify(Arc::clone(notifier), record);
        }
    }
}

#[async_trait]
impl<C: EvmRpcClient, S: DonationStore + ?Sized> Reconciler for DonationIndexer<C, S> {
    fn name(&self) -> &str {
        "donations"
    }

    async fn reconcile_once(&self) -> Result<PassOutcome, IndexerError> {
        let local = self.current_donation_cursor().await?;

        let window = match self.catch_up.plan(local.as_ref(), &self.heads).await? {
            Plan::Truncate(divergence) => {
                let from = divergence.truncate_from();
                let removed = self
                    .store
                    .truncate_from(CursorTable::Donations, from)
                    .await?;
                warn!(
                    indexer = "donations",
                    %divergence,
                    from,
                    removed,
                    "confirmed heads changed, donations truncated"
                );
                return Ok(PassOutcome::Truncated {
                    from,
                    removed,
                    divergence,
                });
            }
            Plan::CatchUp(window) if window.is_empty() => return Ok(PassOutcome::UpToDate),
            Plan::CatchUp(window) => window,
        };

        let mut last = None;
        let mut found = 0usize;
        for height in window.heights() {
            let Some(hash) = self.heads.confirmed_hash(height).await? else {
                debug!(height, "height no longer confirmed, stopping batch");
                break;
            };

            let records = self.donations_in(height, &hash).await?;
            self.store
                .commit_block(&CursorEntry::new(height, hash.as_str()), &records)
                .await?;
            if !records.is_empty() {
                debug!(height, count = records.len(), "donations stored");
            }
            found += records.len();
            self.notify(records);
            last = Some(height);
        }

        let Some(to) = last else {
            return Ok(PassOutcome::UpToDate);
        };
        let complete = window.end() == Some(to);
        info!(
            indexer = "donations",
            from = window.start,
            to,
            donations = found,
            complete,
            "donations indexed"
        );
        Ok(PassOutcome::Advanced {
            from: window.start,
            to,
            complete,
        })
    }
}
