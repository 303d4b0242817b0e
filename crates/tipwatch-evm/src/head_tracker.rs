//! Chain head tracker: mirrors canonical block hashes from the RPC provider
//! into the `Heads` cursor table.
//!
//! Every pass first re-verifies the stored cursor against the node. On
//! divergence the cursor row and everything above it are deleted and the
//! pass ends; indexing resumes from the surviving cursor on the next pass.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use tipwatch_core::cursor::{CursorEntry, CursorTable};
use tipwatch_core::error::IndexerError;
use tipwatch_core::reorg::{CatchUp, Plan};
use tipwatch_core::runner::{PassOutcome, Reconciler};
use tipwatch_core::store::CursorStore;

use crate::fetcher::{EvmRpcClient, RpcHashSource};

/// Mirrors canonical `(height, hash)` pairs into the heads cursor table.
pub struct HeadTracker<C, S: ?Sized> {
    source: RpcHashSource<C>,
    store: Arc<S>,
    catch_up: CatchUp,
}

impl<C: EvmRpcClient, S: CursorStore + ?Sized> HeadTracker<C, S> {
    pub fn new(client: C, store: Arc<S>, catch_up: CatchUp) -> Self {
        Self {
            source: RpcHashSource::new(client),
            store,
            catch_up,
        }
    }

    /// The most recently stored head, `None` before the first block.
    pub async fn current_cursor(&self) -> Result<Option<CursorEntry>, IndexerError> {
        self.store.latest(CursorTable::Heads).await
    }

    /// Append blocks in `heights` one by one.
    ///
    /// Stops early when the node has no block yet at a height, or when a
    /// block does not sit on top of the previous row (a reorg raced the
    /// batch). Returns the last height appended.
    async fn index_window(
        &self,
        heights: std::ops::Range<u64>,
        mut previous: Option<CursorEntry>,
    ) -> Result<Option<u64>, IndexerError> {
        let client = self.source.client();
        let mut last = None;

        for height in heights {
            let Some(block) = client.get_block(height).await? else {
                debug!(height, "block not available yet, stopping batch");
                break;
            };
            if block.height != height {
                return Err(IndexerError::Rpc(format!(
                    "requested block {height}, node returned {}",
                    block.height
                )));
            }
            if let Some(prev) = &previous {
                if !block.extends(prev.height, &prev.hash) {
                    warn!(
                        height,
                        parent = %block.parent_hash,
                        expected = %prev.hash,
                        "parent hash mismatch, stopping batch"
                    );
                    break;
                }
            }

            let entry = CursorEntry::new(height, block.hash);
            self.store.append(CursorTable::Heads, &entry).await?;
            debug!(height, hash = %entry.hash, "head stored");

            last = Some(height);
            previous = Some(entry);
        }
        Ok(last)
    }
}

#[async_trait]
impl<C: EvmRpcClient, S: CursorStore + ?Sized> Reconciler for HeadTracker<C, S> {
    fn name(&self) -> &str {
        "heads"
    }

    async fn reconcile_once(&self) -> Result<PassOutcome, IndexerError> {
        let local = self.current_cursor().await?;

        match self.catch_up.plan(local.as_ref(), &self.source).await? {
            Plan::Truncate(divergence) => {
                let from = divergence.truncate_from();
                let removed = self.store.truncate_from(CursorTable::Heads, from).await?;
                warn!(indexer = "heads", %divergence, from, removed, "reorg detected, heads truncated");
                Ok(PassOutcome::Truncated {
                    from,
                    removed,
                    divergence,
                })
            }
            Plan::CatchUp(window) if window.is_empty() => Ok(PassOutcome::UpToDate),
            Plan::CatchUp(window) => {
                let Some(to) = self.index_window(window.heights(), local).await? else {
                    return Ok(PassOutcome::UpToDate);
                };
                let complete = window.end() == Some(to);
                info!(indexer = "heads", from = window.start, to, complete, "heads indexed");
                Ok(PassOutcome::Advanced {
                    from: window.start,
                    to,
                    complete,
                })
            }
        }
    }
}
