//! Read-only view of the head tracker's cursor table.
//!
//! The donation indexer never asks the RPC provider which block is canonical;
//! it only trusts heights the head tracker has already stored. This view is
//! that dependency made explicit.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cursor::{CursorEntry, CursorTable};
use crate::error::IndexerError;
use crate::reorg::HashSource;
use crate::store::CursorStore;

/// Confirmed heights as recorded by the head tracker.
pub struct ConfirmedHeads<S: ?Sized> {
    store: Arc<S>,
}

impl<S: CursorStore + ?Sized> ConfirmedHeads<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The tracker's current cursor.
    pub async fn current(&self) -> Result<Option<CursorEntry>, IndexerError> {
        self.store.latest(CursorTable::Heads).await
    }

    /// Hash the tracker confirmed at `height`, if any.
    pub async fn confirmed_hash(&self, height: u64) -> Result<Option<String>, IndexerError> {
        Ok(self
            .store
            .at(CursorTable::Heads, height)
            .await?
            .map(|entry| entry.hash))
    }
}

impl<S: ?Sized> Clone for ConfirmedHeads<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

#[async_trait]
impl<S: CursorStore + ?Sized> HashSource for ConfirmedHeads<S> {
    async fn tip(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.current().await?.map(|entry| entry.height))
    }

    async fn hash_at(&self, height: u64) -> Result<Option<String>, IndexerError> {
        self.confirmed_hash(height).await
    }
}
