//! Error types for the tipwatch pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
///
/// Chain divergence is not an error: it is reported as
/// [`PassOutcome::Truncated`](crate::runner::PassOutcome::Truncated).
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error at block {height} (log {log_index}): {reason}")]
    Decode {
        height: u64,
        log_index: u64,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for I/O failures that leave no partial state behind and
    /// should be retried on the next loop iteration.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Storage(_))
    }

    /// Returns `true` for errors that must stop the loop and reach the operator.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient() && !matches!(self, Self::Cancelled)
    }
}
