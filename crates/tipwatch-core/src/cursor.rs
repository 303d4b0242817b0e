//! Cursor rows: the per-height records an indexer trusts as stable.

use serde::{Deserialize, Serialize};

/// One row of a cursor table.
///
/// The row with the highest `height` is the indexer's current position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEntry {
    /// Block height.
    pub height: u64,
    /// Block hash (`0x…`, lowercase).
    pub hash: String,
}

impl CursorEntry {
    /// Create a cursor row, normalizing the hash to lowercase.
    pub fn new(height: u64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into().to_ascii_lowercase(),
        }
    }

    /// Returns the next height to index.
    pub fn next_height(&self) -> u64 {
        self.height + 1
    }
}

/// The two cursor tables kept by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorTable {
    /// Canonical heights mirrored from the RPC provider by the head tracker.
    Heads,
    /// Heights whose donations have been indexed. Truncation cascades to records.
    Donations,
}

impl CursorTable {
    /// SQL table name backing this cursor.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Heads => "block_cursor",
            Self::Donations => "donation_cursor",
        }
    }
}

impl std::fmt::Display for CursorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Heads => "heads",
            Self::Donations => "donations",
        })
    }
}
