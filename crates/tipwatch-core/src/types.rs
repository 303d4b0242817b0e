//! Shared types for the indexing pipeline.

use serde::{Deserialize, Serialize};

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// The part of a block header the head tracker needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height.
    pub height: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
}

impl BlockHeader {
    /// Returns `true` if `self` sits directly on top of the block `(height, hash)`.
    pub fn extends(&self, height: u64, hash: &str) -> bool {
        self.height == height + 1 && same_hash(&self.parent_hash, hash)
    }
}

/// Compare two hex hashes, ignoring case.
pub fn same_hash(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

// ─── DonationRecord ───────────────────────────────────────────────────────────

/// A decoded `Donate` event.
///
/// Amounts are kept as decimal strings: they are `uint256` on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationRecord {
    pub height: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u64,
    /// EIP-55 checksummed.
    pub donor: String,
    /// EIP-55 checksummed.
    pub recipient: String,
    /// EIP-55 checksummed ERC-20 address.
    pub token_address: String,
    pub net_amount: String,
    pub commission: String,
    pub donor_name: String,
    pub message: String,
}
