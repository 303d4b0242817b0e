//! `Donate` event decoder.
//!
//! ```text
//! event Donate(
//!     address indexed donor,
//!     address indexed recipient,
//!     address indexed token,
//!     uint256 netAmount,
//!     uint256 commission,
//!     string  donorName,
//!     string  message
//! );
//! ```
//!
//! The three indexed addresses sit in `topics[1..=3]` as 32-byte words; the
//! remaining fields are ABI-encoded in `data` in declaration order.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use tiny_keccak::{Hasher, Keccak};

use tipwatch_core::error::IndexerError;
use tipwatch_core::types::DonationRecord;

use crate::fetcher::RawLog;

/// Canonical signature of the `Donate` event.
pub const DONATE_SIGNATURE: &str =
    "Donate(address,address,address,uint256,uint256,string,string)";

/// keccak256 of an event signature, as `0x`-prefixed lowercase hex.
pub fn keccak256_signature(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

/// Decodes raw `Donate` logs into [`DonationRecord`]s.
#[derive(Debug, Clone)]
pub struct DonationDecoder {
    topic0: String,
    data_type: DynSolType,
}

impl Default for DonationDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DonationDecoder {
    pub fn new() -> Self {
        Self {
            topic0: keccak256_signature(DONATE_SIGNATURE),
            data_type: DynSolType::Tuple(vec![
                DynSolType::Uint(256),
                DynSolType::Uint(256),
                DynSolType::String,
                DynSolType::String,
            ]),
        }
    }

    /// `topics[0]` of every `Donate` log.
    pub fn donate_topic(&self) -> &str {
        &self.topic0
    }

    /// Decode `log`, emitted in block `(height, block_hash)`.
    ///
    /// Any malformed input is a [`IndexerError::Decode`]; logs are never skipped.
    pub fn decode(
        &self,
        log: &RawLog,
        height: u64,
        block_hash: &str,
    ) -> Result<DonationRecord, IndexerError> {
        let log_index = log.log_index_u64().unwrap_or_default();
        let fail = |reason: String| IndexerError::Decode {
            height,
            log_index,
            reason,
        };

        if log.log_index_u64().is_none() {
            return Err(fail(format!("invalid log index '{}'", log.log_index)));
        }
        if log.topics.len() != 4 {
            return Err(fail(format!("expected 4 topics, got {}", log.topics.len())));
        }
        if !log.topics[0].eq_ignore_ascii_case(&self.topic0) {
            return Err(fail(format!("unexpected event signature {}", log.topics[0])));
        }

        let donor = decode_address_topic(&log.topics[1]).map_err(&fail)?;
        let recipient = decode_address_topic(&log.topics[2]).map_err(&fail)?;
        let token_address = decode_address_topic(&log.topics[3]).map_err(&fail)?;

        let data = decode_hex(&log.data).map_err(|e| fail(format!("invalid data hex: {e}")))?;
        let fields = match self.data_type.abi_decode_params(&data) {
            Ok(DynSolValue::Tuple(fields)) => fields,
            Ok(other) => return Err(fail(format!("unexpected data shape: {other:?}"))),
            Err(e) => return Err(fail(format!("abi decode failed: {e}"))),
        };

        let [net_amount, commission, donor_name, message] =
            <[DynSolValue; 4]>::try_from(fields)
                .map_err(|f| fail(format!("expected 4 data fields, got {}", f.len())))?;

        Ok(DonationRecord {
            height,
            block_hash: block_hash.to_ascii_lowercase(),
            tx_hash: log.tx_hash.to_ascii_lowercase(),
            log_index,
            donor,
            recipient,
            token_address,
            net_amount: as_uint(net_amount).map_err(&fail)?,
            commission: as_uint(commission).map_err(&fail)?,
            donor_name: as_string(donor_name).map_err(&fail)?,
            message: as_string(message).map_err(&fail)?,
        })
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
}

/// Decode an indexed address topic into its EIP-55 checksum form.
fn decode_address_topic(topic: &str) -> Result<String, String> {
    let bytes = decode_hex(topic).map_err(|e| format!("invalid topic hex: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("topic must be 32 bytes, got {}", bytes.len()));
    }
    if bytes[..12].iter().any(|b| *b != 0) {
        return Err(format!("topic {topic} is not a padded address"));
    }
    match DynSolType::Address.abi_decode(&bytes) {
        Ok(DynSolValue::Address(addr)) => Ok(addr.to_checksum(None)),
        Ok(other) => Err(format!("unexpected topic value: {other:?}")),
        Err(e) => Err(format!("topic decode: {e}")),
    }
}

fn as_uint(value: DynSolValue) -> Result<String, String> {
    match value {
        DynSolValue::Uint(u, _) => Ok(u.to_string()),
        other => Err(format!("expected uint256, got {other:?}")),
    }
}

fn as_string(value: DynSolValue) -> Result<String, String> {
    match value {
        DynSolValue::String(s) => Ok(s),
        other => Err(format!("expected string, got {other:?}")),
    }
}
