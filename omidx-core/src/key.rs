//! Entity key derivation.
//!
//! Two identity disciplines exist:
//!
//! - **Event-scoped** keys come from event provenance. Every event yields a
//!   brand-new key, so the entities behind them are insert-only facts.
//! - **Domain-scoped** keys come from a stable attribute carried by the event
//!   (a market address, say). Successive events for the same attribute land on
//!   the same entity.
//!
//! Every function here is pure and total.

use compact_str::{CompactString, format_compact};
use omidx_sdk::objects::{Event, HexBytes, HexParseError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an entity within its entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(CompactString);

impl EntityKey {
    pub fn new(key: impl Into<CompactString>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// `"{chain_id}_{block_number}_{log_index}"`.
///
/// The triple is unique per delivered log, and the decimal rendering with a
/// non-digit delimiter cannot make two distinct triples print the same.
pub fn derive_event_key(chain_id: u64, block_number: u64, log_index: u64) -> EntityKey {
    EntityKey(format_compact!("{chain_id}_{block_number}_{log_index}"))
}

/// Transaction hash followed by the log index, hex encoded.
///
/// This is the composite id Graph-style subgraphs use. Indexes up to
/// `i32::MAX` are appended as a 4-byte little-endian `i32`, matching those
/// ids byte for byte. Wider indexes are appended as an 8-byte little-endian
/// `u64`, so the suffix length alone keeps them apart from the narrow form.
/// A transaction cannot emit two logs with the same index, so the pair is
/// unique per event.
pub fn derive_tx_log_key(transaction_hash: &[u8], log_index: u64) -> EntityKey {
    let mut bytes = Vec::with_capacity(transaction_hash.len() + 8);
    bytes.extend_from_slice(transaction_hash);
    match i32::try_from(log_index) {
        Ok(narrow) => bytes.extend_from_slice(&narrow.to_le_bytes()),
        Err(_) => bytes.extend_from_slice(&log_index.to_le_bytes()),
    }
    derive_domain_key(&bytes)
}

/// Normalized `0x`-prefixed lower-case hex of a raw attribute.
pub fn derive_domain_key(raw: &[u8]) -> EntityKey {
    EntityKey(format_compact!("0x{}", hex::encode(raw)))
}

/// Like [`derive_domain_key`], for an attribute that is still in textual form.
///
/// Accepts either casing, with or without the `0x` prefix.
pub fn derive_domain_key_str(raw: &str) -> Result<EntityKey, HexParseError> {
    let bytes: HexBytes = raw.parse()?;
    Ok(derive_domain_key(bytes.as_slice()))
}

/// Which provenance-based key an event-scoped handler assigns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKeyScheme {
    /// `"{chain}_{block}_{log}"`
    #[default]
    ChainBlockLog,
    /// transaction hash ++ log index
    TxLog,
}

impl EventKeyScheme {
    pub fn derive(&self, event: &Event) -> EntityKey {
        match self {
            EventKeyScheme::ChainBlockLog => {
                derive_event_key(event.chain_id, event.block_number, event.log_index)
            }
            EventKeyScheme::TxLog => {
                derive_tx_log_key(event.transaction_hash.as_slice(), event.log_index)
            }
        }
    }
}
