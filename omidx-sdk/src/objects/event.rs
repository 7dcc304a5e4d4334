use super::hex_bytes::HexBytes;
use super::provenance::{Cursor, Provenance};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A decoded contract log, as delivered by the chain-log source.
///
/// Events are immutable facts. Within one chain they arrive ordered by
/// `(block_number, log_index)`; nothing is promised across chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub chain_id: u64,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: HexBytes,
    pub contract_address: HexBytes,
    /// Canonical event signature, e.g. `ImageUpdated(address,bytes32,address)`.
    pub signature: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl Event {
    pub fn provenance(&self) -> Provenance {
        Provenance::new(self.chain_id, self.block_number, self.log_index)
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.block_number, self.log_index)
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }
}

/// A typed event parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Address(HexBytes),
    Bytes(HexBytes),
    BytesArray(Vec<HexBytes>),
    Int(i64),
    Uint(u64),
    String(String),
    Bool(bool),
}

impl ParamValue {
    /// Name of the ABI-level kind, used in decode error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ParamValue::Address(_) => "address",
            ParamValue::Bytes(_) => "bytes",
            ParamValue::BytesArray(_) => "bytes[]",
            ParamValue::Int(_) => "int",
            ParamValue::Uint(_) => "uint",
            ParamValue::String(_) => "string",
            ParamValue::Bool(_) => "bool",
        }
    }
}
