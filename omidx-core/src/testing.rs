//! Test helpers: mock events and canned dispatch tables.
//!
//! Lets handler behavior be asserted against [`EntityStore::in_memory`]
//! without a chain or a database.
//!
//! [`EntityStore::in_memory`]: crate::store::EntityStore::in_memory

// Helpers panic on bad fixtures instead of threading errors through tests.
#![allow(clippy::expect_used)]

use crate::dispatch::DispatchTable;
use crate::handlers::{
    HandlerKind, IMAGE_UPDATED_SIGNATURE, PREDICTION_ADDED_SIGNATURE, PredictionAddedHandler,
    ThumbnailMappingHandler,
};
use crate::key::EventKeyScheme;
use omidx_sdk::objects::{Event, HexBytes, ParamValue, Provenance};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Gnosis Chain, where the Omen contracts live.
pub const OMEN_CHAIN_ID: u64 = 100;
pub const AGENT_RESULT_CONTRACT: &str = "0x00000000000000000000000000000000000a9e17";
pub const THUMBNAIL_CONTRACT: &str = "0x0000000000000000000000000000000000071a6e";

/// Parse hex fixture text.
pub fn hex(text: &str) -> HexBytes {
    text.parse().expect("fixture must be valid hex")
}

/// A 32-byte transaction hash that only depends on the block.
fn mock_transaction_hash(chain_id: u64, block_number: u64) -> HexBytes {
    let mut hash = Vec::with_capacity(32);
    hash.extend_from_slice(&chain_id.to_be_bytes());
    hash.extend_from_slice(&block_number.to_be_bytes());
    hash.resize(32, 0xa5);
    HexBytes::new(hash)
}

/// Build an event with arbitrary params.
pub fn mock_event<'a>(
    chain_id: u64,
    block_number: u64,
    log_index: u64,
    contract_address: HexBytes,
    signature: &str,
    params: impl IntoIterator<Item = (&'a str, ParamValue)>,
) -> Event {
    Event {
        chain_id,
        block_number,
        log_index,
        transaction_hash: mock_transaction_hash(chain_id, block_number),
        contract_address,
        signature: signature.to_string(),
        params: params
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn prediction_added_event(
    provenance: Provenance,
    contract_address: HexBytes,
    market_address: HexBytes,
    estimated_probability_bps: u64,
    publisher_address: HexBytes,
    tx_hashes: Vec<HexBytes>,
    ipfs_hash: HexBytes,
) -> Event {
    mock_event(
        provenance.chain_id,
        provenance.block_number,
        provenance.log_index,
        contract_address,
        PREDICTION_ADDED_SIGNATURE,
        [
            ("marketAddress", ParamValue::Address(market_address)),
            (
                "estimatedProbabilityBps",
                ParamValue::Uint(estimated_probability_bps),
            ),
            ("publisherAddress", ParamValue::Address(publisher_address)),
            ("txHashes", ParamValue::BytesArray(tx_hashes)),
            ("ipfsHash", ParamValue::Bytes(ipfs_hash)),
        ],
    )
}

/// `changer: None` leaves the param out entirely, like older contract
/// deployments.
pub fn image_updated_event(
    provenance: Provenance,
    contract_address: HexBytes,
    market_address: HexBytes,
    image_hash: HexBytes,
    changer: Option<HexBytes>,
) -> Event {
    let mut params = vec![
        ("marketAddress", ParamValue::Address(market_address)),
        ("image_hash", ParamValue::Bytes(image_hash)),
    ];
    if let Some(changer) = changer {
        params.push(("changer", ParamValue::Address(changer)));
    }
    mock_event(
        provenance.chain_id,
        provenance.block_number,
        provenance.log_index,
        contract_address,
        IMAGE_UPDATED_SIGNATURE,
        params,
    )
}

/// The Graph flavour on Gnosis: event-scoped predictions plus the
/// domain-scoped thumbnail mapping.
pub fn omen_dispatch_table() -> DispatchTable {
    let mut table = DispatchTable::new();
    table
        .register(
            OMEN_CHAIN_ID,
            hex(AGENT_RESULT_CONTRACT),
            PREDICTION_ADDED_SIGNATURE,
            Arc::new(PredictionAddedHandler::default()),
        )
        .expect("fresh table");
    table
        .register(
            OMEN_CHAIN_ID,
            hex(THUMBNAIL_CONTRACT),
            IMAGE_UPDATED_SIGNATURE,
            Arc::new(ThumbnailMappingHandler),
        )
        .expect("fresh table");
    table
}

/// The Envio flavour: both contracts produce event-scoped facts, on every
/// chain in `chain_ids`.
pub fn envio_dispatch_table(chain_ids: &[u64]) -> DispatchTable {
    let mut table = DispatchTable::new();
    for &chain_id in chain_ids {
        for (contract, kind) in [
            (AGENT_RESULT_CONTRACT, HandlerKind::PredictionAdded),
            (THUMBNAIL_CONTRACT, HandlerKind::ImageUpdated),
        ] {
            table
                .register(
                    chain_id,
                    hex(contract),
                    kind.signature(),
                    kind.build(EventKeyScheme::ChainBlockLog),
                )
                .expect("chain ids must be distinct");
        }
    }
    table
}
