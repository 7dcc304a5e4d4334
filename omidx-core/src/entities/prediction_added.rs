use super::{AnyEntity, Entity, EntityType};
use crate::key::EntityKey;
use crate::schema::{FieldSchema, FieldValue, Record, RecordReader, SchemaError, ValueKind};
use omidx_sdk::objects::HexBytes;
use serde::Serialize;

/// A prediction published by an agent for a market.
///
/// Event-scoped: one entity per `PredictionAdded` log, never updated.
/// Entities keyed by transaction hash and log index also carry the block
/// number and transaction hash of their log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionAdded {
    pub id: EntityKey,
    pub market_address: HexBytes,
    pub estimated_probability_bps: i64,
    pub publisher_address: HexBytes,
    pub tx_hashes: Vec<HexBytes>,
    pub ipfs_hash: HexBytes,
    pub block_number: Option<i64>,
    pub transaction_hash: Option<HexBytes>,
}

impl Entity for PredictionAdded {
    const ENTITY_TYPE: EntityType = EntityType::PredictionAdded;
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::required("marketAddress", ValueKind::Bytes),
        FieldSchema::required("estimatedProbabilityBps", ValueKind::Int),
        FieldSchema::required("publisherAddress", ValueKind::Bytes),
        FieldSchema::required("txHashes", ValueKind::BytesList),
        FieldSchema::required("ipfsHash", ValueKind::Bytes),
        FieldSchema::optional("blockNumber", ValueKind::Int),
        FieldSchema::optional("transactionHash", ValueKind::Bytes),
    ];

    fn key(&self) -> EntityKey {
        self.id.clone()
    }

    fn to_record(&self) -> Record {
        let mut record = Record::from([
            (
                "marketAddress".to_string(),
                FieldValue::Bytes(self.market_address.clone()),
            ),
            (
                "estimatedProbabilityBps".to_string(),
                FieldValue::Int(self.estimated_probability_bps),
            ),
            (
                "publisherAddress".to_string(),
                FieldValue::Bytes(self.publisher_address.clone()),
            ),
            (
                "txHashes".to_string(),
                FieldValue::BytesList(self.tx_hashes.clone()),
            ),
            (
                "ipfsHash".to_string(),
                FieldValue::Bytes(self.ipfs_hash.clone()),
            ),
        ]);
        if let Some(block_number) = self.block_number {
            record.insert("blockNumber".to_string(), FieldValue::Int(block_number));
        }
        if let Some(transaction_hash) = &self.transaction_hash {
            record.insert(
                "transactionHash".to_string(),
                FieldValue::Bytes(transaction_hash.clone()),
            );
        }
        record
    }

    fn from_record(key: &EntityKey, record: &Record) -> Result<Self, SchemaError> {
        let reader = RecordReader::new(Self::ENTITY_TYPE, key, record);
        Ok(Self {
            id: key.clone(),
            market_address: reader.bytes("marketAddress")?,
            estimated_probability_bps: reader.int("estimatedProbabilityBps")?,
            publisher_address: reader.bytes("publisherAddress")?,
            tx_hashes: reader.bytes_list("txHashes")?,
            ipfs_hash: reader.bytes("ipfsHash")?,
            block_number: reader.optional_int("blockNumber")?,
            transaction_hash: reader.optional_bytes("transactionHash")?,
        })
    }

    fn into_any(self) -> AnyEntity {
        AnyEntity::PredictionAdded(self)
    }
}
