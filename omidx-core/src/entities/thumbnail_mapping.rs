use super::{AnyEntity, Entity, EntityType};
use crate::key::{EntityKey, derive_domain_key};
use crate::schema::{FieldSchema, FieldValue, Record, RecordReader, SchemaError, ValueKind};
use omidx_sdk::objects::HexBytes;
use serde::Serialize;

/// Current thumbnail of a market, keyed by the market address.
///
/// Domain-scoped: every `ImageUpdated` log for the same market lands on the
/// same entity. A freshly seeded mapping has no `image_hash` yet and cannot be
/// saved until one is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailMapping {
    pub id: EntityKey,
    pub market_address: HexBytes,
    #[serde(rename = "image_hash")]
    pub image_hash: Option<HexBytes>,
    pub changer: Option<HexBytes>,
}

impl ThumbnailMapping {
    pub fn new(market_address: HexBytes) -> Self {
        Self {
            id: derive_domain_key(market_address.as_slice()),
            market_address,
            image_hash: None,
            changer: None,
        }
    }
}

impl Entity for ThumbnailMapping {
    const ENTITY_TYPE: EntityType = EntityType::ThumbnailMapping;
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::required("marketAddress", ValueKind::Bytes),
        FieldSchema::required("image_hash", ValueKind::Bytes),
        FieldSchema::optional("changer", ValueKind::Bytes),
    ];

    fn key(&self) -> EntityKey {
        self.id.clone()
    }

    fn to_record(&self) -> Record {
        let mut record = Record::from([(
            "marketAddress".to_string(),
            FieldValue::Bytes(self.market_address.clone()),
        )]);
        if let Some(image_hash) = &self.image_hash {
            record.insert(
                "image_hash".to_string(),
                FieldValue::Bytes(image_hash.clone()),
            );
        }
        if let Some(changer) = &self.changer {
            record.insert("changer".to_string(), FieldValue::Bytes(changer.clone()));
        }
        record
    }

    fn from_record(key: &EntityKey, record: &Record) -> Result<Self, SchemaError> {
        let reader = RecordReader::new(Self::ENTITY_TYPE, key, record);
        Ok(Self {
            id: key.clone(),
            market_address: reader.bytes("marketAddress")?,
            image_hash: reader.optional_bytes("image_hash")?,
            changer: reader.optional_bytes("changer")?,
        })
    }

    fn into_any(self) -> AnyEntity {
        AnyEntity::ThumbnailMapping(self)
    }
}
