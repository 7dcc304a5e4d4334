use super::{AnyEntity, Entity, EntityType};
use crate::key::EntityKey;
use crate::schema::{FieldSchema, FieldValue, Record, RecordReader, SchemaError, ValueKind};
use omidx_sdk::objects::HexBytes;
use serde::Serialize;

/// Log of a single thumbnail change. Event-scoped, insert-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUpdated {
    pub id: EntityKey,
    pub market_address: HexBytes,
    #[serde(rename = "image_hash")]
    pub image_hash: HexBytes,
    pub changer: HexBytes,
}

impl Entity for ImageUpdated {
    const ENTITY_TYPE: EntityType = EntityType::ImageUpdated;
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::required("marketAddress", ValueKind::Bytes),
        FieldSchema::required("image_hash", ValueKind::Bytes),
        FieldSchema::required("changer", ValueKind::Bytes),
    ];

    fn key(&self) -> EntityKey {
        self.id.clone()
    }

    fn to_record(&self) -> Record {
        Record::from([
            (
                "marketAddress".to_string(),
                FieldValue::Bytes(self.market_address.clone()),
            ),
            (
                "image_hash".to_string(),
                FieldValue::Bytes(self.image_hash.clone()),
            ),
            (
                "changer".to_string(),
                FieldValue::Bytes(self.changer.clone()),
            ),
        ])
    }

    fn from_record(key: &EntityKey, record: &Record) -> Result<Self, SchemaError> {
        let reader = RecordReader::new(Self::ENTITY_TYPE, key, record);
        Ok(Self {
            id: key.clone(),
            market_address: reader.bytes("marketAddress")?,
            image_hash: reader.bytes("image_hash")?,
            changer: reader.bytes("changer")?,
        })
    }

    fn into_any(self) -> AnyEntity {
        AnyEntity::ImageUpdated(self)
    }
}
