//! Statically typed entities.
//!
//! Each entity kind is its own struct implementing [`Entity`]; the finite set
//! of kinds is closed over by [`EntityType`] and the tagged [`AnyEntity`].

pub mod image_updated;
pub mod prediction_added;
pub mod thumbnail_mapping;

pub use image_updated::ImageUpdated;
pub use prediction_added::PredictionAdded;
pub use thumbnail_mapping::ThumbnailMapping;

use crate::key::EntityKey;
use crate::schema::{EntitySchema, FieldSchema, Record, SchemaError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A record type the store can hold.
pub trait Entity: Clone + Send + Sync + Sized + 'static {
    const ENTITY_TYPE: EntityType;
    const FIELDS: &'static [FieldSchema];

    fn key(&self) -> EntityKey;

    /// Persisted form. Unset optional fields are omitted.
    fn to_record(&self) -> Record;

    fn from_record(key: &EntityKey, record: &Record) -> Result<Self, SchemaError>;

    fn into_any(self) -> AnyEntity;
}

/// Names of all entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    PredictionAdded,
    ImageUpdated,
    ThumbnailMapping,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [
        EntityType::PredictionAdded,
        EntityType::ImageUpdated,
        EntityType::ThumbnailMapping,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityType::PredictionAdded => "PredictionAdded",
            EntityType::ImageUpdated => "ImageUpdated",
            EntityType::ThumbnailMapping => "ThumbnailMapping",
        }
    }

    pub fn schema(&self) -> EntitySchema {
        let fields = match self {
            EntityType::PredictionAdded => PredictionAdded::FIELDS,
            EntityType::ImageUpdated => ImageUpdated::FIELDS,
            EntityType::ThumbnailMapping => ThumbnailMapping::FIELDS,
        };
        EntitySchema {
            entity_type: *self,
            fields,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type: {0}")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| UnknownEntityType(s.to_string()))
    }
}

/// Any entity, tagged by its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "entityType")]
pub enum AnyEntity {
    PredictionAdded(PredictionAdded),
    ImageUpdated(ImageUpdated),
    ThumbnailMapping(ThumbnailMapping),
}

impl AnyEntity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            AnyEntity::PredictionAdded(_) => EntityType::PredictionAdded,
            AnyEntity::ImageUpdated(_) => EntityType::ImageUpdated,
            AnyEntity::ThumbnailMapping(_) => EntityType::ThumbnailMapping,
        }
    }

    pub fn key(&self) -> EntityKey {
        match self {
            AnyEntity::PredictionAdded(e) => e.key(),
            AnyEntity::ImageUpdated(e) => e.key(),
            AnyEntity::ThumbnailMapping(e) => e.key(),
        }
    }

    /// Rebuild a typed entity from its persisted record.
    pub fn decode(
        entity_type: EntityType,
        key: &EntityKey,
        record: &Record,
    ) -> Result<Self, SchemaError> {
        Ok(match entity_type {
            EntityType::PredictionAdded => PredictionAdded::from_record(key, record)?.into_any(),
            EntityType::ImageUpdated => ImageUpdated::from_record(key, record)?.into_any(),
            EntityType::ThumbnailMapping => ThumbnailMapping::from_record(key, record)?.into_any(),
        })
    }
}
