//! Schema registry and the field-level record representation.
//!
//! Entities are statically typed, but the persistence layer only sees whole
//! records keyed by `(entity_type, key)`. A [`Record`] is that persisted form,
//! and an [`EntitySchema`] says which fields a record of a given type must
//! carry before it may be written.

use crate::entities::EntityType;
use crate::key::EntityKey;
use omidx_sdk::objects::HexBytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Persisted form of an entity: field name to value.
pub type Record = BTreeMap<String, FieldValue>;

/// A single stored field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Bytes(HexBytes),
    BytesList(Vec<HexBytes>),
    Int(i64),
    String(String),
    Bool(bool),
    Null,
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Bytes(_) => ValueKind::Bytes,
            FieldValue::BytesList(_) => ValueKind::BytesList,
            FieldValue::Int(_) => ValueKind::Int,
            FieldValue::String(_) => ValueKind::String,
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Null => ValueKind::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bytes,
    BytesList,
    Int,
    String,
    Bool,
    Null,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bytes => "Bytes",
            ValueKind::BytesList => "[Bytes]",
            ValueKind::Int => "Int",
            ValueKind::String => "String",
            ValueKind::Bool => "Boolean",
            ValueKind::Null => "null",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub name: &'static str,
    pub kind: ValueKind,
    pub required: bool,
}

impl FieldSchema {
    pub const fn required(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Errors raised when a record does not satisfy its entity type's schema.
///
/// A violation is fatal for the save that raised it; nothing is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("cannot save {entity_type} entity {key} without a {field}")]
    MissingField {
        entity_type: EntityType,
        key: EntityKey,
        field: &'static str,
    },

    #[error(
        "entities of type {entity_type} must have a {field} of type {expected} but {key} has {found}"
    )]
    WrongKind {
        entity_type: EntityType,
        key: EntityKey,
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("{entity_type} entity {key} has undeclared field {field}")]
    UnknownField {
        entity_type: EntityType,
        key: EntityKey,
        field: String,
    },

    #[error("{entity_type} entity keyed {expected} reports key {found}")]
    KeyMismatch {
        entity_type: EntityType,
        expected: EntityKey,
        found: EntityKey,
    },

    #[error("no schema registered for entity type {0}")]
    UnregisteredType(EntityType),
}

impl SchemaError {
    /// The entity the violation concerns, when it names one.
    pub fn entity(&self) -> Option<(EntityType, EntityKey)> {
        match self {
            SchemaError::MissingField {
                entity_type, key, ..
            }
            | SchemaError::WrongKind {
                entity_type, key, ..
            }
            | SchemaError::UnknownField {
                entity_type, key, ..
            } => Some((*entity_type, key.clone())),
            SchemaError::KeyMismatch {
                entity_type,
                expected,
                ..
            } => Some((*entity_type, expected.clone())),
            SchemaError::UnregisteredType(_) => None,
        }
    }
}

/// The declared field set of one entity type.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    pub fields: &'static [FieldSchema],
}

impl EntitySchema {
    /// Check that every required field is present and non-null, that present
    /// fields have the declared kind, and that no undeclared field slipped in.
    pub fn validate(&self, key: &EntityKey, record: &Record) -> Result<(), SchemaError> {
        for field in self.fields {
            match record.get(field.name) {
                None | Some(FieldValue::Null) => {
                    if field.required {
                        return Err(SchemaError::MissingField {
                            entity_type: self.entity_type,
                            key: key.clone(),
                            field: field.name,
                        });
                    }
                }
                Some(value) if value.kind() != field.kind => {
                    return Err(SchemaError::WrongKind {
                        entity_type: self.entity_type,
                        key: key.clone(),
                        field: field.name.to_string(),
                        expected: field.kind,
                        found: value.kind(),
                    });
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) = record
            .keys()
            .find(|name| !self.fields.iter().any(|f| f.name == name.as_str()))
        {
            return Err(SchemaError::UnknownField {
                entity_type: self.entity_type,
                key: key.clone(),
                field: unknown.clone(),
            });
        }

        Ok(())
    }
}

/// Field sets of every entity type the store accepts.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<EntityType, EntitySchema>,
}

impl SchemaRegistry {
    /// An empty registry. Every save is rejected until types are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering all built-in entity types.
    pub fn with_entities() -> Self {
        let mut registry = Self::new();
        for entity_type in EntityType::ALL {
            registry.register(entity_type.schema());
        }
        registry
    }

    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.insert(schema.entity_type, schema);
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&EntitySchema> {
        self.schemas.get(&entity_type)
    }

    pub fn validate(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
        record: &Record,
    ) -> Result<(), SchemaError> {
        self.get(entity_type)
            .ok_or(SchemaError::UnregisteredType(entity_type))?
            .validate(key, record)
    }
}

/// Typed, error-reporting access to a stored record's fields.
pub struct RecordReader<'a> {
    entity_type: EntityType,
    key: &'a EntityKey,
    record: &'a Record,
}

impl<'a> RecordReader<'a> {
    pub fn new(entity_type: EntityType, key: &'a EntityKey, record: &'a Record) -> Self {
        Self {
            entity_type,
            key,
            record,
        }
    }

    fn present(&self, field: &'static str) -> Option<&'a FieldValue> {
        match self.record.get(field) {
            None | Some(FieldValue::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn missing(&self, field: &'static str) -> SchemaError {
        SchemaError::MissingField {
            entity_type: self.entity_type,
            key: self.key.clone(),
            field,
        }
    }

    fn wrong_kind(&self, field: &'static str, expected: ValueKind, found: &FieldValue) -> SchemaError {
        SchemaError::WrongKind {
            entity_type: self.entity_type,
            key: self.key.clone(),
            field: field.to_string(),
            expected,
            found: found.kind(),
        }
    }

    pub fn optional_bytes(&self, field: &'static str) -> Result<Option<HexBytes>, SchemaError> {
        match self.present(field) {
            None => Ok(None),
            Some(FieldValue::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(other) => Err(self.wrong_kind(field, ValueKind::Bytes, other)),
        }
    }

    pub fn bytes(&self, field: &'static str) -> Result<HexBytes, SchemaError> {
        self.optional_bytes(field)?
            .ok_or_else(|| self.missing(field))
    }

    pub fn bytes_list(&self, field: &'static str) -> Result<Vec<HexBytes>, SchemaError> {
        match self.present(field) {
            None => Err(self.missing(field)),
            Some(FieldValue::BytesList(list)) => Ok(list.clone()),
            Some(other) => Err(self.wrong_kind(field, ValueKind::BytesList, other)),
        }
    }

    pub fn optional_int(&self, field: &'static str) -> Result<Option<i64>, SchemaError> {
        match self.present(field) {
            None => Ok(None),
            Some(FieldValue::Int(value)) => Ok(Some(*value)),
            Some(other) => Err(self.wrong_kind(field, ValueKind::Int, other)),
        }
    }

    pub fn int(&self, field: &'static str) -> Result<i64, SchemaError> {
        self.optional_int(field)?
            .ok_or_else(|| self.missing(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[FieldSchema] = &[
        FieldSchema::required("marketAddress", ValueKind::Bytes),
        FieldSchema::optional("changer", ValueKind::Bytes),
    ];

    fn schema() -> EntitySchema {
        EntitySchema {
            entity_type: EntityType::ThumbnailMapping,
            fields: FIELDS,
        }
    }

    fn bytes(raw: &[u8]) -> FieldValue {
        FieldValue::Bytes(HexBytes::from(raw))
    }

    #[test]
    fn test_missing_required_field() {
        let key = EntityKey::from("0x01");
        let record = Record::from([("changer".to_string(), bytes(&[2]))]);
        let err = schema().validate(&key, &record).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingField {
                entity_type: EntityType::ThumbnailMapping,
                key: key.clone(),
                field: "marketAddress",
            }
        );
        assert_eq!(err.entity(), Some((EntityType::ThumbnailMapping, key)));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let key = EntityKey::from("0x01");
        let record = Record::from([("marketAddress".to_string(), FieldValue::Null)]);
        assert!(matches!(
            schema().validate(&key, &record),
            Err(SchemaError::MissingField { .. })
        ));
    }

    #[test]
    fn test_wrong_kind() {
        let key = EntityKey::from("0x01");
        let record = Record::from([("marketAddress".to_string(), FieldValue::Int(1))]);
        assert!(matches!(
            schema().validate(&key, &record),
            Err(SchemaError::WrongKind {
                expected: ValueKind::Bytes,
                found: ValueKind::Int,
                ..
            })
        ));
    }

    #[test]
    fn test_optional_field_may_be_absent_and_unknown_rejected() {
        let key = EntityKey::from("0x01");
        let ok = Record::from([("marketAddress".to_string(), bytes(&[1]))]);
        assert!(schema().validate(&key, &ok).is_ok());

        let mut extra = ok.clone();
        extra.insert("color".to_string(), FieldValue::String("red".to_string()));
        assert!(matches!(
            schema().validate(&key, &extra),
            Err(SchemaError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_registry_rejects_unregistered_type() {
        let key = EntityKey::from("0x01");
        let registry = SchemaRegistry::new();
        assert_eq!(
            registry.validate(EntityType::ThumbnailMapping, &key, &Record::new()),
            Err(SchemaError::UnregisteredType(EntityType::ThumbnailMapping))
        );
        assert!(
            SchemaRegistry::with_entities()
                .get(EntityType::PredictionAdded)
                .is_some()
        );
    }
}
