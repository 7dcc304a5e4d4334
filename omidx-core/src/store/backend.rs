//! The persistence collaborator seam.

use crate::entities::EntityType;
use crate::key::EntityKey;
use crate::schema::{Record, SchemaError};
use async_trait::async_trait;
use omidx_sdk::objects::Cursor;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors surfaced by the entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record did not satisfy its schema; nothing was written.
    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A record could not be encoded or decoded
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A value does not fit the backend's integer columns
    #[error("value {0} is out of range for the backing store")]
    OutOfRange(u64),
}

impl StoreError {
    pub fn is_schema_violation(&self) -> bool {
        matches!(self, StoreError::Schema(_))
    }
}

/// Whole-record key-value persistence keyed by `(entity_type, key)`.
///
/// Implementations retry transient I/O themselves; an `Err` from any method is
/// terminal for the call and must not leave a partial write behind.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
    ) -> Result<Option<Record>, StoreError>;

    async fn put(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
        record: Record,
    ) -> Result<(), StoreError>;

    async fn count(&self, entity_type: EntityType) -> Result<u64, StoreError>;

    /// Drop every entity and checkpoint.
    async fn clear(&self) -> Result<(), StoreError>;

    async fn checkpoints(&self) -> Result<BTreeMap<u64, Cursor>, StoreError>;

    async fn put_checkpoint(&self, chain_id: u64, cursor: Cursor) -> Result<(), StoreError>;
}
