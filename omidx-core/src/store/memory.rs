use super::backend::{StoreBackend, StoreError};
use crate::entities::EntityType;
use crate::key::EntityKey;
use crate::schema::Record;
use async_trait::async_trait;
use omidx_sdk::objects::Cursor;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-memory backend.
///
/// Used by tests and by `store.backend = "memory"` runs whose results only
/// need to live as long as the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entities: RwLock<HashMap<EntityType, BTreeMap<EntityKey, Record>>>,
    checkpoints: RwLock<BTreeMap<u64, Cursor>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, ordered by type then key.
    pub async fn snapshot(&self) -> BTreeMap<(EntityType, EntityKey), Record> {
        let entities = self.entities.read().await;
        entities
            .iter()
            .flat_map(|(entity_type, rows)| {
                rows.iter()
                    .map(move |(key, record)| ((*entity_type, key.clone()), record.clone()))
            })
            .collect()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
    ) -> Result<Option<Record>, StoreError> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(&entity_type)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    async fn put(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
        record: Record,
    ) -> Result<(), StoreError> {
        let mut entities = self.entities.write().await;
        entities
            .entry(entity_type)
            .or_default()
            .insert(key.clone(), record);
        Ok(())
    }

    async fn count(&self, entity_type: EntityType) -> Result<u64, StoreError> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(&entity_type)
            .map_or(0, |rows| rows.len() as u64))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entities.write().await.clear();
        self.checkpoints.write().await.clear();
        Ok(())
    }

    async fn checkpoints(&self) -> Result<BTreeMap<u64, Cursor>, StoreError> {
        Ok(self.checkpoints.read().await.clone())
    }

    async fn put_checkpoint(&self, chain_id: u64, cursor: Cursor) -> Result<(), StoreError> {
        self.checkpoints.write().await.insert(chain_id, cursor);
        Ok(())
    }
}
