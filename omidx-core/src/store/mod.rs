//! The entity store.
//!
//! [`EntityStore`] is the only owner of entity state. It sits on top of a
//! [`StoreBackend`] (the persistence collaborator), validates every record
//! against the [`SchemaRegistry`] before it is written, and provides the one
//! load-or-create-then-merge primitive ([`EntityStore::upsert`]) that all
//! domain-scoped handlers share.
//!
//! Every load-modify-save cycle runs under a store-wide write lock, so two
//! drivers sharing a store can never lose each other's updates.

pub mod backend;
pub mod memory;
pub mod postgres;

pub use backend::{StoreBackend, StoreError};
pub use memory::MemoryBackend;
pub use postgres::PgBackend;

use crate::entities::{AnyEntity, Entity, EntityType};
use crate::key::EntityKey;
use crate::schema::{SchemaError, SchemaRegistry};
use omidx_sdk::objects::{Cursor, Provenance};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Proof that an entity was written.
///
/// Only the store can build one, which is how handlers prove they issued
/// their save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    entity_type: EntityType,
    key: EntityKey,
}

impl Saved {
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}

/// Keys written while processing the current block of one chain.
#[derive(Debug, Default)]
struct BlockWrites {
    block_number: u64,
    keys: HashSet<(EntityType, EntityKey)>,
}

struct EntityStoreInner {
    backend: Arc<dyn StoreBackend>,
    schemas: SchemaRegistry,
    write_lock: Mutex<()>,
    block_writes: Mutex<HashMap<u64, BlockWrites>>,
}

/// Shared handle to the entity store. Cheap to clone.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<EntityStoreInner>,
}

impl EntityStore {
    /// A store over `backend` that accepts every built-in entity type.
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self::with_schemas(backend, SchemaRegistry::with_entities())
    }

    pub fn with_schemas(backend: Arc<dyn StoreBackend>, schemas: SchemaRegistry) -> Self {
        Self {
            inner: Arc::new(EntityStoreInner {
                backend,
                schemas,
                write_lock: Mutex::new(()),
                block_writes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A fresh store over a new [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.inner.schemas
    }

    /// Point lookup. `Ok(None)` means "no record yet" and is not an error.
    pub async fn load<E: Entity>(&self, key: &EntityKey) -> Result<Option<E>, StoreError> {
        let record = self.inner.backend.get(E::ENTITY_TYPE, key).await?;
        record
            .map(|record| E::from_record(key, &record))
            .transpose()
            .map_err(Into::into)
    }

    /// Untyped point lookup, for callers that only know the type name.
    pub async fn load_any(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
    ) -> Result<Option<AnyEntity>, StoreError> {
        let record = self.inner.backend.get(entity_type, key).await?;
        record
            .map(|record| AnyEntity::decode(entity_type, key, &record))
            .transpose()
            .map_err(Into::into)
    }

    /// Like [`load`](Self::load), but only sees entities saved while
    /// processing the same block (on the same chain) as `provenance`.
    pub async fn load_in_block<E: Entity>(
        &self,
        provenance: &Provenance,
        key: &EntityKey,
    ) -> Result<Option<E>, StoreError> {
        let written = {
            let block_writes = self.inner.block_writes.lock().await;
            block_writes
                .get(&provenance.chain_id)
                .is_some_and(|writes| {
                    writes.block_number == provenance.block_number
                        && writes.keys.contains(&(E::ENTITY_TYPE, key.clone()))
                })
        };
        if !written {
            return Ok(None);
        }
        self.load(key).await
    }

    /// Validate and upsert `entity` under its own key.
    pub async fn save<E: Entity>(
        &self,
        provenance: &Provenance,
        entity: &E,
    ) -> Result<Saved, StoreError> {
        let _guard = self.inner.write_lock.lock().await;
        self.save_locked(provenance, entity).await
    }

    /// Load the entity at `key`, or `seed` a new one when absent, apply
    /// `mutate`, then save it. The whole cycle holds the write lock.
    ///
    /// Fields `mutate` leaves alone keep their stored values.
    pub async fn upsert<E, S, M>(
        &self,
        provenance: &Provenance,
        key: EntityKey,
        seed: S,
        mutate: M,
    ) -> Result<Saved, StoreError>
    where
        E: Entity,
        S: FnOnce(&EntityKey) -> E + Send,
        M: FnOnce(&mut E) + Send,
    {
        let _guard = self.inner.write_lock.lock().await;
        let mut entity = match self.load::<E>(&key).await? {
            Some(existing) => existing,
            None => seed(&key),
        };
        mutate(&mut entity);
        if entity.key() != key {
            return Err(SchemaError::KeyMismatch {
                entity_type: E::ENTITY_TYPE,
                expected: key,
                found: entity.key(),
            }
            .into());
        }
        self.save_locked(provenance, &entity).await
    }

    async fn save_locked<E: Entity>(
        &self,
        provenance: &Provenance,
        entity: &E,
    ) -> Result<Saved, StoreError> {
        let key = entity.key();
        let record = entity.to_record();
        self.inner
            .schemas
            .validate(E::ENTITY_TYPE, &key, &record)?;
        self.inner
            .backend
            .put(E::ENTITY_TYPE, &key, record)
            .await?;

        let mut block_writes = self.inner.block_writes.lock().await;
        let writes = block_writes.entry(provenance.chain_id).or_default();
        if writes.block_number != provenance.block_number {
            writes.block_number = provenance.block_number;
            writes.keys.clear();
        }
        writes.keys.insert((E::ENTITY_TYPE, key.clone()));

        trace!(
            entity_type = %E::ENTITY_TYPE,
            key = %key,
            %provenance,
            "Entity saved"
        );

        Ok(Saved {
            entity_type: E::ENTITY_TYPE,
            key,
        })
    }

    pub async fn entity_count(&self, entity_type: EntityType) -> Result<u64, StoreError> {
        self.inner.backend.count(entity_type).await
    }

    /// Reset between independent runs.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.backend.clear().await?;
        self.inner.block_writes.lock().await.clear();
        Ok(())
    }

    pub async fn checkpoints(&self) -> Result<BTreeMap<u64, Cursor>, StoreError> {
        self.inner.backend.checkpoints().await
    }

    pub async fn save_checkpoint(&self, chain_id: u64, cursor: Cursor) -> Result<(), StoreError> {
        self.inner.backend.put_checkpoint(chain_id, cursor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ThumbnailMapping;
    use omidx_sdk::objects::HexBytes;

    fn market() -> HexBytes {
        HexBytes::from([0x01])
    }

    fn mapping(image: u8, changer: Option<u8>) -> ThumbnailMapping {
        ThumbnailMapping {
            image_hash: Some(HexBytes::from([image])),
            changer: changer.map(|c| HexBytes::from([c])),
            ..ThumbnailMapping::new(market())
        }
    }

    #[tokio::test]
    async fn test_save_then_load_reads_own_write() {
        let store = EntityStore::in_memory();
        let provenance = Provenance::new(1, 10, 0);
        let entity = mapping(0xaa, Some(0x02));

        let saved = store.save(&provenance, &entity).await.unwrap();
        assert_eq!(saved.entity_type(), EntityType::ThumbnailMapping);
        assert_eq!(saved.key().as_str(), "0x01");

        let loaded: Option<ThumbnailMapping> = store.load(saved.key()).await.unwrap();
        assert_eq!(loaded, Some(entity));
        assert_eq!(
            store
                .entity_count(EntityType::ThumbnailMapping)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_schema_violation_writes_nothing() {
        let store = EntityStore::in_memory();
        let provenance = Provenance::new(1, 10, 0);
        let unfinished = ThumbnailMapping::new(market());

        let err = store.save(&provenance, &unfinished).await.unwrap_err();
        assert!(err.is_schema_violation());
        assert_eq!(
            store
                .entity_count(EntityType::ThumbnailMapping)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_upsert_keeps_untouched_fields() {
        let store = EntityStore::in_memory();
        let key = ThumbnailMapping::new(market()).key();
        store
            .save(&Provenance::new(1, 10, 0), &mapping(0xaa, Some(0x02)))
            .await
            .unwrap();

        store
            .upsert(
                &Provenance::new(1, 11, 0),
                key.clone(),
                |_| ThumbnailMapping::new(market()),
                |m: &mut ThumbnailMapping| m.image_hash = Some(HexBytes::from([0xbb])),
            )
            .await
            .unwrap();

        let merged: ThumbnailMapping = store.load(&key).await.unwrap().unwrap();
        assert_eq!(merged.image_hash, Some(HexBytes::from([0xbb])));
        assert_eq!(merged.changer, Some(HexBytes::from([0x02])));
    }

    #[tokio::test]
    async fn test_upsert_rejects_key_change() {
        let store = EntityStore::in_memory();
        let key = EntityKey::from("0x01");
        let err = store
            .upsert(
                &Provenance::new(1, 10, 0),
                key,
                |_| mapping(0xaa, None),
                |m: &mut ThumbnailMapping| m.id = EntityKey::from("0x02"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Schema(SchemaError::KeyMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_in_block_only_sees_current_block_writes() {
        let store = EntityStore::in_memory();
        let key = EntityKey::from("0x01");
        store
            .save(&Provenance::new(1, 10, 0), &mapping(0xaa, None))
            .await
            .unwrap();

        let same_block: Option<ThumbnailMapping> = store
            .load_in_block(&Provenance::new(1, 10, 3), &key)
            .await
            .unwrap();
        assert!(same_block.is_some());

        let other_chain: Option<ThumbnailMapping> = store
            .load_in_block(&Provenance::new(2, 10, 3), &key)
            .await
            .unwrap();
        assert!(other_chain.is_none());

        let next_block: Option<ThumbnailMapping> = store
            .load_in_block(&Provenance::new(1, 11, 0), &key)
            .await
            .unwrap();
        assert!(next_block.is_none());
        // A plain load still sees it.
        assert!(store.load::<ThumbnailMapping>(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let store = EntityStore::in_memory();
        store
            .save(&Provenance::new(1, 10, 0), &mapping(0xaa, None))
            .await
            .unwrap();
        store.save_checkpoint(1, Cursor::new(10, 0)).await.unwrap();

        store.clear().await.unwrap();
        assert_eq!(
            store
                .entity_count(EntityType::ThumbnailMapping)
                .await
                .unwrap(),
            0
        );
        assert!(store.checkpoints().await.unwrap().is_empty());
        let in_block: Option<ThumbnailMapping> = store
            .load_in_block(&Provenance::new(1, 10, 1), &EntityKey::from("0x01"))
            .await
            .unwrap();
        assert!(in_block.is_none());
    }
}
