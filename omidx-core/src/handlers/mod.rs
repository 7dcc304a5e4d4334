//! Event handlers.
//!
//! A handler turns one decoded event into exactly one entity save, or an
//! explicit no-op. It reaches the store only through the per-event
//! [`HandlerContext`] it is given, never caches entities across events, and
//! never consults anything but the event and the store.
//!
//! - `PredictionAddedHandler`: event-scoped `PredictionAdded` facts
//! - `ImageUpdatedHandler`: event-scoped `ImageUpdated` facts
//! - `ThumbnailMappingHandler`: domain-scoped current thumbnail per market

pub mod image_updated;
pub mod params;
pub mod prediction_added;
pub mod thumbnail_mapping;

pub use image_updated::{IMAGE_UPDATED_SIGNATURE, ImageUpdatedHandler};
pub use params::{DecodeError, Params};
pub use prediction_added::{PREDICTION_ADDED_SIGNATURE, PredictionAddedHandler};
pub use thumbnail_mapping::ThumbnailMappingHandler;

use crate::entities::{Entity, EntityType};
use crate::key::{EntityKey, EventKeyScheme};
use crate::store::{EntityStore, Saved, StoreError};
use async_trait::async_trait;
use omidx_sdk::objects::{Event, Provenance};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors a handler can raise for a single event.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    /// Decode failures and schema violations. Everything else is I/O.
    pub fn is_schema_violation(&self) -> bool {
        match self {
            HandlerError::Decode(_) => true,
            HandlerError::Store(e) => e.is_schema_violation(),
        }
    }
}

/// What a handler did with its event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Saved(Saved),
    NoOp,
}

/// Per-event capability over the entity store.
///
/// Carries the event's provenance into every store call and remembers the
/// last entity the handler touched, so failures can name it.
pub struct HandlerContext<'a> {
    store: &'a EntityStore,
    provenance: Provenance,
    touched: Mutex<Option<(EntityType, EntityKey)>>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(store: &'a EntityStore, provenance: Provenance) -> Self {
        Self {
            store,
            provenance,
            touched: Mutex::new(None),
        }
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// The entity most recently loaded or saved through this context.
    pub async fn touched(&self) -> Option<(EntityType, EntityKey)> {
        self.touched.lock().await.clone()
    }

    async fn touch(&self, entity_type: EntityType, key: &EntityKey) {
        *self.touched.lock().await = Some((entity_type, key.clone()));
    }

    pub async fn load<E: Entity>(&self, key: &EntityKey) -> Result<Option<E>, StoreError> {
        self.touch(E::ENTITY_TYPE, key).await;
        self.store.load(key).await
    }

    pub async fn load_in_block<E: Entity>(
        &self,
        key: &EntityKey,
    ) -> Result<Option<E>, StoreError> {
        self.touch(E::ENTITY_TYPE, key).await;
        self.store.load_in_block(&self.provenance, key).await
    }

    pub async fn save<E: Entity>(&self, entity: &E) -> Result<Saved, StoreError> {
        self.touch(E::ENTITY_TYPE, &entity.key()).await;
        self.store.save(&self.provenance, entity).await
    }

    pub async fn upsert<E, S, M>(
        &self,
        key: EntityKey,
        seed: S,
        mutate: M,
    ) -> Result<Saved, StoreError>
    where
        E: Entity,
        S: FnOnce(&EntityKey) -> E + Send,
        M: FnOnce(&mut E) + Send,
    {
        self.touch(E::ENTITY_TYPE, &key).await;
        self.store
            .upsert(&self.provenance, key, seed, mutate)
            .await
    }
}

/// Transformation of one event type into entity state.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        event: &Event,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError>;
}

/// Handlers that can be wired up from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    PredictionAdded,
    ImageUpdated,
    ThumbnailMapping,
}

impl HandlerKind {
    /// Event signature this handler consumes.
    pub fn signature(&self) -> &'static str {
        match self {
            HandlerKind::PredictionAdded => PREDICTION_ADDED_SIGNATURE,
            HandlerKind::ImageUpdated | HandlerKind::ThumbnailMapping => IMAGE_UPDATED_SIGNATURE,
        }
    }

    /// Build the handler. `key_scheme` only matters for event-scoped kinds.
    pub fn build(&self, key_scheme: EventKeyScheme) -> Arc<dyn Handler> {
        match self {
            HandlerKind::PredictionAdded => Arc::new(PredictionAddedHandler::new(key_scheme)),
            HandlerKind::ImageUpdated => Arc::new(ImageUpdatedHandler::new(key_scheme)),
            HandlerKind::ThumbnailMapping => Arc::new(ThumbnailMappingHandler),
        }
    }
}
