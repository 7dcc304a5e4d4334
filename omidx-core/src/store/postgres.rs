//! PostgreSQL backend.
//!
//! Entities live in one `entities` table keyed by `(entity_type, key)` with
//! the record stored as JSONB; checkpoints live in `checkpoints`. The schema
//! is created by the migrations shipped with the server.

use super::backend::{StoreBackend, StoreError};
use crate::entities::EntityType;
use crate::framework::DatabaseProcessor;
use crate::key::EntityKey;
use crate::schema::Record;
use async_trait::async_trait;
use kanau::processor::Processor;
use omidx_sdk::objects::Cursor;
use sqlx::PgPool;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
/// Fetch one record by type and key.
pub struct GetEntityRecord {
    pub entity_type: EntityType,
    pub key: EntityKey,
}

impl Processor<GetEntityRecord> for DatabaseProcessor {
    type Output = Option<serde_json::Value>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetEntityRecord")]
    async fn process(
        &self,
        query: GetEntityRecord,
    ) -> Result<Option<serde_json::Value>, sqlx::Error> {
        sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT record
            FROM entities
            WHERE entity_type = $1 AND key = $2
            "#,
        )
        .bind(query.entity_type.name())
        .bind(query.key.as_str())
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Insert or replace one record.
pub struct PutEntityRecord {
    pub entity_type: EntityType,
    pub key: EntityKey,
    pub record: serde_json::Value,
}

impl Processor<PutEntityRecord> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PutEntityRecord")]
    async fn process(&self, cmd: PutEntityRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO entities (entity_type, key, record)
            VALUES ($1, $2, $3)
            ON CONFLICT (entity_type, key) DO UPDATE SET record = EXCLUDED.record
            "#,
        )
        .bind(cmd.entity_type.name())
        .bind(cmd.key.as_str())
        .bind(cmd.record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CountEntities {
    pub entity_type: EntityType,
}

impl Processor<CountEntities> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountEntities")]
    async fn process(&self, query: CountEntities) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entities WHERE entity_type = $1")
            .bind(query.entity_type.name())
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Remove all entities and checkpoints in one transaction.
pub struct ClearStore;

impl Processor<ClearStore> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClearStore")]
    async fn process(&self, _cmd: ClearStore) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entities").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM checkpoints")
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }
}

#[derive(Debug, Clone)]
pub struct GetCheckpoints;

impl Processor<GetCheckpoints> for DatabaseProcessor {
    type Output = Vec<(i64, i64, i64)>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetCheckpoints")]
    async fn process(&self, _query: GetCheckpoints) -> Result<Vec<(i64, i64, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT chain_id, block_number, log_index FROM checkpoints ORDER BY chain_id",
        )
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct PutCheckpoint {
    pub chain_id: i64,
    pub block_number: i64,
    pub log_index: i64,
}

impl Processor<PutCheckpoint> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:PutCheckpoint")]
    async fn process(&self, cmd: PutCheckpoint) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (chain_id, block_number, log_index)
            VALUES ($1, $2, $3)
            ON CONFLICT (chain_id) DO UPDATE
            SET block_number = EXCLUDED.block_number, log_index = EXCLUDED.log_index
            "#,
        )
        .bind(cmd.chain_id)
        .bind(cmd.block_number)
        .bind(cmd.log_index)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn to_sql_int(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(value))
}

fn from_sql_int(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::OutOfRange(value.unsigned_abs()))
}

/// [`StoreBackend`] over PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgBackend {
    db: DatabaseProcessor,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
        }
    }
}

#[async_trait]
impl StoreBackend for PgBackend {
    async fn get(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
    ) -> Result<Option<Record>, StoreError> {
        let value = self
            .db
            .process(GetEntityRecord {
                entity_type,
                key: key.clone(),
            })
            .await?;
        value
            .map(serde_json::from_value::<Record>)
            .transpose()
            .map_err(Into::into)
    }

    async fn put(
        &self,
        entity_type: EntityType,
        key: &EntityKey,
        record: Record,
    ) -> Result<(), StoreError> {
        let record = serde_json::to_value(record)?;
        self.db
            .process(PutEntityRecord {
                entity_type,
                key: key.clone(),
                record,
            })
            .await?;
        Ok(())
    }

    async fn count(&self, entity_type: EntityType) -> Result<u64, StoreError> {
        let count = self.db.process(CountEntities { entity_type }).await?;
        from_sql_int(count)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.db.process(ClearStore).await?;
        Ok(())
    }

    async fn checkpoints(&self) -> Result<BTreeMap<u64, Cursor>, StoreError> {
        let rows = self.db.process(GetCheckpoints).await?;
        rows.into_iter()
            .map(|(chain_id, block_number, log_index)| {
                Ok((
                    from_sql_int(chain_id)?,
                    Cursor::new(from_sql_int(block_number)?, from_sql_int(log_index)?),
                ))
            })
            .collect()
    }

    async fn put_checkpoint(&self, chain_id: u64, cursor: Cursor) -> Result<(), StoreError> {
        self.db
            .process(PutCheckpoint {
                chain_id: to_sql_int(chain_id)?,
                block_number: to_sql_int(cursor.block_number)?,
                log_index: to_sql_int(cursor.log_index)?,
            })
            .await?;
        Ok(())
    }
}
