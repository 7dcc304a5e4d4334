//! Audit trail of events skipped under [`FailurePolicy::Skip`].
//!
//! [`FailurePolicy::Skip`]: super::FailurePolicy::Skip

use crate::entities::EntityType;
use crate::key::EntityKey;
use async_trait::async_trait;
use omidx_sdk::objects::{Event, HexBytes, Provenance};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One event the driver skipped instead of halting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEvent {
    pub provenance: Provenance,
    pub contract_address: HexBytes,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<EntityKey>,
    pub error: String,
}

impl SkippedEvent {
    pub fn new(
        event: &Event,
        entity: Option<(EntityType, EntityKey)>,
        error: impl ToString,
    ) -> Self {
        let (entity_type, key) = entity.unzip();
        Self {
            provenance: event.provenance(),
            contract_address: event.contract_address.clone(),
            signature: event.signature.clone(),
            entity_type,
            key,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to write audit record: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode audit record: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, skipped: SkippedEvent) -> Result<(), AuditError>;
}

/// Keeps skipped events in memory.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<SkippedEvent>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<SkippedEvent> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn record(&self, skipped: SkippedEvent) -> Result<(), AuditError> {
        self.records.lock().await.push(skipped);
        Ok(())
    }
}

/// Appends one JSON object per skipped event to a file.
pub struct JsonLinesAudit {
    file: Mutex<File>,
}

impl JsonLinesAudit {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for JsonLinesAudit {
    async fn record(&self, skipped: SkippedEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(&skipped)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hex, image_updated_event};

    #[tokio::test]
    async fn test_json_lines_audit_appends() {
        let path = std::env::temp_dir().join(format!("omidx-audit-{}.jsonl", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;

        let event = image_updated_event(
            Provenance::new(1, 7, 2),
            hex("0x0a"),
            hex("0x01"),
            hex("0xdeadbeef"),
            None,
        );
        let audit = JsonLinesAudit::open(&path).await.unwrap();
        audit
            .record(SkippedEvent::new(&event, None, "first"))
            .await
            .unwrap();
        audit
            .record(SkippedEvent::new(
                &event,
                Some((EntityType::ImageUpdated, EntityKey::from("1_7_2"))),
                "second",
            ))
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["error"], "first");
        assert!(lines[0].get("key").is_none());
        assert_eq!(lines[1]["key"], "1_7_2");
        assert_eq!(lines[1]["entityType"], "ImageUpdated");

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
