//! TOML file configuration structures.
//!
//! These structs directly map to the `omidx-config.toml` file format.

use omidx_core::handlers::HandlerKind;
use omidx_core::key::EventKeyScheme;
use omidx_core::replay::{DEFAULT_CHECKPOINT_INTERVAL, FailurePolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Where a fresh run starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// Continue from the checkpoints saved in the store.
    #[default]
    Stored,
    /// Reprocess every event.
    Genesis,
}

/// Replay behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    /// Run one driver per chain instead of one for the whole stream.
    #[serde(default)]
    pub per_chain_drivers: bool,
    #[serde(default)]
    pub resume: ResumeMode,
    /// JSON-lines file receiving skipped events. Required by `skip`.
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            checkpoint_interval: default_checkpoint_interval(),
            per_chain_drivers: false,
            resume: ResumeMode::default(),
            audit_log: None,
        }
    }
}

fn default_checkpoint_interval() -> u64 {
    DEFAULT_CHECKPOINT_INTERVAL
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    #[default]
    Memory,
    /// PostgreSQL at `DATABASE_URL`.
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackendKind,
}

/// One contract event routed to one handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Label used in logs.
    pub name: String,
    pub chain_id: u64,
    /// Contract address, hex in either case.
    pub address: String,
    pub handler: HandlerKind,
    /// Key scheme for event-scoped handlers.
    #[serde(default)]
    pub key_scheme: EventKeyScheme,
}
