//! Validated runtime configuration.

use super::file::{ResumeMode, StoreBackendKind};
use omidx_core::dispatch::{DispatchError, DispatchTable};
use omidx_core::handlers::HandlerKind;
use omidx_core::key::EventKeyScheme;
use omidx_core::replay::{FailurePolicy, ReplayOptions, ResumeFrom};
use omidx_sdk::objects::HexBytes;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub failure_policy: FailurePolicy,
    pub checkpoint_interval: u64,
    pub per_chain_drivers: bool,
    pub resume: ResumeMode,
    pub audit_log: Option<PathBuf>,
}

impl IndexerConfig {
    pub fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            failure_policy: self.failure_policy,
            checkpoint_interval: self.checkpoint_interval,
            resume: match self.resume {
                ResumeMode::Stored => ResumeFrom::Stored,
                ResumeMode::Genesis => ResumeFrom::Genesis,
            },
        }
    }
}

/// A contract event source with its address already decoded.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub chain_id: u64,
    pub address: HexBytes,
    pub handler: HandlerKind,
    pub key_scheme: EventKeyScheme,
}

/// Build the dispatch table. Two sources on the same triple are rejected.
pub fn build_dispatch_table(sources: &[SourceConfig]) -> Result<DispatchTable, DispatchError> {
    let mut table = DispatchTable::new();
    for source in sources {
        table.register(
            source.chain_id,
            source.address.clone(),
            source.handler.signature(),
            source.handler.build(source.key_scheme),
        )?;
        tracing::debug!(
            source = %source.name,
            chain_id = source.chain_id,
            address = %source.address,
            handler = ?source.handler,
            "Registered source"
        );
    }
    Ok(table)
}

/// The store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
}
