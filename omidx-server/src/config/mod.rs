//! Configuration module for omidx-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;
pub mod runtime;

use crate::config::file::{FileConfig, SourceConfig as FileSourceConfig};
use crate::config::runtime::{
    IndexerConfig, ServerConfig, SourceConfig, StoreConfig, build_dispatch_table,
};
use omidx_core::dispatch::{DispatchError, DispatchTable};
use omidx_core::replay::FailurePolicy;
use omidx_sdk::objects::HexBytes;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid dispatch table: {0}")]
    DispatchError(#[from] DispatchError),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub indexer: IndexerConfig,
    pub store: StoreConfig,
    pub sources: Vec<SourceConfig>,
    pub dispatch: DispatchTable,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Build the dispatch table, rejecting duplicate registrations
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    fn load_str(&self, config_content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        self.validate(&file_config)?;

        let sources = file_config
            .sources
            .into_iter()
            .map(convert_source)
            .collect::<Result<Vec<_>, _>>()?;
        let dispatch = build_dispatch_table(&sources)?;

        Ok(LoadedConfig {
            server: ServerConfig {
                listen: file_config.server.listen,
            },
            indexer: IndexerConfig {
                failure_policy: file_config.indexer.failure_policy,
                checkpoint_interval: file_config.indexer.checkpoint_interval,
                per_chain_drivers: file_config.indexer.per_chain_drivers,
                resume: file_config.indexer.resume,
                audit_log: file_config.indexer.audit_log,
            },
            store: StoreConfig {
                backend: file_config.store.backend,
            },
            sources,
            dispatch,
        })
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        if config.sources.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[sources]] entry is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for source in &config.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "source name {} is used twice",
                    source.name
                )));
            }
        }

        if config.indexer.checkpoint_interval == 0 {
            return Err(ConfigError::ValidationError(
                "indexer.checkpoint_interval must be greater than zero".to_string(),
            ));
        }

        if config.indexer.failure_policy == FailurePolicy::Skip
            && config.indexer.audit_log.is_none()
        {
            return Err(ConfigError::ValidationError(
                "indexer.failure_policy = \"skip\" requires indexer.audit_log".to_string(),
            ));
        }
        Ok(())
    }
}

fn convert_source(s: FileSourceConfig) -> Result<SourceConfig, ConfigError> {
    let address = s.address.parse::<HexBytes>().map_err(|e| {
        ConfigError::ValidationError(format!(
            "source {} has invalid address {}: {}",
            s.name, s.address, e
        ))
    })?;
    Ok(SourceConfig {
        name: s.name,
        chain_id: s.chain_id,
        address,
        handler: s.handler,
        key_scheme: s.key_scheme,
    })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
