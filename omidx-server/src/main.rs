//! omidx server
//!
//! Replays a blockchain event log into typed entities and serves them over
//! a read-only HTTP API.

mod api;
mod config;
mod indexer;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::file::StoreBackendKind;
use config::{ConfigLoader, get_database_url};
use indexer::Indexer;
use omidx_core::replay::{AuditSink, EventSource, JsonLinesAudit, JsonLinesSource};
use omidx_core::store::{EntityStore, PgBackend};
use server::{build_router, run_server};
use shutdown::spawn_shutdown_handler;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// omidx - deterministic blockchain event-to-entity indexer
#[derive(Parser, Debug)]
#[command(name = "omidx-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./omidx-config.toml")]
    config: PathBuf,

    /// JSON-lines event log to replay ("-" or absent reads stdin)
    #[arg(short, long, env = "OMIDX_EVENTS")]
    events: Option<PathBuf>,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting omidx-server v{}", env!("CARGO_PKG_VERSION"));

    let loaded_config = ConfigLoader::new(&args.config, args.listen)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!("Configuration loaded from {:?}", args.config);
    for source in &loaded_config.sources {
        tracing::info!(
            source = %source.name,
            chain_id = source.chain_id,
            address = %source.address,
            handler = ?source.handler,
            "Registered source"
        );
    }

    let (store, db_pool) = open_store(&loaded_config.store.backend, args.migrate).await?;

    let audit: Option<Arc<dyn AuditSink>> = match &loaded_config.indexer.audit_log {
        Some(path) => {
            tracing::info!("Writing skipped events to {:?}", path);
            Some(Arc::new(JsonLinesAudit::open(path).await?))
        }
        None => None,
    };

    let dispatch = Arc::new(loaded_config.dispatch);
    let indexer = Indexer::new(&store, dispatch.clone(), &loaded_config.indexer, audit);
    let state = AppState::new(store, dispatch, indexer.handles());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    spawn_shutdown_handler(shutdown_tx.clone());

    let source: Box<dyn EventSource> = match &args.events {
        Some(path) if path.as_os_str() != "-" => {
            tracing::info!("Replaying events from {:?}", path);
            Box::new(JsonLinesSource::open(path).await?)
        }
        _ => {
            tracing::info!("Replaying events from stdin");
            Box::new(JsonLinesSource::stdin())
        }
    };
    let indexer_task = indexer.spawn(source, shutdown_rx.clone());

    let router = build_router(state);
    let listen_addr = loaded_config.server.listen;
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr, shutdown_rx).await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server failed, cancelling replay");
        shutdown_tx.send_replace(true);
    }
    if let Err(e) = indexer_task.await {
        tracing::error!(error = %e, "Indexer task panicked");
    }

    if let Some(db_pool) = db_pool {
        tracing::info!("Closing database connections...");
        db_pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

async fn open_store(
    backend: &StoreBackendKind,
    migrate: bool,
) -> anyhow::Result<(EntityStore, Option<PgPool>)> {
    match backend {
        StoreBackendKind::Memory => {
            tracing::info!("Using in-memory entity store");
            Ok((EntityStore::in_memory(), None))
        }
        StoreBackendKind::Postgres => {
            let database_url = get_database_url().map_err(|e| {
                tracing::error!("DATABASE_URL environment variable not set");
                e
            })?;

            tracing::info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to database: {}", e);
                    e
                })?;
            tracing::info!("Database connection established");

            if migrate {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("../migrations")
                    .run(&db_pool)
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to run migrations: {}", e);
                        e
                    })?;
                tracing::info!("Migrations completed successfully");
            }

            let store = EntityStore::new(Arc::new(PgBackend::new(db_pool.clone())));
            Ok((store, Some(db_pool)))
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
