//! Application state shared across all request handlers.

use omidx_core::dispatch::DispatchTable;
use omidx_core::replay::ReplayProgress;
use omidx_core::store::EntityStore;
use std::sync::Arc;
use tokio::sync::watch;

/// Live view of one replay driver.
#[derive(Clone)]
pub struct DriverHandle {
    /// `"global"`, or `"chain-{id}"` with per-chain drivers.
    pub name: String,
    pub progress: watch::Receiver<ReplayProgress>,
}

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub store: EntityStore,
    pub dispatch: Arc<DispatchTable>,
    pub drivers: Arc<Vec<DriverHandle>>,
}

impl AppState {
    pub fn new(store: EntityStore, dispatch: Arc<DispatchTable>, drivers: Vec<DriverHandle>) -> Self {
        Self {
            store,
            dispatch,
            drivers: Arc::new(drivers),
        }
    }
}
