//! Dispatch table: routes each event to the handler registered for its
//! `(chain_id, contract_address, signature)` triple.
//!
//! The table is built and validated before any event is processed. Events
//! with no registered handler are dropped, since chains emit plenty of logs
//! nobody indexes, but they are counted.

use crate::handlers::{Handler, HandlerContext, HandlerError, HandlerOutcome};
use omidx_sdk::objects::{Event, HexBytes};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// Lookup key of the dispatch table.
///
/// Addresses compare as bytes, so differently cased hex spellings of one
/// contract resolve to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchKey {
    pub chain_id: u64,
    pub contract_address: HexBytes,
    pub signature: String,
}

impl DispatchKey {
    pub fn new(chain_id: u64, contract_address: HexBytes, signature: impl Into<String>) -> Self {
        Self {
            chain_id,
            contract_address,
            signature: signature.into(),
        }
    }

    pub fn of(event: &Event) -> Self {
        Self::new(
            event.chain_id,
            event.contract_address.clone(),
            event.signature.clone(),
        )
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chain {} contract {} {}",
            self.chain_id, self.contract_address, self.signature
        )
    }
}

/// Errors raised while building the table.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("handler {existing} is already registered for {key}")]
    DuplicateHandler {
        key: DispatchKey,
        existing: &'static str,
    },
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled {
        handler: &'static str,
        outcome: HandlerOutcome,
    },
    Unmatched,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub unmatched: u64,
}

#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<DispatchKey, Arc<dyn Handler>>,
    dispatched: AtomicU64,
    unmatched: AtomicU64,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to a triple. A second registration for the same triple
    /// is a configuration error.
    pub fn register(
        &mut self,
        chain_id: u64,
        contract_address: HexBytes,
        signature: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), DispatchError> {
        let key = DispatchKey::new(chain_id, contract_address, signature);
        if let Some(existing) = self.handlers.get(&key) {
            return Err(DispatchError::DuplicateHandler {
                key,
                existing: existing.name(),
            });
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Registered triples and handler names, sorted.
    pub fn registrations(&self) -> Vec<(DispatchKey, &'static str)> {
        let mut registrations: Vec<_> = self
            .handlers
            .iter()
            .map(|(key, handler)| (key.clone(), handler.name()))
            .collect();
        registrations.sort();
        registrations
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Chains that have at least one registered handler.
    pub fn chain_ids(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.handlers.keys().map(|key| key.chain_id).collect();
        chains.sort_unstable();
        chains.dedup();
        chains
    }

    /// Invoke the handler registered for `event`, if any.
    pub async fn dispatch(
        &self,
        event: &Event,
        ctx: &HandlerContext<'_>,
    ) -> Result<DispatchOutcome, HandlerError> {
        let key = DispatchKey::of(event);
        let Some(handler) = self.handlers.get(&key) else {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(
                chain_id = event.chain_id,
                block_number = event.block_number,
                log_index = event.log_index,
                contract = %event.contract_address,
                signature = %event.signature,
                "No handler registered, dropping event"
            );
            return Ok(DispatchOutcome::Unmatched);
        };

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let outcome = handler.handle(event, ctx).await?;
        Ok(DispatchOutcome::Handled {
            handler: handler.name(),
            outcome,
        })
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
        }
    }
}
