//! The replay driver.
//!
//! Pulls events from a source one at a time and awaits each dispatch before
//! pulling the next, so entity state only ever reflects a prefix of the
//! stream. The lifecycle is `Idle -> Processing -> {Drained | Failed |
//! Cancelled}`; a driver runs once.

use super::audit::{AuditError, AuditSink, SkippedEvent};
use super::source::{EventSource, SourceError};
use crate::dispatch::{DispatchOutcome, DispatchTable};
use crate::entities::EntityType;
use crate::handlers::{HandlerContext, HandlerError};
use crate::key::EntityKey;
use crate::store::{EntityStore, StoreError};
use omidx_sdk::objects::{Cursor, Event, Provenance};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayState {
    #[default]
    Idle,
    Processing,
    Drained,
    Failed,
    Cancelled,
}

impl ReplayState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReplayState::Drained | ReplayState::Failed | ReplayState::Cancelled
        )
    }
}

impl fmt::Display for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplayState::Idle => "idle",
            ReplayState::Processing => "processing",
            ReplayState::Drained => "drained",
            ReplayState::Failed => "failed",
            ReplayState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What to do when a handler hits a schema violation.
///
/// Store I/O failures always halt, whatever the policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Halt,
    /// Record the event in the audit sink and move on.
    Skip,
}

/// Where each chain's stream picks up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResumeFrom {
    /// Process everything.
    Genesis,
    /// Use the checkpoints persisted in the store.
    #[default]
    Stored,
    /// Use caller-provided cursors, keyed by chain id.
    Cursors(BTreeMap<u64, Cursor>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOptions {
    pub failure_policy: FailurePolicy,
    /// Save checkpoints after this many events. Zero only checkpoints when
    /// the run ends.
    pub checkpoint_interval: u64,
    pub resume: ResumeFrom,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            resume: ResumeFrom::default(),
        }
    }
}

fn entity_suffix(entity: &Option<(EntityType, EntityKey)>) -> String {
    match entity {
        Some((entity_type, key)) => format!(" on {entity_type} {key}"),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("handler failed at {provenance}{}: {source}", entity_suffix(.entity))]
    Handler {
        provenance: Provenance,
        entity: Option<(EntityType, EntityKey)>,
        #[source]
        source: HandlerError,
    },

    #[error("event at {provenance} arrived after {last} on the same chain")]
    OutOfOrder { provenance: Provenance, last: Cursor },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("failed to persist checkpoint for chain {chain_id}: {source}")]
    Checkpoint {
        chain_id: u64,
        #[source]
        source: StoreError,
    },

    #[error("failed to load checkpoints: {0}")]
    Resume(#[source] StoreError),

    #[error("failed to audit skipped event at {provenance}: {source}")]
    Audit {
        provenance: Provenance,
        #[source]
        source: AuditError,
    },

    #[error("skip policy needs an audit sink")]
    MissingAuditSink,

    #[error("driver already started, state is {0}")]
    NotIdle(ReplayState),
}

impl ReplayError {
    /// Position of the event that caused the failure, when there is one.
    pub fn provenance(&self) -> Option<Provenance> {
        match self {
            ReplayError::Handler { provenance, .. }
            | ReplayError::OutOfOrder { provenance, .. }
            | ReplayError::Audit { provenance, .. } => Some(*provenance),
            _ => None,
        }
    }
}

/// Live counters, published on every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayProgress {
    pub state: ReplayState,
    /// Events a handler accepted.
    pub processed: u64,
    /// Events dropped under the skip policy.
    pub skipped: u64,
    /// Events with no registered handler.
    pub unmatched: u64,
    /// Events at or before the resume cursor.
    pub already_indexed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    #[serde(flatten)]
    pub progress: ReplayProgress,
    /// Last checkpoint written per chain.
    pub checkpoints: BTreeMap<u64, Cursor>,
}

impl ReplayReport {
    pub fn state(&self) -> ReplayState {
        self.progress.state
    }
}

/// Per-run cursor bookkeeping.
#[derive(Default)]
struct Cursors {
    resume: BTreeMap<u64, Cursor>,
    /// Last event handled (or skipped) on each chain during this run.
    last: HashMap<u64, Cursor>,
    written: BTreeMap<u64, Cursor>,
    since_checkpoint: u64,
}

pub struct ReplayDriver {
    store: EntityStore,
    dispatch: Arc<DispatchTable>,
    audit: Option<Arc<dyn AuditSink>>,
    options: ReplayOptions,
    progress: watch::Sender<ReplayProgress>,
}

impl ReplayDriver {
    pub fn new(store: EntityStore, dispatch: Arc<DispatchTable>, options: ReplayOptions) -> Self {
        let (progress, _) = watch::channel(ReplayProgress::default());
        Self {
            store,
            dispatch,
            audit: None,
            options,
            progress,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn state(&self) -> ReplayState {
        self.progress.borrow().state
    }

    pub fn progress(&self) -> ReplayProgress {
        *self.progress.borrow()
    }

    /// Observe state and counters while the driver runs.
    pub fn subscribe(&self) -> watch::Receiver<ReplayProgress> {
        self.progress.subscribe()
    }

    fn set_state(&self, state: ReplayState) {
        self.progress.send_modify(|progress| progress.state = state);
    }

    /// Run until the source drains, a fatal error occurs, or `shutdown`
    /// flips to `true`. Cancellation is only observed between events.
    #[tracing::instrument(skip_all, name = "replay")]
    pub async fn start<S: EventSource + ?Sized>(
        &self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ReplayReport, ReplayError> {
        if self.options.failure_policy == FailurePolicy::Skip && self.audit.is_none() {
            return Err(ReplayError::MissingAuditSink);
        }
        let began = self.progress.send_if_modified(|progress| {
            if progress.state == ReplayState::Idle {
                progress.state = ReplayState::Processing;
                true
            } else {
                false
            }
        });
        if !began {
            return Err(ReplayError::NotIdle(self.state()));
        }

        let mut cursors = Cursors::default();
        match self.resume_cursors().await {
            Ok(resume) => cursors.resume = resume,
            Err(e) => {
                self.set_state(ReplayState::Failed);
                return Err(e);
            }
        }
        info!(
            failure_policy = ?self.options.failure_policy,
            resume = ?cursors.resume,
            "Replay started"
        );

        let outcome = self.run(source, &mut shutdown, &mut cursors).await;
        let flushed = self.flush_checkpoints(&mut cursors).await;

        let result = match (outcome, flushed) {
            (Ok(state), Ok(())) => Ok(state),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(checkpoint_error)) => {
                warn!(error = %checkpoint_error, "Checkpoint after failure also failed");
                Err(e)
            }
        };

        match result {
            Ok(state) => {
                self.set_state(state);
                let report = ReplayReport {
                    progress: self.progress(),
                    checkpoints: cursors.written,
                };
                info!(
                    state = %state,
                    processed = report.progress.processed,
                    skipped = report.progress.skipped,
                    unmatched = report.progress.unmatched,
                    "Replay finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(ReplayState::Failed);
                warn!(error = %e, "Replay failed");
                Err(e)
            }
        }
    }

    async fn resume_cursors(&self) -> Result<BTreeMap<u64, Cursor>, ReplayError> {
        match &self.options.resume {
            ResumeFrom::Genesis => Ok(BTreeMap::new()),
            ResumeFrom::Stored => self.store.checkpoints().await.map_err(ReplayError::Resume),
            ResumeFrom::Cursors(cursors) => Ok(cursors.clone()),
        }
    }

    /// Main loop. Returns the terminal state on a clean stop.
    async fn run<S: EventSource + ?Sized>(
        &self,
        source: &mut S,
        shutdown: &mut watch::Receiver<bool>,
        cursors: &mut Cursors,
    ) -> Result<ReplayState, ReplayError> {
        // Once the shutdown sender is gone nobody can cancel us any more.
        let mut shutdown_open = true;
        loop {
            if *shutdown.borrow() {
                info!("Replay received shutdown signal");
                return Ok(ReplayState::Cancelled);
            }

            let next = tokio::select! {
                biased;

                changed = shutdown.changed(), if shutdown_open => {
                    if changed.is_err() {
                        shutdown_open = false;
                    }
                    continue;
                }

                next = source.next_event() => next?,
            };

            let Some(event) = next else {
                return Ok(ReplayState::Drained);
            };
            self.step(&event, cursors).await?;

            if self.options.checkpoint_interval > 0
                && cursors.since_checkpoint >= self.options.checkpoint_interval
            {
                self.flush_checkpoints(cursors).await?;
            }
        }
    }

    /// Handle a single event: ordering guard, resume skip, dispatch, policy.
    async fn step(&self, event: &Event, cursors: &mut Cursors) -> Result<(), ReplayError> {
        let provenance = event.provenance();
        let cursor = event.cursor();

        match cursors.last.get(&provenance.chain_id) {
            Some(last) if cursor <= *last => {
                return Err(ReplayError::OutOfOrder {
                    provenance,
                    last: *last,
                });
            }
            Some(_) => {}
            None => {
                if let Some(resume) = cursors.resume.get(&provenance.chain_id)
                    && cursor <= *resume
                {
                    debug!(%provenance, "Event already indexed, skipping");
                    self.progress
                        .send_modify(|progress| progress.already_indexed += 1);
                    return Ok(());
                }
            }
        }

        let ctx = HandlerContext::new(&self.store, provenance);
        match self.dispatch.dispatch(event, &ctx).await {
            Ok(DispatchOutcome::Handled { handler, .. }) => {
                debug!(%provenance, handler, "Event handled");
                self.progress.send_modify(|progress| progress.processed += 1);
            }
            Ok(DispatchOutcome::Unmatched) => {
                self.progress.send_modify(|progress| progress.unmatched += 1);
            }
            Err(error) => {
                let entity = failed_entity(&error).or(ctx.touched().await);
                let skip = self.options.failure_policy == FailurePolicy::Skip
                    && error.is_schema_violation();
                let audit = self.audit.as_ref().filter(|_| skip);
                let Some(audit) = audit else {
                    return Err(ReplayError::Handler {
                        provenance,
                        entity,
                        source: error,
                    });
                };

                warn!(
                    chain_id = provenance.chain_id,
                    block_number = provenance.block_number,
                    log_index = provenance.log_index,
                    error = %error,
                    "Skipping event that violates the schema"
                );
                audit
                    .record(SkippedEvent::new(event, entity, &error))
                    .await
                    .map_err(|source| ReplayError::Audit { provenance, source })?;
                self.progress.send_modify(|progress| progress.skipped += 1);
            }
        }

        cursors.last.insert(provenance.chain_id, cursor);
        cursors.since_checkpoint += 1;
        Ok(())
    }

    /// Persist the last handled cursor of every chain that moved since the
    /// previous flush.
    async fn flush_checkpoints(&self, cursors: &mut Cursors) -> Result<(), ReplayError> {
        for (&chain_id, &cursor) in &cursors.last {
            if cursors.written.get(&chain_id) == Some(&cursor) {
                continue;
            }
            self.store
                .save_checkpoint(chain_id, cursor)
                .await
                .map_err(|source| ReplayError::Checkpoint { chain_id, source })?;
            debug!(chain_id, %cursor, "Checkpoint saved");
            cursors.written.insert(chain_id, cursor);
        }
        cursors.since_checkpoint = 0;
        Ok(())
    }
}

/// The entity a schema violation names, if any.
fn failed_entity(error: &HandlerError) -> Option<(EntityType, EntityKey)> {
    match error {
        HandlerError::Store(StoreError::Schema(schema)) => schema.entity(),
        _ => None,
    }
}
