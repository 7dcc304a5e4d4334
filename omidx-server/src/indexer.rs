//! Replay driver orchestration.
//!
//! By default one driver consumes the whole event stream. With
//! `indexer.per_chain_drivers` a demultiplexer fans the stream out to one
//! driver per configured chain, each fed through its own channel. A source
//! failure reaches every chain driver, so none of them reports a drain.

use crate::config::runtime::IndexerConfig;
use crate::state::DriverHandle;
use omidx_core::dispatch::DispatchTable;
use omidx_core::replay::{
    AuditSink, EventSender, EventSource, ReplayDriver, ReplayError, ReplayReport,
    UpstreamFailure, event_channel,
};
use omidx_core::store::EntityStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

struct NamedDriver {
    name: String,
    chain_id: Option<u64>,
    driver: Arc<ReplayDriver>,
}

pub struct Indexer {
    drivers: Vec<NamedDriver>,
}

impl Indexer {
    pub fn new(
        store: &EntityStore,
        dispatch: Arc<DispatchTable>,
        config: &IndexerConfig,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        let options = config.replay_options();
        let build = || {
            let driver = ReplayDriver::new(store.clone(), dispatch.clone(), options.clone());
            let driver = match &audit {
                Some(audit) => driver.with_audit(audit.clone()),
                None => driver,
            };
            Arc::new(driver)
        };

        let drivers = if config.per_chain_drivers {
            dispatch
                .chain_ids()
                .into_iter()
                .map(|chain_id| NamedDriver {
                    name: format!("chain-{chain_id}"),
                    chain_id: Some(chain_id),
                    driver: build(),
                })
                .collect()
        } else {
            vec![NamedDriver {
                name: "global".to_string(),
                chain_id: None,
                driver: build(),
            }]
        };
        Self { drivers }
    }

    pub fn handles(&self) -> Vec<DriverHandle> {
        self.drivers
            .iter()
            .map(|named| DriverHandle {
                name: named.name.clone(),
                progress: named.driver.subscribe(),
            })
            .collect()
    }

    /// Start every driver. The returned task completes once all of them
    /// have reached a terminal state.
    pub fn spawn(
        self,
        mut source: Box<dyn EventSource>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let mut tasks = JoinSet::new();
        let mut senders: HashMap<u64, EventSender> = HashMap::new();
        let failure = UpstreamFailure::new();

        for named in self.drivers {
            let shutdown_rx = shutdown_rx.clone();
            match named.chain_id {
                None => {
                    tasks.spawn(async move {
                        let result = named.driver.start(source.as_mut(), shutdown_rx).await;
                        log_outcome(&named.name, result);
                    });
                    // A global driver owns the source; there is only one.
                    return tokio::spawn(join_all(tasks));
                }
                Some(chain_id) => {
                    let (tx, chain_source) = event_channel();
                    let mut chain_source = chain_source.with_failure(failure.clone());
                    senders.insert(chain_id, tx);
                    tasks.spawn(async move {
                        let result = named.driver.start(&mut chain_source, shutdown_rx).await;
                        log_outcome(&named.name, result);
                    });
                }
            }
        }

        tasks.spawn(demultiplex(source, senders, failure, shutdown_rx));
        tokio::spawn(join_all(tasks))
    }
}

async fn join_all(mut tasks: JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Indexer task panicked");
        }
    }
}

/// Route each event to its chain's driver. Dropping the senders on exit
/// lets every driver drain, or fail when `failure` was recorded first.
async fn demultiplex(
    mut source: Box<dyn EventSource>,
    mut senders: HashMap<u64, EventSender>,
    failure: UpstreamFailure,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            biased;

            Ok(_) = shutdown_rx.wait_for(|shutdown| *shutdown) => {
                tracing::info!("Demultiplexer received shutdown signal");
                break;
            }

            next = source.next_event() => next,
        };

        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::info!("Event source drained");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Event source failed");
                failure.fail(&e);
                break;
            }
        };

        let chain_id = event.chain_id;
        let Some(tx) = senders.get(&chain_id) else {
            tracing::debug!(chain_id, "No driver for chain, dropping event");
            continue;
        };
        if tx.send(event).await.is_err() {
            tracing::warn!(chain_id, "Driver stopped, no longer routing its chain");
            senders.remove(&chain_id);
        }
    }
}

fn log_outcome(name: &str, result: Result<ReplayReport, ReplayError>) {
    match result {
        Ok(report) => tracing::info!(
            driver = name,
            state = %report.state(),
            processed = report.progress.processed,
            skipped = report.progress.skipped,
            unmatched = report.progress.unmatched,
            already_indexed = report.progress.already_indexed,
            "Driver finished"
        ),
        Err(e) => tracing::error!(
            driver = name,
            provenance = ?e.provenance(),
            error = %e,
            "Driver failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::ResumeMode;
    use omidx_core::entities::{EntityType, ThumbnailMapping};
    use omidx_core::key::EntityKey;
    use async_trait::async_trait;
    use omidx_core::replay::{FailurePolicy, ReplayState, SourceError, VecEventSource};
    use omidx_core::testing::{THUMBNAIL_CONTRACT, hex, image_updated_event};
    use omidx_sdk::objects::Provenance;

    fn config(per_chain_drivers: bool) -> IndexerConfig {
        IndexerConfig {
            failure_policy: FailurePolicy::Halt,
            checkpoint_interval: 10,
            per_chain_drivers,
            resume: ResumeMode::Genesis,
            audit_log: None,
        }
    }

    fn dispatch() -> Arc<DispatchTable> {
        let mut table = DispatchTable::new();
        for chain_id in [1, 100] {
            table
                .register(
                    chain_id,
                    hex(THUMBNAIL_CONTRACT),
                    omidx_core::handlers::IMAGE_UPDATED_SIGNATURE,
                    Arc::new(omidx_core::handlers::ThumbnailMappingHandler),
                )
                .unwrap();
        }
        Arc::new(table)
    }

    fn update(chain_id: u64, block: u64, market: u8, image: u8) -> omidx_sdk::objects::Event {
        image_updated_event(
            Provenance::new(chain_id, block, 0),
            hex(THUMBNAIL_CONTRACT),
            [market].into(),
            [image].into(),
            None,
        )
    }

    #[tokio::test]
    async fn test_per_chain_drivers_share_one_store() {
        let store = EntityStore::in_memory();
        let indexer = Indexer::new(&store, dispatch(), &config(true), None);
        let handles = indexer.handles();
        assert_eq!(
            handles.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(),
            vec!["chain-1", "chain-100"]
        );

        let events = vec![
            update(100, 5, 1, 0xaa),
            update(1, 1, 2, 0xbb),
            update(1, 2, 3, 0xcc),
            // Unconfigured chain.
            update(7, 1, 4, 0xdd),
        ];
        let (_tx, rx) = watch::channel(false);
        indexer
            .spawn(Box::new(VecEventSource::new(events)), rx)
            .await
            .unwrap();

        for handle in &handles {
            assert_eq!(handle.progress.borrow().state, ReplayState::Drained);
        }
        assert_eq!(
            store
                .entity_count(EntityType::ThumbnailMapping)
                .await
                .unwrap(),
            3
        );
        let mapping: ThumbnailMapping = store
            .load(&EntityKey::from("0x03"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.image_hash, Some(hex("0xcc")));
    }

    #[tokio::test]
    async fn test_global_driver_consumes_whole_stream() {
        let store = EntityStore::in_memory();
        let indexer = Indexer::new(&store, dispatch(), &config(false), None);
        let handles = indexer.handles();
        assert_eq!(handles.len(), 1);

        let events = vec![update(100, 5, 1, 0xaa), update(1, 1, 1, 0xbb)];
        let (_tx, rx) = watch::channel(false);
        indexer
            .spawn(Box::new(VecEventSource::new(events)), rx)
            .await
            .unwrap();

        let progress = *handles[0].progress.borrow();
        assert_eq!(progress.state, ReplayState::Drained);
        assert_eq!(progress.processed, 2);
    }

    /// Yields its events, then fails instead of draining.
    struct BrokenSource {
        events: VecEventSource,
    }

    #[async_trait]
    impl EventSource for BrokenSource {
        async fn next_event(&mut self) -> Result<Option<omidx_sdk::objects::Event>, SourceError> {
            match self.events.next_event().await? {
                Some(event) => Ok(Some(event)),
                None => Err(SourceError::Io(std::io::Error::other("connection reset"))),
            }
        }
    }

    #[tokio::test]
    async fn test_source_failure_fails_drivers_in_both_modes() {
        for per_chain_drivers in [false, true] {
            let store = EntityStore::in_memory();
            let indexer = Indexer::new(&store, dispatch(), &config(per_chain_drivers), None);
            let handles = indexer.handles();

            let source = BrokenSource {
                events: VecEventSource::new(vec![update(100, 5, 1, 0xaa)]),
            };
            let (_tx, rx) = watch::channel(false);
            indexer.spawn(Box::new(source), rx).await.unwrap();

            for handle in &handles {
                assert_eq!(
                    handle.progress.borrow().state,
                    ReplayState::Failed,
                    "driver {} with per_chain_drivers = {per_chain_drivers}",
                    handle.name
                );
            }
            // The event before the failure is still indexed.
            assert_eq!(
                store
                    .entity_count(EntityType::ThumbnailMapping)
                    .await
                    .unwrap(),
                1
            );
        }
    }
}
