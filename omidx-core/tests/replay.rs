//! Replay driver behavior: determinism, ordering, failure policy, resume.

use async_trait::async_trait;
use omidx_core::dispatch::DispatchTable;
use omidx_core::entities::{Entity, EntityType, ThumbnailMapping};
use omidx_core::handlers::{
    Handler, HandlerContext, HandlerError, HandlerOutcome, IMAGE_UPDATED_SIGNATURE,
};
use omidx_core::key::{EntityKey, derive_domain_key};
use omidx_core::replay::{
    FailurePolicy, JsonLinesSource, MemoryAudit, ReplayDriver, ReplayError, ReplayOptions,
    ReplayState, ResumeFrom, VecEventSource, event_channel,
};
use omidx_core::schema::{Record, SchemaError};
use omidx_core::store::{EntityStore, MemoryBackend, StoreError};
use omidx_core::testing::{
    AGENT_RESULT_CONTRACT, OMEN_CHAIN_ID, THUMBNAIL_CONTRACT, hex, image_updated_event,
    omen_dispatch_table, prediction_added_event,
};
use omidx_sdk::objects::{Cursor, Event, HexBytes, Provenance};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

fn thumbnail_update(block: u64, log: u64, market: u8, image: u8) -> Event {
    image_updated_event(
        Provenance::new(OMEN_CHAIN_ID, block, log),
        hex(THUMBNAIL_CONTRACT),
        [market].into(),
        [image].into(),
        Some([0xc0 | market].into()),
    )
}

fn prediction(block: u64, log: u64, market: u8) -> Event {
    prediction_added_event(
        Provenance::new(OMEN_CHAIN_ID, block, log),
        hex(AGENT_RESULT_CONTRACT),
        [market].into(),
        5000,
        hex("0x02"),
        vec![hex("0xaa")],
        hex("0x0a"),
    )
}

fn no_shutdown() -> watch::Receiver<bool> {
    watch::channel(false).1
}

fn genesis() -> ReplayOptions {
    ReplayOptions {
        resume: ResumeFrom::Genesis,
        ..ReplayOptions::default()
    }
}

async fn replay(events: Vec<Event>) -> BTreeMap<(EntityType, EntityKey), Record> {
    let backend = Arc::new(MemoryBackend::new());
    let store = EntityStore::new(backend.clone());
    let driver = ReplayDriver::new(store, Arc::new(omen_dispatch_table()), genesis());
    let report = driver
        .start(&mut VecEventSource::new(events), no_shutdown())
        .await
        .unwrap();
    assert_eq!(report.state(), ReplayState::Drained);
    backend.snapshot().await
}

#[tokio::test]
async fn test_replay_twice_yields_same_state() {
    let events = vec![
        thumbnail_update(1, 0, 1, 0x10),
        prediction(1, 1, 1),
        thumbnail_update(2, 0, 2, 0x20),
        thumbnail_update(3, 4, 1, 0x11),
        prediction(3, 5, 2),
    ];
    let first = replay(events.clone()).await;
    let second = replay(events).await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 4);
}

proptest! {
    #[test]
    fn prop_replay_is_deterministic_and_last_write_wins(
        updates in proptest::collection::vec((0u8..4, any::<u8>()), 1..40)
    ) {
        let events: Vec<Event> = updates
            .iter()
            .enumerate()
            .map(|(i, (market, image))| thumbnail_update(i as u64, 0, *market, *image))
            .collect();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let first = runtime.block_on(replay(events.clone()));
        let second = runtime.block_on(replay(events));
        prop_assert_eq!(&first, &second);

        // The stored image of each market is the last one delivered for it.
        let mut expected = BTreeMap::new();
        for (market, image) in &updates {
            expected.insert(*market, *image);
        }
        prop_assert_eq!(first.len(), expected.len());
        for (market, image) in &expected {
            let key = derive_domain_key(&[*market]);
            let record = &first[&(EntityType::ThumbnailMapping, key.clone())];
            let mapping = ThumbnailMapping::from_record(&key, record).unwrap();
            prop_assert_eq!(mapping.image_hash, Some(HexBytes::from([*image])));
        }
    }
}

#[tokio::test]
async fn test_handler_order_matters_for_domain_entities() {
    let table = omen_dispatch_table();
    let earlier = thumbnail_update(1, 0, 1, 0xaa);
    let later = thumbnail_update(2, 0, 1, 0xbb);
    let key = EntityKey::from("0x01");

    let mut finals = Vec::new();
    for order in [[&earlier, &later], [&later, &earlier]] {
        let store = EntityStore::in_memory();
        for event in order {
            let ctx = HandlerContext::new(&store, event.provenance());
            table.dispatch(event, &ctx).await.unwrap();
        }
        let mapping: ThumbnailMapping = store.load(&key).await.unwrap().unwrap();
        finals.push(mapping.image_hash);
    }
    assert_eq!(finals[0], Some(hex("0xbb")));
    assert_ne!(finals[0], finals[1]);
}

#[tokio::test]
async fn test_driver_rejects_reversed_delivery() {
    let store = EntityStore::in_memory();
    let driver = ReplayDriver::new(store.clone(), Arc::new(omen_dispatch_table()), genesis());
    let events = vec![thumbnail_update(2, 0, 1, 0xbb), thumbnail_update(1, 0, 1, 0xaa)];

    let err = driver
        .start(&mut VecEventSource::new(events), no_shutdown())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReplayError::OutOfOrder { provenance, last }
            if provenance == Provenance::new(OMEN_CHAIN_ID, 1, 0) && last == Cursor::new(2, 0)
    ));
    assert_eq!(driver.state(), ReplayState::Failed);

    // The first event stuck and is checkpointed.
    let mapping: ThumbnailMapping = store
        .load(&EntityKey::from("0x01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.image_hash, Some(hex("0xbb")));
    assert_eq!(
        store.checkpoints().await.unwrap().get(&OMEN_CHAIN_ID),
        Some(&Cursor::new(2, 0))
    );
}

#[tokio::test]
async fn test_chains_are_ordered_independently() {
    let store = EntityStore::in_memory();
    let driver = ReplayDriver::new(store, Arc::new(omen_dispatch_table()), genesis());
    let mut other_chain = thumbnail_update(1, 0, 1, 0xaa);
    other_chain.chain_id = 1;
    let events = vec![thumbnail_update(5, 0, 1, 0xbb), other_chain];

    let report = driver
        .start(&mut VecEventSource::new(events), no_shutdown())
        .await
        .unwrap();
    assert_eq!(report.progress.processed, 1);
    assert_eq!(report.progress.unmatched, 1);
}

fn malformed_update(block: u64) -> Event {
    let mut event = thumbnail_update(block, 0, 1, 0xee);
    event.params.remove("image_hash");
    event
}

#[tokio::test]
async fn test_halt_policy_fails_with_provenance() {
    let store = EntityStore::in_memory();
    let driver = ReplayDriver::new(store.clone(), Arc::new(omen_dispatch_table()), genesis());
    let events = vec![
        thumbnail_update(1, 0, 1, 0xaa),
        malformed_update(2),
        thumbnail_update(3, 0, 1, 0xcc),
    ];

    let err = driver
        .start(&mut VecEventSource::new(events), no_shutdown())
        .await
        .unwrap_err();
    assert_eq!(err.provenance(), Some(Provenance::new(OMEN_CHAIN_ID, 2, 0)));
    assert!(matches!(err, ReplayError::Handler { .. }));
    assert_eq!(driver.state(), ReplayState::Failed);
    assert_eq!(driver.progress().processed, 1);

    let mapping: ThumbnailMapping = store
        .load(&EntityKey::from("0x01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.image_hash, Some(hex("0xaa")));
    assert_eq!(
        store.checkpoints().await.unwrap().get(&OMEN_CHAIN_ID),
        Some(&Cursor::new(1, 0))
    );
}

#[tokio::test]
async fn test_skip_policy_audits_and_continues() {
    let store = EntityStore::in_memory();
    let audit = Arc::new(MemoryAudit::new());
    let options = ReplayOptions {
        failure_policy: FailurePolicy::Skip,
        ..genesis()
    };
    let driver = ReplayDriver::new(store.clone(), Arc::new(omen_dispatch_table()), options)
        .with_audit(audit.clone());
    let events = vec![
        thumbnail_update(1, 0, 1, 0xaa),
        malformed_update(2),
        thumbnail_update(3, 0, 1, 0xcc),
    ];

    let report = driver
        .start(&mut VecEventSource::new(events), no_shutdown())
        .await
        .unwrap();
    assert_eq!(report.state(), ReplayState::Drained);
    assert_eq!(report.progress.processed, 2);
    assert_eq!(report.progress.skipped, 1);

    let skipped = audit.records().await;
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].provenance, Provenance::new(OMEN_CHAIN_ID, 2, 0));
    assert_eq!(skipped[0].signature, IMAGE_UPDATED_SIGNATURE);

    let mapping: ThumbnailMapping = store
        .load(&EntityKey::from("0x01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.image_hash, Some(hex("0xcc")));
}

/// Saves a mapping without its required image hash.
struct IncompleteMappingHandler;

#[async_trait]
impl Handler for IncompleteMappingHandler {
    fn name(&self) -> &'static str {
        "IncompleteMapping"
    }

    async fn handle(
        &self,
        _event: &Event,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let mapping = ThumbnailMapping::new(hex("0x01"));
        Ok(HandlerOutcome::Saved(ctx.save(&mapping).await?))
    }
}

#[tokio::test]
async fn test_schema_violation_names_entity() {
    let mut table = DispatchTable::new();
    table
        .register(
            OMEN_CHAIN_ID,
            hex(THUMBNAIL_CONTRACT),
            IMAGE_UPDATED_SIGNATURE,
            Arc::new(IncompleteMappingHandler),
        )
        .unwrap();
    let store = EntityStore::in_memory();
    let driver = ReplayDriver::new(store.clone(), Arc::new(table), genesis());

    let err = driver
        .start(
            &mut VecEventSource::new(vec![thumbnail_update(7, 3, 1, 0xaa)]),
            no_shutdown(),
        )
        .await
        .unwrap_err();
    let ReplayError::Handler {
        provenance,
        entity,
        source,
    } = &err
    else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(*provenance, Provenance::new(OMEN_CHAIN_ID, 7, 3));
    assert_eq!(
        entity,
        &Some((EntityType::ThumbnailMapping, EntityKey::from("0x01")))
    );
    assert!(matches!(
        source,
        HandlerError::Store(StoreError::Schema(SchemaError::MissingField {
            field: "image_hash",
            ..
        }))
    ));
    assert!(err.to_string().contains("ThumbnailMapping 0x01"));
    assert_eq!(
        store
            .entity_count(EntityType::ThumbnailMapping)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_resume_skips_already_indexed_events() {
    let store = EntityStore::in_memory();
    let events: Vec<Event> = (1..=5).map(|block| thumbnail_update(block, 0, 1, block as u8)).collect();

    let first = ReplayDriver::new(store.clone(), Arc::new(omen_dispatch_table()), genesis());
    first
        .start(&mut VecEventSource::new(events[..3].to_vec()), no_shutdown())
        .await
        .unwrap();

    let resumed = ReplayDriver::new(
        store.clone(),
        Arc::new(omen_dispatch_table()),
        ReplayOptions::default(),
    );
    let report = resumed
        .start(&mut VecEventSource::new(events), no_shutdown())
        .await
        .unwrap();
    assert_eq!(report.progress.already_indexed, 3);
    assert_eq!(report.progress.processed, 2);
    assert_eq!(
        report.checkpoints.get(&OMEN_CHAIN_ID),
        Some(&Cursor::new(5, 0))
    );

    let mapping: ThumbnailMapping = store
        .load(&EntityKey::from("0x01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.image_hash, Some([5].into()));
}

#[tokio::test]
async fn test_explicit_resume_cursor() {
    let store = EntityStore::in_memory();
    let options = ReplayOptions {
        resume: ResumeFrom::Cursors(BTreeMap::from([(OMEN_CHAIN_ID, Cursor::new(2, 0))])),
        ..ReplayOptions::default()
    };
    let driver = ReplayDriver::new(store, Arc::new(omen_dispatch_table()), options);
    let events: Vec<Event> = (1..=4).map(|block| thumbnail_update(block, 0, 1, 0xaa)).collect();
    let report = driver
        .start(&mut VecEventSource::new(events), no_shutdown())
        .await
        .unwrap();
    assert_eq!(report.progress.already_indexed, 2);
    assert_eq!(report.progress.processed, 2);
}

#[tokio::test]
async fn test_shutdown_cancels_between_events() {
    let store = EntityStore::in_memory();
    let driver = Arc::new(ReplayDriver::new(
        store,
        Arc::new(omen_dispatch_table()),
        genesis(),
    ));
    let (event_tx, mut source) = event_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut progress = driver.subscribe();

    let task = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.start(&mut source, shutdown_rx).await })
    };

    event_tx.send(thumbnail_update(1, 0, 1, 0xaa)).await.unwrap();
    progress
        .wait_for(|progress| progress.processed == 1)
        .await
        .unwrap();
    shutdown_tx.send(true).unwrap();

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.state(), ReplayState::Cancelled);
    assert_eq!(report.progress.processed, 1);
    assert_eq!(
        report.checkpoints.get(&OMEN_CHAIN_ID),
        Some(&Cursor::new(1, 0))
    );
    drop(event_tx);
}

#[tokio::test]
async fn test_json_lines_file_replay() {
    let path = std::env::temp_dir().join(format!("omidx-events-{}.jsonl", std::process::id()));
    let events = [thumbnail_update(1, 0, 1, 0xaa), thumbnail_update(2, 0, 1, 0xbb)];
    let mut body = String::new();
    for event in &events {
        body.push_str(&serde_json::to_string(event).unwrap());
        body.push('\n');
    }
    tokio::fs::write(&path, body).await.unwrap();

    let store = EntityStore::in_memory();
    let driver = ReplayDriver::new(store.clone(), Arc::new(omen_dispatch_table()), genesis());
    let mut source = JsonLinesSource::open(&path).await.unwrap();
    let report = driver.start(&mut source, no_shutdown()).await.unwrap();
    assert_eq!(report.progress.processed, 2);

    let mapping: ThumbnailMapping = store
        .load(&EntityKey::from("0x01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.image_hash, Some(hex("0xbb")));
    tokio::fs::remove_file(&path).await.unwrap();
}
