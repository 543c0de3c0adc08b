//! End-to-end scenarios for the engine: ingest, retraction, resolution and
//! restart.
//!
//! Each test drives a `RecallEngine` through a `MemoryHost` and checks both
//! the notice text and what reached the persistence gateway.

use std::time::Duration;

use recall_core::clock::ManualClock;
use recall_core::engine::{EngineOptions, RecallEngine};
use recall_core::event::LifecycleEvent;
use recall_core::gateway::Gateway;
use recall_core::gateway::memory::MemoryBlobStore;
use recall_core::gateway::sqlite::SqliteBlobStore;
use recall_core::host::MemoryHost;
use recall_core::model::{Attachment, HostMessage, MessageRecord, TOMBSTONE_STATUS};
use recall_core::resolver::MessageRef;
use recall_core::store::MessageMap;
use recall_core::sync::{DEFAULT_CALLER_ID, StorageHandle, SyncOptions};

const NOW: i64 = 1_708_012_200_000;
const LOCK_TIMEOUT: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage_for(backing: &MemoryBlobStore) -> StorageHandle {
    StorageHandle::spawn(
        Gateway::new(DEFAULT_CALLER_ID, backing.clone()),
        SyncOptions::default(),
    )
    .expect("spawn storage worker")
}

fn start(host: MemoryHost, backing: &MemoryBlobStore) -> RecallEngine<MemoryHost, ManualClock> {
    RecallEngine::start(
        host,
        ManualClock::new(NOW),
        storage_for(backing),
        EngineOptions::default(),
    )
    .expect("start engine")
}

/// Deliver `message` as new, then flip it to tombstoned in the host and
/// deliver the update.
fn deliver_and_retract(engine: &mut RecallEngine<MemoryHost, ManualClock>, message: &HostMessage) {
    engine.host_mut().upsert_message(message.clone());
    assert!(engine.on_new_message(&message.thread_id, message));
    engine
        .host_mut()
        .set_status(&message.message_id, Some(TOMBSTONE_STATUS.to_string()));
    assert!(engine.on_updated_message(&message.thread_id, &message.message_id, Some("unsend")));
}

fn attachment_only(id: &str, author: &str) -> HostMessage {
    HostMessage::text(id, "t1", author, "", NOW).with_attachment(Attachment::with_url("https://x/y"))
}

fn persisted_retained(backing: &MemoryBlobStore) -> MessageMap {
    let blob = backing.state().retained.expect("retained blob written");
    serde_json::from_str(&blob).expect("retained blob is valid JSON")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn self_retraction_reads_you_removed() {
    let backing = MemoryBlobStore::new();
    let mut engine = start(MemoryHost::new("U1"), &backing);
    let message = HostMessage::text("m1", "t1", "U1", "hello", NOW);

    deliver_and_retract(&mut engine, &message);

    let notice = engine.removed_content(&MessageRef::new("m1", "t1", "U1"));
    assert_eq!(notice.as_deref(), Some("You removed a message: hello"));

    engine.flush();
    let retained = persisted_retained(&backing);
    assert_eq!(retained.get("m1"), Some(&MessageRecord::reduce(&message)));
}

#[test]
fn attachment_only_removal_uses_thread_nickname() {
    let backing = MemoryBlobStore::new();
    let mut host = MemoryHost::new("U1");
    host.set_nickname("t1", "U2", "Bob");
    let mut engine = start(host, &backing);

    deliver_and_retract(&mut engine, &attachment_only("m2", "U2"));

    let notice = engine.removed_content(&MessageRef::new("m2", "t1", "U2"));
    assert_eq!(notice.as_deref(), Some("Bob removed a message: https://x/y"));
}

#[test]
fn unknown_thread_metadata_reads_a_contact() {
    let backing = MemoryBlobStore::new();
    let mut engine = start(MemoryHost::new("U1"), &backing);

    deliver_and_retract(&mut engine, &attachment_only("m2", "U2"));

    let notice = engine.removed_content(&MessageRef::new("m2", "t1", "U2"));
    assert_eq!(notice.as_deref(), Some("A contact removed a message: https://x/y"));
}

#[test]
fn lookup_promotes_message_that_never_saw_an_update() {
    let backing = MemoryBlobStore::new();
    let mut host = MemoryHost::new("U1");
    host.set_participant("fbid:U3", "Carol");
    host.set_thread("t9", recall_core::host::ThreadMetadata::default());
    let mut engine = start(host, &backing);

    let message = HostMessage::text("m3", "t9", "fbid:U3", "see you", NOW);
    engine.on_new_message("t9", &message);
    assert!(engine.store().contains_active("m3"));

    let notice = engine.removed_content(&MessageRef::new("m3", "t9", "fbid:U3"));
    assert_eq!(notice.as_deref(), Some("Carol removed a message: see you"));
    assert!(!engine.store().contains_active("m3"));
    assert!(engine.store().lookup_retained("m3").is_some());

    engine.flush();
    let state = backing.state();
    let active: MessageMap =
        serde_json::from_str(state.active.as_deref().expect("active blob")).expect("json");
    assert!(active.is_empty());
    assert!(persisted_retained(&backing).contains_key("m3"));
}

#[test]
fn retracted_message_stays_resolvable() {
    let backing = MemoryBlobStore::new();
    let mut engine = start(MemoryHost::new("U1"), &backing);
    let message = HostMessage::text("m1", "t1", "U2", "first", NOW);
    deliver_and_retract(&mut engine, &message);

    // Replays, further updates and purges must not touch the retained copy.
    let mut replay = message.clone();
    replay.body = "rewritten".into();
    assert!(!engine.on_new_message("t1", &replay));
    assert!(!engine.on_updated_message("t1", "m1", None));
    engine.run_purge();

    let record = engine.store().lookup_retained("m1").expect("still retained");
    assert_eq!(record.body, "first");
    assert_eq!(
        engine.removed_content(&MessageRef::new("m1", "t1", "U2")).as_deref(),
        Some("A contact removed a message: first")
    );
}

#[test]
fn dispatch_routes_tagged_events() {
    let backing = MemoryBlobStore::new();
    let mut engine = start(MemoryHost::new("U1"), &backing);
    let message = HostMessage::text("m1", "t1", "U2", "hi", NOW);

    let events: Vec<LifecycleEvent> = serde_json::from_str(
        r#"[
            {"event":"new_message","thread_id":"t1","message":{"message_id":"m1","thread_id":"t1","author":"U2","body":"hi","timestamp":1708012200000}},
            {"event":"updated_message","thread_id":"t1","message_id":"m1"}
        ]"#,
    )
    .expect("parse events");

    engine.host_mut().upsert_message(message);
    assert!(engine.dispatch(&events[0]));
    engine
        .host_mut()
        .set_status("m1", Some(TOMBSTONE_STATUS.to_string()));
    assert!(engine.dispatch(&events[1]));
    assert!(engine.store().lookup_retained("m1").is_some());
}

#[test]
fn every_mutation_fires_its_own_write() {
    let backing = MemoryBlobStore::new();
    let mut engine = start(MemoryHost::new("U1"), &backing);
    engine.flush();
    let after_start = backing.write_count();

    engine.on_new_message("t1", &HostMessage::text("a", "t1", "U2", "1", NOW));
    engine.on_new_message("t1", &HostMessage::text("b", "t1", "U2", "2", NOW));
    engine.flush();
    assert_eq!(backing.write_count(), after_start + 2);

    engine.removed_content(&MessageRef::new("a", "t1", "U2"));
    engine.flush();
    // One write each for the active and retained snapshots.
    assert_eq!(backing.write_count(), after_start + 4);
}

#[test]
fn sqlite_store_survives_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("store.sqlite3");
    let message = HostMessage::text("m1", "t1", "U2", "persist me", NOW);

    {
        let store = SqliteBlobStore::open(&path, LOCK_TIMEOUT).expect("open store");
        let storage = StorageHandle::spawn(Gateway::new(DEFAULT_CALLER_ID, store), SyncOptions::default())
            .expect("spawn storage worker");
        let mut engine = RecallEngine::start(
            MemoryHost::new("U1"),
            ManualClock::new(NOW),
            storage,
            EngineOptions::default(),
        )
        .expect("start engine");
        deliver_and_retract(&mut engine, &message);
        engine.on_new_message("t1", &HostMessage::text("m2", "t1", "U2", "pending", NOW));
        let (_, stats) = engine.shutdown();
        assert_eq!(stats.writes_failed, 0);
    }

    let store = SqliteBlobStore::open(&path, LOCK_TIMEOUT).expect("reopen store");
    let storage = StorageHandle::spawn(Gateway::new(DEFAULT_CALLER_ID, store), SyncOptions::default())
        .expect("spawn storage worker");
    let mut engine = RecallEngine::start(
        MemoryHost::new("U1"),
        ManualClock::new(NOW + 1_000),
        storage,
        EngineOptions::default(),
    )
    .expect("restart engine");

    assert!(engine.startup().loaded);
    assert_eq!(engine.store().last_purge_time(), Some(NOW));
    assert!(engine.store().contains_active("m2"));
    assert_eq!(
        engine.removed_content(&MessageRef::new("m1", "t1", "U2")).as_deref(),
        Some("A contact removed a message: persist me")
    );
}
