//! Edge case tests for tidy-engine
//!
//! These tests cover boundary conditions, unusual inputs and the ordering
//! guarantees between remote batches and local mutations.

use proptest::prelude::*;
use serde_json::{json, Value};
use tidy_engine::{Collection, Error, Frame, IngestOutcome, MutationStatus, Record};

fn commit(collection: &mut Collection, frames: Vec<Frame>, now: u64) {
    for frame in frames {
        collection.ingest(frame, now);
    }
    collection.ingest(Frame::up_to_date(), now);
}

fn seeded(records: &[(i64, &str)]) -> Collection {
    let mut collection = Collection::new();
    let frames = records
        .iter()
        .map(|(id, text)| Frame::insert(json!({"id": id, "text": text, "created_at": 1000})))
        .collect();
    commit(&mut collection, frames, 1000);
    collection
}

// ============================================================================
// Inbound Payload Edge Cases
// ============================================================================

#[test]
fn unicode_and_empty_text() {
    let mut collection = Collection::new();
    let texts = ["", "日本語テスト", "🎉🚀", "Hello\nWorld\tTab", "Null\0Test"];

    let frames = texts
        .iter()
        .enumerate()
        .map(|(i, text)| Frame::insert(json!({"id": i, "text": text})))
        .collect();
    commit(&mut collection, frames, 0);

    let snapshot = collection.snapshot();
    for (i, text) in texts.iter().enumerate() {
        assert_eq!(snapshot.get(i as i64).unwrap().text, *text);
    }
}

#[test]
fn id_boundaries() {
    let mut collection = Collection::new();
    commit(
        &mut collection,
        vec![
            Frame::insert(json!({"id": i64::MAX})),
            Frame::insert(json!({"id": i64::MIN.to_string()})),
            Frame::insert(json!({"id": 0})),
        ],
        0,
    );

    let snapshot = collection.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert!(snapshot.contains(i64::MAX));
    assert!(snapshot.contains(i64::MIN));
}

#[test]
fn non_object_values_are_skipped() {
    let mut collection = Collection::new();
    for value in [Value::Null, json!(42), json!("id"), json!([1, 2]), json!({"id": true})] {
        let outcome = collection.ingest(Frame::insert(value), 0);
        assert!(matches!(outcome, IngestOutcome::Skipped(_)), "{outcome:?}");
    }
    collection.ingest(Frame::insert(json!({"id": 1})), 0);
    collection.ingest(Frame::up_to_date(), 0);

    assert_eq!(collection.snapshot().len(), 1);
    assert_eq!(collection.ingestor().skipped(), 5);
}

#[test]
fn fractional_id_is_rejected() {
    let mut collection = Collection::new();
    let outcome = collection.ingest(Frame::insert(json!({"id": 1.5})), 0);
    assert_eq!(outcome, IngestOutcome::Skipped(Error::InvalidId("1.5".into())));
}

#[test]
fn wire_batch_from_json() {
    let body = r#"[
        {"headers": {"operation": "insert"}, "value": {"id": "1", "text": "a", "completed": "false"}},
        {"headers": {"operation": "insert"}, "value": {"id": "2", "text": "b", "completed": "true"}},
        {"headers": {"operation": "delete"}, "value": {"id": "1"}},
        {"headers": {"control": "up-to-date"}}
    ]"#;
    let frames: Vec<Frame> = serde_json::from_str(body).unwrap();

    let mut collection = Collection::new();
    for frame in frames {
        collection.ingest(frame, 0);
    }

    let snapshot = collection.snapshot();
    assert!(snapshot.ready);
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.get(2).unwrap().completed);
}

// ============================================================================
// Remote vs Local Ordering
// ============================================================================

#[test]
fn remote_update_under_pending_update() {
    let mut collection = seeded(&[(1, "a")]);
    collection
        .update(1, |r| r.text = "local".into(), 2000)
        .unwrap();

    // Another device changes a different field.
    commit(
        &mut collection,
        vec![Frame::update(json!({"id": 1, "completed": true}))],
        2500,
    );

    // The remote update resolved our pending update by (id, kind).
    let snapshot = collection.snapshot();
    assert_eq!(snapshot.pending, 0);
    assert!(snapshot.get(1).unwrap().completed);
}

#[test]
fn remote_delete_under_pending_update_hides_record() {
    let mut collection = seeded(&[(1, "a")]);
    collection.toggle(1, 2000).unwrap();

    commit(&mut collection, vec![Frame::delete(json!({"id": 1}))], 2500);

    let snapshot = collection.snapshot();
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.pending, 1);
}

#[test]
fn rapid_toggles_same_record() {
    let mut collection = seeded(&[(1, "a")]);
    let mut ids = Vec::new();
    for i in 0..101u64 {
        ids.push(collection.toggle(1, 2000 + i).unwrap().id);
    }

    assert!(collection.get(1).unwrap().completed);
    assert_eq!(collection.log().len(), 101);

    // Rolling back the last toggle reveals the previous one.
    collection.rollback(*ids.last().unwrap());
    assert!(!collection.get(1).unwrap().completed);
}

#[test]
fn repeated_echo_does_not_duplicate() {
    let mut collection = Collection::new();
    collection.insert(10, "buy milk", 0).unwrap();

    let echo = || Frame::insert(json!({"id": 10, "text": "buy milk", "created_at": 0}));
    commit(&mut collection, vec![echo()], 1);
    commit(&mut collection, vec![echo()], 2);
    commit(&mut collection, vec![echo(), echo()], 3);

    let snapshot = collection.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.pending, 0);
}

#[test]
fn insert_delete_roundtrip_before_confirmation() {
    let mut collection = seeded(&[(1, "a")]);
    let before = collection.snapshot().records;

    collection.insert(2, "temp", 2000).unwrap();
    collection.delete(2, 2001).unwrap();

    assert_eq!(collection.snapshot().records, before);

    // Both echoes arrive in one batch and both entries resolve.
    collection.ingest(Frame::insert(json!({"id": 2, "text": "temp"})), 3000);
    collection.ingest(Frame::delete(json!({"id": 2})), 3000);
    let IngestOutcome::Committed(summary) = collection.ingest(Frame::up_to_date(), 3000) else {
        panic!("expected commit");
    };
    assert_eq!(summary.resolved.len(), 2);
    assert!(summary
        .resolved
        .iter()
        .all(|e| e.status == MutationStatus::Confirmed));
    assert_eq!(collection.snapshot().records, before);
}

#[test]
fn failed_insert_rolls_back_to_absent() {
    let mut collection = seeded(&[(1, "a")]);
    let entry = collection.insert(2, "b", 2000).unwrap();
    collection.toggle(2, 2001).unwrap();

    let removed = collection.rollback(entry.id);
    assert_eq!(removed.len(), 2);
    assert!(collection.get(2).is_none());
    assert_eq!(
        collection.snapshot().records,
        vec![Record {
            id: 1,
            text: "a".into(),
            completed: false,
            created_at: 1000,
            updated_at: 1000,
        }]
    );
}

#[test]
fn many_pending_mutations() {
    let mut collection = Collection::new();
    for id in 0..1000 {
        collection.insert(id, &format!("task {id}"), 0).unwrap();
    }
    assert_eq!(collection.snapshot().len(), 1000);
    assert_eq!(collection.snapshot().pending, 1000);
}

// ============================================================================
// Properties
// ============================================================================

fn arb_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        (0i64..8, "[a-z]{0,6}")
            .prop_map(|(id, text)| Frame::insert(json!({"id": id, "text": text}))),
        (0i64..8, any::<bool>())
            .prop_map(|(id, done)| Frame::update(json!({"id": id, "completed": done}))),
        (0i64..8).prop_map(|id| Frame::delete(json!({"id": id}))),
        Just(Frame::insert(json!({"text": "no id"}))),
    ]
}

proptest! {
    #[test]
    fn prop_batch_is_atomic(
        seed in prop::collection::vec(arb_frame(), 0..10),
        batch in prop::collection::vec(arb_frame(), 1..10),
    ) {
        let mut collection = Collection::new();
        commit(&mut collection, seed, 0);
        let before = collection.snapshot();

        // Nothing of the open batch is visible before its commit marker.
        for frame in batch.clone() {
            collection.ingest(frame, 1);
            prop_assert_eq!(&collection.snapshot(), &before);
        }
        collection.ingest(Frame::up_to_date(), 1);

        // The commit has the same effect as a fresh collection fed everything at once.
        let mut replay = Collection::new();
        commit(&mut replay, frames_for(&before), 0);
        commit(&mut replay, batch, 1);
        prop_assert_eq!(collection.snapshot().records, replay.snapshot().records);
    }

    #[test]
    fn prop_replayed_batch_is_idempotent(batch in prop::collection::vec(arb_frame(), 0..12)) {
        let mut collection = Collection::new();
        commit(&mut collection, batch.clone(), 0);
        let once = collection.snapshot();
        commit(&mut collection, batch, 0);
        prop_assert_eq!(collection.snapshot(), once);
    }
}

/// Frames rebuilding the records of `snapshot`.
fn frames_for(snapshot: &tidy_engine::Snapshot) -> Vec<Frame> {
    snapshot
        .iter()
        .map(|r| {
            Frame::insert(json!({
                "id": r.id,
                "text": r.text,
                "completed": r.completed,
                "created_at": r.created_at,
                "updated_at": r.updated_at,
            }))
        })
        .collect()
}
