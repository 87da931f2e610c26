//! Record store - the authoritative reconciled state.
//!
//! The store only ever changes through [`RecordStore::apply_batch`], which is
//! fed by the change ingestor. Local optimistic state lives in the mutation log
//! and is layered on top when a snapshot is built.

use crate::{Batch, ChangeOp, Record, RecordId};
use std::collections::BTreeMap;

/// What a batch did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Records inserted, including updates promoted to inserts
    pub inserted: usize,
    /// Records updated in place
    pub updated: usize,
    /// Records removed
    pub deleted: usize,
    /// Deletes for ids the store did not hold
    pub ignored: usize,
    /// Records dropped by a truncating batch before its operations ran
    pub cleared: usize,
}

impl BatchResult {
    /// Number of records the batch changed.
    pub fn changed(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.cleared
    }
}

/// Keyed map of live records, iterated in id order.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: BTreeMap<RecordId, Record>,
}

impl RecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Apply every operation of a batch, in order.
    ///
    /// Takes `&mut self` for the whole batch, so no reader can observe the
    /// store between two operations of the same batch. A truncating batch
    /// first drops every record.
    pub fn apply_batch(&mut self, batch: &Batch) -> BatchResult {
        let mut result = BatchResult::default();
        if batch.truncate {
            result.cleared = self.records.len();
            self.records.clear();
        }

        for op in &batch.ops {
            match op {
                ChangeOp::Insert(record) => {
                    // A replayed insert replaces the record instead of duplicating it.
                    self.records.insert(record.id, record.clone());
                    result.inserted += 1;
                }
                ChangeOp::Update { id, patch } => match self.records.get_mut(id) {
                    Some(record) => {
                        record.apply_patch(patch);
                        result.updated += 1;
                    }
                    None => {
                        // The remote side is authoritative; we probably missed the insert.
                        self.records
                            .insert(*id, Record::from_patch(*id, patch, batch.committed_at));
                        result.inserted += 1;
                    }
                },
                ChangeOp::Delete { id } => {
                    if self.records.remove(id).is_some() {
                        result.deleted += 1;
                    } else {
                        result.ignored += 1;
                    }
                }
            }
        }

        result
    }

    /// Get a record by id.
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Check if a record exists.
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    /// All records in id order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Copy of the current authoritative state, in id order.
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    /// Count of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn as_map(&self) -> &BTreeMap<RecordId, Record> {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordPatch;

    fn insert(id: RecordId, text: &str) -> ChangeOp {
        ChangeOp::Insert(Record::new(id, text, 1000))
    }

    #[test]
    fn apply_inserts() {
        let mut store = RecordStore::new();
        let result = store.apply_batch(&Batch::new(vec![insert(1, "a"), insert(2, "b")], 1000));

        assert_eq!(result.inserted, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap().text, "a");
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let mut store = RecordStore::new();
        store.apply_batch(&Batch::new(
            vec![insert(30, "c"), insert(10, "a"), insert(20, "b")],
            1000,
        ));

        let ids: Vec<_> = store.snapshot().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn replayed_insert_does_not_duplicate() {
        let mut store = RecordStore::new();
        let batch = Batch::new(vec![insert(1, "a")], 1000);
        store.apply_batch(&batch);
        store.apply_batch(&batch);

        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_existing() {
        let mut store = RecordStore::new();
        store.apply_batch(&Batch::new(vec![insert(1, "a")], 1000));

        let update = ChangeOp::Update {
            id: 1,
            patch: RecordPatch {
                completed: Some(true),
                updated_at: Some(2000),
                ..Default::default()
            },
        };
        let result = store.apply_batch(&Batch::new(vec![update.clone()], 2000));
        assert_eq!(result.updated, 1);

        let before = store.get(1).cloned();
        store.apply_batch(&Batch::new(vec![update], 3000));
        assert_eq!(store.get(1).cloned(), before);

        let record = store.get(1).unwrap();
        assert!(record.completed);
        assert_eq!(record.text, "a");
        assert_eq!(record.updated_at, 2000);
    }

    #[test]
    fn update_unknown_id_is_promoted_to_insert() {
        let mut store = RecordStore::new();
        let update = ChangeOp::Update {
            id: 8,
            patch: RecordPatch {
                text: Some("recovered".into()),
                ..Default::default()
            },
        };
        let result = store.apply_batch(&Batch::new(vec![update], 5000));

        assert_eq!(result.inserted, 1);
        let record = store.get(8).unwrap();
        assert_eq!(record.text, "recovered");
        assert!(!record.completed);
        assert_eq!(record.created_at, 5000);
    }

    #[test]
    fn delete_unknown_id_is_noop() {
        let mut store = RecordStore::new();
        store.apply_batch(&Batch::new(vec![insert(1, "a")], 1000));

        let result = store.apply_batch(&Batch::new(vec![ChangeOp::Delete { id: 99 }], 2000));
        assert_eq!(result.ignored, 1);
        assert_eq!(result.changed(), 0);
        assert_eq!(store.snapshot(), vec![Record::new(1, "a", 1000)]);
    }

    #[test]
    fn truncating_batch_replaces_contents() {
        let mut store = RecordStore::new();
        store.apply_batch(&Batch::new(vec![insert(1, "a"), insert(2, "b")], 1000));

        let result = store.apply_batch(&Batch::refetched(vec![insert(2, "b2")], 2000));

        assert_eq!(result.cleared, 2);
        assert_eq!(result.inserted, 1);
        assert!(!store.contains(1));
        assert_eq!(store.get(2).unwrap().text, "b2");
    }

    #[test]
    fn ops_apply_in_batch_order() {
        let mut store = RecordStore::new();
        let batch = Batch::new(
            vec![insert(1, "a"), ChangeOp::Delete { id: 1 }, insert(2, "b")],
            1000,
        );
        store.apply_batch(&batch);

        assert!(!store.contains(1));
        assert!(store.contains(2));
    }
}
