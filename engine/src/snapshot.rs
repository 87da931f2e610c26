//! Reconciled snapshot: the value handed to readers.
//!
//! A snapshot is the record store with every pending optimistic mutation
//! replayed on top. It is built in one step from a consistent pair of store
//! and log, so it never reflects half of a batch or half of a resolution.

use crate::{MutationLog, Record, RecordId, RecordStore};
use serde::Serialize;

/// Point-in-time view of the collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Visible records in id order
    pub records: Vec<Record>,
    /// Whether the first catch-up with the remote stream has completed
    pub ready: bool,
    /// Number of local mutations still waiting for confirmation
    pub pending: usize,
}

impl Snapshot {
    /// Overlay `log` on `store`.
    pub fn reconcile(store: &RecordStore, log: &MutationLog, ready: bool) -> Self {
        Self {
            records: log.overlay(store),
            ready,
            pending: log.len(),
        }
    }

    /// Find a visible record.
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records not yet completed.
    pub fn remaining(&self) -> usize {
        self.records.iter().filter(|r| !r.completed).count()
    }
}
