//! Optimistic mutation log.
//!
//! Local mutations become visible the moment they are recorded and stay in the
//! log until the change stream echoes them back (resolution) or the remote
//! write fails (rollback). Entries are kept in issuance order; a later entry on
//! the same record wins for display because the overlay replays them in order.

use crate::{
    error::Result, ChangeKind, Error, Record, RecordId, RecordPatch, RecordStore, Timestamp, TxId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Identifier of a log entry, unique for the lifetime of the log.
pub type MutationId = u64;

/// Lifecycle state of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    /// Visible locally, not yet echoed by the remote system
    Pending,
    /// Echoed by the change stream; its effect now lives in the store
    Confirmed,
    /// The remote write failed and the entry was rolled back
    Failed,
}

/// What a mutation changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MutationPayload {
    /// Full record
    Insert { record: Record },
    /// Changed fields, including the local `updated_at` stamp
    Update { patch: RecordPatch },
    Delete,
}

/// One entry of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: MutationId,
    pub target_id: RecordId,
    pub payload: MutationPayload,
    pub status: MutationStatus,
    /// Transaction token returned by the remote write, kept for diagnostics
    pub txid: Option<TxId>,
    pub issued_at: Timestamp,
}

impl PendingMutation {
    pub fn kind(&self) -> ChangeKind {
        match self.payload {
            MutationPayload::Insert { .. } => ChangeKind::Insert,
            MutationPayload::Update { .. } => ChangeKind::Update,
            MutationPayload::Delete => ChangeKind::Delete,
        }
    }

    /// Fields to transmit for an update. Server-owned fields are left out.
    pub fn outbound_patch(&self) -> Option<RecordPatch> {
        match &self.payload {
            MutationPayload::Update { patch } => Some(patch.without_server_fields()),
            _ => None,
        }
    }

    fn apply_to(&self, records: &mut BTreeMap<RecordId, Record>) {
        match &self.payload {
            MutationPayload::Insert { record } => {
                records.insert(record.id, record.clone());
            }
            MutationPayload::Update { patch } => {
                if let Some(record) = records.get_mut(&self.target_id) {
                    record.apply_patch(patch);
                }
            }
            MutationPayload::Delete => {
                records.remove(&self.target_id);
            }
        }
    }
}

/// In-flight local mutations, in issuance order.
#[derive(Debug, Clone, Default)]
pub struct MutationLog {
    entries: Vec<PendingMutation>,
    next_id: MutationId,
    /// Client-temporary id -> id assigned by the remote system
    aliases: HashMap<RecordId, RecordId>,
    /// Id assigned by the remote system -> client-temporary id
    origins: HashMap<RecordId, RecordId>,
}

impl MutationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new task under a client-generated id.
    pub fn record_insert(
        &mut self,
        store: &RecordStore,
        id: RecordId,
        text: &str,
        now: Timestamp,
    ) -> Result<PendingMutation> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyText);
        }
        if self.visible(store, id).is_some() {
            return Err(Error::RecordAlreadyExists(id));
        }

        let record = Record::new(id, text, now);
        Ok(self.push(id, MutationPayload::Insert { record }, now))
    }

    /// Apply `mutator` to a working copy of the visible record.
    ///
    /// Returns `None` when nothing is visible under `id` or the mutator left
    /// every client-owned field unchanged. `id` and `created_at` are restored
    /// after the mutator runs and `updated_at` is stamped with `now`.
    pub fn record_update<F>(
        &mut self,
        store: &RecordStore,
        id: RecordId,
        mutator: F,
        now: Timestamp,
    ) -> Option<PendingMutation>
    where
        F: FnOnce(&mut Record),
    {
        let id = self.resolve_alias(id);
        let base = self.visible(store, id)?;

        let mut working = base.clone();
        mutator(&mut working);
        working.id = base.id;
        working.created_at = base.created_at;
        working.updated_at = now.max(base.created_at);

        let patch = RecordPatch::diff(&base, &working);
        if patch.without_server_fields().is_empty() {
            return None;
        }
        Some(self.push(id, MutationPayload::Update { patch }, now))
    }

    /// Hide a record until the delete is confirmed or rolled back.
    ///
    /// Returns `None` if nothing is visible under `id`.
    pub fn record_delete(
        &mut self,
        store: &RecordStore,
        id: RecordId,
        now: Timestamp,
    ) -> Option<PendingMutation> {
        let id = self.resolve_alias(id);
        self.visible(store, id)?;
        Some(self.push(id, MutationPayload::Delete, now))
    }

    fn push(
        &mut self,
        target_id: RecordId,
        payload: MutationPayload,
        now: Timestamp,
    ) -> PendingMutation {
        self.next_id += 1;
        let entry = PendingMutation {
            id: self.next_id,
            target_id,
            payload,
            status: MutationStatus::Pending,
            txid: None,
            issued_at: now,
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Remove the oldest pending entry matching a confirmed remote change.
    pub fn resolve(&mut self, id: RecordId, kind: ChangeKind) -> Option<PendingMutation> {
        let index = self
            .entries
            .iter()
            .position(|e| e.target_id == id && e.kind() == kind)?;
        let mut entry = self.entries.remove(index);
        entry.status = MutationStatus::Confirmed;
        Some(entry)
    }

    /// Remove a failed entry. The record falls back to its store value.
    ///
    /// Rolling back an insert also rolls back every later entry on the same
    /// record, since they were built on top of it.
    pub fn rollback(&mut self, mutation: MutationId) -> Vec<PendingMutation> {
        let Some(index) = self.entries.iter().position(|e| e.id == mutation) else {
            return Vec::new();
        };
        let failed = self.entries.remove(index);
        let target = failed.target_id;
        let cascade = failed.kind() == ChangeKind::Insert;

        let mut removed = vec![failed];
        if cascade {
            let mut i = index;
            while i < self.entries.len() {
                if self.entries[i].target_id == target {
                    removed.push(self.entries.remove(i));
                } else {
                    i += 1;
                }
            }
        }

        for entry in &mut removed {
            entry.status = MutationStatus::Failed;
        }
        removed
    }

    /// Store the transaction token of an acknowledged write.
    pub fn acknowledge(&mut self, mutation: MutationId, txid: TxId) -> bool {
        match self.entries.iter_mut().find(|e| e.id == mutation) {
            Some(entry) => {
                entry.txid = Some(txid);
                true
            }
            None => false,
        }
    }

    /// Move every entry targeting the temporary id `from` to the permanent id `to`.
    ///
    /// Returns how many entries were moved.
    pub fn remap(&mut self, from: RecordId, to: RecordId) -> usize {
        if from == to {
            return 0;
        }
        self.aliases.insert(from, to);
        self.origins.entry(to).or_insert(from);

        let mut moved = 0;
        for entry in self.entries.iter_mut().filter(|e| e.target_id == from) {
            entry.target_id = to;
            if let MutationPayload::Insert { record } = &mut entry.payload {
                record.id = to;
            }
            moved += 1;
        }
        moved
    }

    /// Permanent id for a possibly temporary one.
    pub fn resolve_alias(&self, id: RecordId) -> RecordId {
        self.aliases.get(&id).copied().unwrap_or(id)
    }

    /// First id a record was known under, before any remap.
    pub fn origin(&self, id: RecordId) -> RecordId {
        let mut id = self.resolve_alias(id);
        // Each hop strictly moves to an earlier id; the bound guards a cycle.
        for _ in 0..=self.origins.len() {
            match self.origins.get(&id) {
                Some(&earlier) if earlier != id => id = earlier,
                _ => break,
            }
        }
        id
    }

    /// Whether the log knows `id` as a target or an alias.
    pub fn knows(&self, id: RecordId) -> bool {
        self.aliases.contains_key(&id) || self.entries.iter().any(|e| e.target_id == id)
    }

    /// Record under `id` as a reader would currently see it.
    pub fn visible(&self, store: &RecordStore, id: RecordId) -> Option<Record> {
        let mut records = BTreeMap::new();
        if let Some(record) = store.get(id) {
            records.insert(id, record.clone());
        }
        for entry in self.entries.iter().filter(|e| e.target_id == id) {
            entry.apply_to(&mut records);
        }
        records.remove(&id)
    }

    /// Store state with every pending entry replayed on top, in id order.
    pub fn overlay(&self, store: &RecordStore) -> Vec<Record> {
        if self.entries.is_empty() {
            return store.snapshot();
        }
        let mut records = store.as_map().clone();
        for entry in &self.entries {
            entry.apply_to(&mut records);
        }
        records.into_values().collect()
    }

    pub fn get(&self, mutation: MutationId) -> Option<&PendingMutation> {
        self.entries.iter().find(|e| e.id == mutation)
    }

    /// Pending entries in issuance order.
    pub fn entries(&self) -> &[PendingMutation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
