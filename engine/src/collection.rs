//! Reconciled collection - store, mutation log and ingestor behind one owner.
//!
//! Every method takes `&mut self` (or `&self` for reads), so whoever owns the
//! collection serializes batch application, log updates and snapshot builds.
//! The async client wraps it in a single lock.

use crate::{
    error::Result, BatchResult, Error, Frame, IngestStep, Ingestor, MutationId, MutationLog,
    PendingMutation, Record, RecordId, RecordStore, Snapshot, Timestamp, TxId,
};

/// What happened when a frame was fed to the collection.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Message buffered in the open batch
    Buffered,
    /// Malformed message dropped; the batch continues
    Skipped(Error),
    /// Control marker without meaning for the collection
    Ignored(String),
    /// Refetch started; the open batch was discarded
    Restarted { dropped: usize },
    /// Batch applied
    Committed(CommitSummary),
}

/// Effect of one commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSummary {
    /// Operations in the batch
    pub size: usize,
    /// Store changes
    pub result: BatchResult,
    /// Local mutations confirmed by this batch
    pub resolved: Vec<PendingMutation>,
    /// True for the first commit ever seen
    pub became_ready: bool,
}

/// Effect of a remote write acknowledgment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Acknowledgement {
    /// The entry was still pending and now carries the txid
    pub acknowledged: bool,
    /// Entries moved from a temporary id to the server-assigned one
    pub remapped: usize,
    /// The insert was already echoed under the server id and is now resolved
    pub resolved: Option<PendingMutation>,
}

/// The local-first task collection.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    store: RecordStore,
    log: MutationLog,
    ingestor: Ingestor,
    ready: bool,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound frame.
    ///
    /// On a commit the whole batch is applied, every pending entry matching an
    /// operation of the batch is resolved and readiness is latched.
    pub fn ingest(&mut self, frame: Frame, now: Timestamp) -> IngestOutcome {
        match self.ingestor.receive(frame, now) {
            IngestStep::Buffered => IngestOutcome::Buffered,
            IngestStep::Skipped(e) => IngestOutcome::Skipped(e),
            IngestStep::Ignored(marker) => IngestOutcome::Ignored(marker),
            IngestStep::Restarted(dropped) => IngestOutcome::Restarted { dropped },
            IngestStep::Committed(batch) => {
                let result = self.store.apply_batch(&batch);
                let resolved = batch
                    .ops
                    .iter()
                    .filter_map(|op| self.log.resolve(op.id(), op.kind()))
                    .collect();
                let became_ready = !self.ready;
                self.ready = true;

                IngestOutcome::Committed(CommitSummary {
                    size: batch.len(),
                    result,
                    resolved,
                    became_ready,
                })
            }
        }
    }

    /// Forget the open batch after the stream dropped. Readiness is kept.
    pub fn reset_stream(&mut self) -> usize {
        self.ingestor.reset()
    }

    /// Optimistically insert a new task under a client-generated id.
    pub fn insert(&mut self, id: RecordId, text: &str, now: Timestamp) -> Result<PendingMutation> {
        self.log.record_insert(&self.store, id, text, now)
    }

    /// Optimistically update a visible task. `None` if there is nothing to change.
    pub fn update<F>(&mut self, id: RecordId, mutator: F, now: Timestamp) -> Option<PendingMutation>
    where
        F: FnOnce(&mut Record),
    {
        self.log.record_update(&self.store, id, mutator, now)
    }

    /// Flip the completion flag of a visible task.
    pub fn toggle(&mut self, id: RecordId, now: Timestamp) -> Option<PendingMutation> {
        self.update(id, |record| record.completed = !record.completed, now)
    }

    /// Optimistically delete a visible task. `None` if the id is unknown.
    pub fn delete(&mut self, id: RecordId, now: Timestamp) -> Option<PendingMutation> {
        self.log.record_delete(&self.store, id, now)
    }

    /// Record a successful remote write.
    ///
    /// `server_id` is the id the remote system assigned to an inserted record,
    /// when it reports one.
    pub fn acknowledge(
        &mut self,
        mutation: MutationId,
        txid: TxId,
        server_id: Option<RecordId>,
    ) -> Acknowledgement {
        let Some(entry) = self.log.get(mutation).cloned() else {
            return Acknowledgement::default();
        };
        let mut ack = Acknowledgement {
            acknowledged: self.log.acknowledge(mutation, txid),
            ..Default::default()
        };

        if let Some(server_id) = server_id.filter(|id| *id != entry.target_id) {
            ack.remapped = self.log.remap(entry.target_id, server_id);
            // The echo may have overtaken the acknowledgment.
            if self.store.contains(server_id) {
                ack.resolved = self.log.resolve(server_id, entry.kind());
            }
        }
        ack
    }

    /// Roll back a failed remote write; see [`MutationLog::rollback`].
    pub fn rollback(&mut self, mutation: MutationId) -> Vec<PendingMutation> {
        self.log.rollback(mutation)
    }

    /// Current reconciled view.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::reconcile(&self.store, &self.log, self.ready)
    }

    /// Visible record under `id` (temporary ids are followed to their permanent id).
    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.log.visible(&self.store, self.log.resolve_alias(id))
    }

    /// Permanent id for a possibly temporary one.
    pub fn permanent_id(&self, id: RecordId) -> RecordId {
        self.log.resolve_alias(id)
    }

    /// First id the record under `id` was known by. Stable across remaps.
    pub fn origin(&self, id: RecordId) -> RecordId {
        self.log.origin(id)
    }

    /// Whether `id` is already used by the store or the log.
    pub fn is_known_id(&self, id: RecordId) -> bool {
        self.store.contains(id) || self.log.knows(id)
    }

    /// Pending entry by mutation id.
    pub fn pending(&self, mutation: MutationId) -> Option<&PendingMutation> {
        self.log.get(mutation)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn log(&self) -> &MutationLog {
        &self.log
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }
}
