//! Shared collection state.
//!
//! A single mutex guards the collection and the outcome waiters. Every state
//! change goes through [`Shared::mutate`], which also republishes the
//! reconciled snapshot before releasing the lock, so readers only ever see
//! snapshots taken between two complete state changes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tidy_engine::{
    ChangeKind, Collection, Frame, IngestOutcome, MutationId, MutationPayload, PendingMutation,
    Snapshot, Timestamp,
};
use tokio::sync::{broadcast, oneshot, watch};

use crate::error::{ClientError, Result};
use crate::events::{MutationOutcome, SyncEvent};
use crate::transport::WriteAck;

const EVENT_CAPACITY: usize = 256;

pub(crate) struct Inner {
    pub collection: Collection,
    pub waiters: HashMap<MutationId, oneshot::Sender<MutationOutcome>>,
    /// Queued mutations rolled back along with an earlier failed write
    cancelled: HashSet<MutationId>,
    stopped: bool,
}

impl Inner {
    fn settle(&mut self, entry: &PendingMutation, outcome: MutationOutcome) {
        if let Some(waiter) = self.waiters.remove(&entry.id) {
            // The caller may have dropped its handle.
            let _ = waiter.send(outcome);
        }
    }
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    snapshot: watch::Sender<Arc<Snapshot>>,
    events: broadcast::Sender<SyncEvent>,
}

impl Shared {
    pub fn new() -> Arc<Self> {
        let (snapshot, _) = watch::channel(Arc::new(Snapshot::default()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                collection: Collection::new(),
                waiters: HashMap::new(),
                cancelled: HashSet::new(),
                stopped: false,
            }),
            snapshot,
            events,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the state and publish the resulting snapshot.
    ///
    /// Fails with [`ClientError::Stopped`] once the coordinator is torn down.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> Result<R> {
        let mut inner = self.lock();
        if inner.stopped {
            return Err(ClientError::Stopped);
        }
        let result = f(&mut *inner);

        let next = inner.collection.snapshot();
        self.snapshot.send_if_modified(|current| {
            if **current == next {
                false
            } else {
                *current = Arc::new(next);
                true
            }
        });
        Ok(result)
    }

    /// Mark the state as final. Pending waiters see [`ClientError::Stopped`].
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.stopped = true;
        inner.waiters.clear();
        inner.cancelled.clear();
    }

    /// The write to send for a queued mutation, as it stands now.
    ///
    /// A mutation the stream resolved before its turn is still sent, with the
    /// payload it was queued with. `None` if it was rolled back meanwhile.
    pub fn due(&self, queued: &PendingMutation) -> Result<Option<PendingMutation>> {
        let mut inner = self.lock();
        if inner.stopped {
            return Err(ClientError::Stopped);
        }
        if let Some(current) = inner.collection.pending(queued.id) {
            return Ok(Some(current.clone()));
        }
        if inner.cancelled.remove(&queued.id) {
            return Ok(None);
        }

        let mut entry = queued.clone();
        entry.target_id = inner.collection.permanent_id(entry.target_id);
        if let MutationPayload::Insert { record } = &mut entry.payload {
            record.id = entry.target_id;
        }
        Ok(Some(entry))
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn changes(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Feed one frame and settle every mutation the commit confirmed.
    pub fn ingest(&self, frame: Frame, now: Timestamp) -> Result<IngestOutcome> {
        self.mutate(|inner| {
            let outcome = inner.collection.ingest(frame, now);
            if let IngestOutcome::Committed(summary) = &outcome {
                for entry in &summary.resolved {
                    inner.settle(
                        entry,
                        MutationOutcome::Confirmed {
                            txid: entry.txid.clone(),
                        },
                    );
                }
            }
            outcome
        })
    }

    /// Store a write acknowledgment.
    pub fn acknowledge(&self, entry: &PendingMutation, ack: WriteAck) -> Result<bool> {
        let server_id = match entry.kind() {
            ChangeKind::Insert => ack.id,
            _ => None,
        };
        let txid = ack.txid.clone();
        let result = self.mutate(|inner| {
            let result = inner.collection.acknowledge(entry.id, ack.txid, server_id);
            if let Some(resolved) = &result.resolved {
                inner.settle(
                    resolved,
                    MutationOutcome::Confirmed {
                        txid: resolved.txid.clone(),
                    },
                );
            }
            result
        })?;

        if result.acknowledged {
            self.emit(SyncEvent::Acknowledged {
                mutation: entry.id,
                record_id: server_id.unwrap_or(entry.target_id),
                txid,
            });
        }
        Ok(result.acknowledged)
    }

    /// Roll back a failed write and every entry that depended on it.
    pub fn fail(&self, entry: &PendingMutation, reason: &str) -> Result<Vec<PendingMutation>> {
        let removed = self.mutate(|inner| {
            let removed = inner.collection.rollback(entry.id);
            for failed in &removed {
                if failed.id != entry.id {
                    inner.cancelled.insert(failed.id);
                }
                inner.settle(
                    failed,
                    MutationOutcome::Failed {
                        reason: reason.to_string(),
                    },
                );
            }
            removed
        })?;

        for failed in &removed {
            self.emit(SyncEvent::RolledBack {
                mutation: failed.id,
                record_id: failed.target_id,
                reason: reason.to_string(),
            });
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mutate_publishes_only_changes() {
        let shared = Shared::new();
        let mut changes = shared.changes();
        changes.borrow_and_update();

        shared.mutate(|_| ()).unwrap();
        assert!(!changes.has_changed().unwrap());

        shared
            .mutate(|inner| inner.collection.insert(1, "a", 0))
            .unwrap()
            .unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(shared.snapshot().len(), 1);
    }

    #[test]
    fn commit_settles_waiters() {
        let shared = Shared::new();
        let (tx, mut rx) = oneshot::channel();
        shared
            .mutate(|inner| {
                let entry = inner.collection.insert(1, "a", 0).unwrap();
                inner.waiters.insert(entry.id, tx);
            })
            .unwrap();

        shared.ingest(Frame::insert(json!({"id": 1, "text": "a"})), 1).unwrap();
        shared.ingest(Frame::up_to_date(), 1).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            MutationOutcome::Confirmed { txid: None }
        );
    }

    #[test]
    fn due_write_survives_resolution_but_not_rollback() {
        let shared = Shared::new();
        let (insert, update) = shared
            .mutate(|inner| {
                let insert = inner.collection.insert(1, "a", 0).unwrap();
                let update = inner.collection.toggle(1, 1).unwrap();
                (insert, update)
            })
            .unwrap();

        // The echo of another write resolves the queued update first.
        shared.ingest(Frame::update(json!({"id": 1, "completed": true})), 2).unwrap();
        shared.ingest(Frame::up_to_date(), 2).unwrap();
        assert_eq!(shared.due(&update).unwrap(), Some(update.clone()));

        // A failed insert takes the queued update down with it.
        let (queued, dependent) = shared
            .mutate(|inner| {
                let queued = inner.collection.insert(2, "b", 3).unwrap();
                let dependent = inner.collection.toggle(2, 4).unwrap();
                (queued, dependent)
            })
            .unwrap();
        assert_eq!(shared.fail(&queued, "rejected").unwrap().len(), 2);
        assert_eq!(shared.due(&dependent).unwrap(), None);
        assert!(shared.due(&insert).unwrap().is_some());
    }

    #[test]
    fn due_write_follows_remap() {
        let shared = Shared::new();
        let (insert, update) = shared
            .mutate(|inner| {
                let insert = inner.collection.insert(100, "a", 0).unwrap();
                let update = inner.collection.toggle(100, 1).unwrap();
                (insert, update)
            })
            .unwrap();

        shared.acknowledge(&insert, WriteAck::new("1").with_id(9)).unwrap();
        assert_eq!(shared.due(&update).unwrap().unwrap().target_id, 9);
    }

    #[test]
    fn stopped_state_rejects_everything() {
        let shared = Shared::new();
        let (tx, mut rx) = oneshot::channel::<MutationOutcome>();
        shared.mutate(|inner| inner.waiters.insert(1, tx)).unwrap();

        shared.stop();

        assert!(matches!(shared.mutate(|_| ()), Err(ClientError::Stopped)));
        assert!(matches!(
            shared.ingest(Frame::up_to_date(), 0),
            Err(ClientError::Stopped)
        ));
        assert!(rx.try_recv().is_err());
    }
}
