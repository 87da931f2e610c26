//! Sync coordinator.
//!
//! Owns the shared state, the change-stream task and the dispatcher, and
//! exposes the read and mutation entry points to the presentation layer.

use std::sync::Arc;

use chrono::Utc;
use tidy_engine::{
    Collection, Frame, IngestOutcome, PendingMutation, Record, RecordId, RecordPatch, Snapshot,
    Timestamp,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::SyncOptions;
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, Result};
use crate::events::{MutationHandle, SyncEvent};
use crate::state::{Inner, Shared};
use crate::transport::{ChangeSource, WriteApi};

/// Client ids stay within the range JSON numbers represent exactly.
const MAX_CLIENT_ID: u64 = (1 << 53) - 1;

/// A mutation request from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Insert { text: String },
    Update { id: RecordId, changes: RecordPatch },
    Toggle { id: RecordId },
    Delete { id: RecordId },
}

/// Wires the store, the mutation log, the ingestor and the dispatcher together.
pub struct SyncCoordinator {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    shutdown: watch::Sender<bool>,
    stream: JoinHandle<()>,
}

impl SyncCoordinator {
    /// Start consuming `source` and dispatching writes to `api`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        source: Arc<dyn ChangeSource>,
        api: Arc<dyn WriteApi>,
        options: SyncOptions,
    ) -> Self {
        let shared = Shared::new();
        let dispatcher = Dispatcher::new(shared.clone(), api, options.clone());
        let (shutdown, stop_rx) = watch::channel(false);

        let stream = tokio::spawn(run_stream(shared.clone(), source, options, stop_rx));
        tracing::info!("Sync coordinator started");

        Self {
            shared,
            dispatcher,
            shutdown,
            stream,
        }
    }

    /// Current reconciled snapshot. Always available, even before readiness.
    pub fn query(&self) -> Arc<Snapshot> {
        self.shared.snapshot()
    }

    /// Receiver that is notified whenever the snapshot changes.
    pub fn changes(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.shared.changes()
    }

    /// Subscribe to sync events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events()
    }

    /// Whether the first catch-up with the remote stream has happened.
    pub fn is_ready(&self) -> bool {
        self.query().ready
    }

    /// Visible record under `id`.
    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.query().get(id).cloned()
    }

    /// Add a task. It is visible in [`Self::query`] when this returns.
    pub fn insert(&self, text: &str) -> Result<MutationHandle> {
        let now = now_millis();
        let handle = self.shared.mutate(|inner| {
            let id = fresh_id(&inner.collection);
            let entry = inner.collection.insert(id, text, now)?;
            Ok::<_, tidy_engine::Error>(self.track(inner, entry))
        })??;
        Ok(handle)
    }

    /// Change a task through `mutator`. `None` if the task is unknown or
    /// nothing changed.
    pub fn update<F>(&self, id: RecordId, mutator: F) -> Result<Option<MutationHandle>>
    where
        F: FnOnce(&mut Record),
    {
        self.issue(|collection, now| collection.update(id, mutator, now))
    }

    /// Flip the completion flag of a task.
    pub fn toggle(&self, id: RecordId) -> Result<Option<MutationHandle>> {
        self.issue(|collection, now| collection.toggle(id, now))
    }

    /// Delete a task. Unknown ids are a no-op.
    pub fn delete(&self, id: RecordId) -> Result<Option<MutationHandle>> {
        self.issue(|collection, now| collection.delete(id, now))
    }

    /// Apply a [`Mutation`].
    pub fn mutate(&self, mutation: Mutation) -> Result<Option<MutationHandle>> {
        match mutation {
            Mutation::Insert { text } => self.insert(&text).map(Some),
            Mutation::Update { id, changes } => {
                self.update(id, |record| record.apply_patch(&changes))
            }
            Mutation::Toggle { id } => self.toggle(id),
            Mutation::Delete { id } => self.delete(id),
        }
    }

    /// Cancel the subscription and every queued write.
    ///
    /// No state change happens afterwards; outstanding handles resolve to
    /// [`ClientError::Stopped`].
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        self.shared.stop();
        self.dispatcher.shutdown();

        if let Err(e) = self.stream.await {
            if !e.is_cancelled() {
                tracing::error!(error = %e, "Change stream task failed");
            }
        }
        tracing::info!("Sync coordinator stopped");
    }

    /// Run a log update and track the entry it produced, if any.
    fn issue<F>(&self, f: F) -> Result<Option<MutationHandle>>
    where
        F: FnOnce(&mut Collection, Timestamp) -> Option<PendingMutation>,
    {
        let now = now_millis();
        self.shared.mutate(|inner| {
            f(&mut inner.collection, now).map(|entry| self.track(inner, entry))
        })
    }

    /// Register a waiter for `entry` and queue its write.
    ///
    /// Runs under the same lock acquisition as the log update, so per-record
    /// dispatch order is issuance order.
    fn track(&self, inner: &mut Inner, entry: PendingMutation) -> MutationHandle {
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(entry.id, tx);
        let lane = inner.collection.origin(entry.target_id);
        self.dispatcher.dispatch(lane, &entry);

        tracing::debug!(
            mutation = entry.id,
            record_id = entry.target_id,
            kind = %entry.kind(),
            "Mutation issued"
        );
        MutationHandle::new(&entry, rx)
    }
}

/// Consume the change stream, resubscribing after every disconnect.
async fn run_stream(
    shared: Arc<Shared>,
    source: Arc<dyn ChangeSource>,
    options: SyncOptions,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let subscribed = tokio::select! {
            result = source.subscribe() => result,
            _ = stop.changed() => return,
        };
        match subscribed {
            Ok(frames) => {
                tracing::info!("Change stream subscribed");
                if consume(&shared, frames, &mut stop).await.is_err() {
                    return;
                }
                match shared.mutate(|inner| inner.collection.reset_stream()) {
                    Ok(dropped) => {
                        tracing::warn!(dropped, "Change stream disconnected");
                        shared.emit(SyncEvent::Disconnected { dropped });
                    }
                    Err(_) => return,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Change stream subscription failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(options.reconnect_delay) => {}
            _ = stop.changed() => return,
        }
    }
}

/// Feed frames until the stream ends. `Err` means the coordinator stopped.
async fn consume(
    shared: &Shared,
    mut frames: mpsc::Receiver<Frame>,
    stop: &mut watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            frame = frames.recv() => frame,
            _ = stop.changed() => return Err(ClientError::Stopped),
        };
        let Some(frame) = frame else {
            return Ok(());
        };

        match shared.ingest(frame, now_millis())? {
            IngestOutcome::Buffered => {}
            IngestOutcome::Skipped(e) => {
                tracing::warn!(error = %e, "Skipping malformed change message");
                shared.emit(SyncEvent::MessageSkipped {
                    reason: e.to_string(),
                });
            }
            IngestOutcome::Ignored(marker) => {
                tracing::trace!(marker = %marker, "Ignoring control message");
            }
            IngestOutcome::Restarted { dropped } => {
                tracing::warn!(dropped, "Shape must be refetched, next batch replaces the store");
            }
            IngestOutcome::Committed(summary) => {
                tracing::debug!(
                    size = summary.size,
                    changed = summary.result.changed(),
                    resolved = summary.resolved.len(),
                    "Batch committed"
                );
                if summary.became_ready {
                    tracing::info!("Collection ready");
                    shared.emit(SyncEvent::Ready);
                }
                shared.emit(SyncEvent::Committed {
                    applied: summary.size,
                    resolved: summary.resolved.len(),
                });
            }
        }
    }
}

/// Draw a client id that is unknown locally.
fn fresh_id(collection: &Collection) -> RecordId {
    loop {
        let raw = uuid::Uuid::new_v4().as_u128() as u64 & MAX_CLIENT_ID;
        let id = raw as RecordId;
        if id != 0 && !collection.is_known_id(id) {
            return id;
        }
    }
}

/// Wall clock in epoch milliseconds.
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis().max(0) as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_fit_in_53_bits() {
        let collection = Collection::new();
        for _ in 0..1000 {
            let id = fresh_id(&collection);
            assert!(id > 0);
            assert!(id as u64 <= MAX_CLIENT_ID);
        }
    }

    #[test]
    fn clock_is_epoch_millis() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }
}
