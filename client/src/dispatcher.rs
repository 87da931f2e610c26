//! Mutation dispatcher.
//!
//! Every pending entry gets exactly one remote write. Writes on the same
//! record go through a per-record lane and leave in issuance order; lanes of
//! different records run concurrently. Lanes are keyed by the id a record was
//! first known under, so a server-assigned id never splits a record's writes
//! across two lanes. An idle lane shuts down after [`SyncOptions::lane_idle`]
//! and is recreated on demand.

use std::sync::Arc;

use dashmap::DashMap;
use tidy_engine::{MutationPayload, PendingMutation, RecordId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::SyncOptions;
use crate::error::{ClientError, Result};
use crate::state::Shared;
use crate::transport::{WriteAck, WriteApi};

/// Sender side of a lane.
type LaneSender = mpsc::UnboundedSender<PendingMutation>;

/// A single per-record dispatch lane.
#[derive(Debug)]
struct Lane {
    sender: LaneSender,
    task: JoinHandle<()>,
}

/// Fans pending entries out to per-record lanes.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    api: Arc<dyn WriteApi>,
    options: SyncOptions,
    lanes: Arc<DashMap<RecordId, Lane>>,
}

impl Dispatcher {
    pub fn new(shared: Arc<Shared>, api: Arc<dyn WriteApi>, options: SyncOptions) -> Self {
        Self {
            shared,
            api,
            options,
            lanes: Arc::new(DashMap::new()),
        }
    }

    /// Queue the write for `entry` on the lane of record `origin`.
    ///
    /// Must be called while the state lock is held, so queue order matches
    /// issuance order. Requires a Tokio runtime.
    pub fn dispatch(&self, origin: RecordId, entry: &PendingMutation) {
        let key = origin;
        let lane = self
            .lanes
            .entry(key)
            .or_insert_with(|| self.spawn_lane(key));

        // The worker only exits after removing its own lane under the shard
        // lock we hold here, so the receiver is still alive.
        if lane.sender.send(entry.clone()).is_err() {
            tracing::error!(record_id = key, mutation = entry.id, "Dispatch lane closed");
        }
    }

    /// Abort every lane. Queued writes are dropped.
    pub fn shutdown(&self) {
        for lane in self.lanes.iter() {
            lane.task.abort();
        }
        self.lanes.clear();
    }

    fn spawn_lane(&self, key: RecordId) -> Lane {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = self.clone();
        let task = tokio::spawn(async move { worker.run_lane(key, receiver).await });

        tracing::debug!(record_id = key, "Dispatch lane opened");
        Lane { sender, task }
    }

    async fn run_lane(
        self,
        key: RecordId,
        mut receiver: mpsc::UnboundedReceiver<PendingMutation>,
    ) {
        loop {
            match timeout(self.options.lane_idle, receiver.recv()).await {
                Ok(Some(queued)) => {
                    if let Err(ClientError::Stopped) = self.process(queued).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let removed = self
                        .lanes
                        .remove_if(&key, |_, _| receiver.is_empty())
                        .is_some();
                    if removed {
                        tracing::debug!(record_id = key, "Dispatch lane closed after idling");
                        break;
                    }
                }
            }
        }
    }

    /// Send one write and settle the entry with the result.
    async fn process(&self, queued: PendingMutation) -> Result<()> {
        let mutation = queued.id;
        // Read at send time: the entry may have been remapped or rolled back.
        let Some(entry) = self.shared.due(&queued)? else {
            tracing::debug!(mutation, "Entry rolled back before dispatch, skipping");
            return Ok(());
        };

        let limit = self.options.write_timeout;
        let result = match timeout(limit, send(self.api.as_ref(), &entry)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(limit)),
        };

        match result {
            Ok(ack) => {
                tracing::debug!(
                    mutation,
                    record_id = entry.target_id,
                    txid = %ack.txid,
                    "Write acknowledged"
                );
                self.shared.acknowledge(&entry, ack)?;
            }
            Err(e) => {
                tracing::warn!(
                    mutation,
                    record_id = entry.target_id,
                    kind = %entry.kind(),
                    error = %e,
                    "Write failed, rolling back"
                );
                let removed = self.shared.fail(&entry, &e.to_string())?;
                if removed.len() > 1 {
                    tracing::debug!(
                        mutation,
                        cascaded = removed.len() - 1,
                        "Dependent entries rolled back"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Issue the remote call matching the entry's kind.
async fn send(api: &dyn WriteApi, entry: &PendingMutation) -> Result<WriteAck> {
    match &entry.payload {
        MutationPayload::Insert { record } => api.create_record(record).await,
        MutationPayload::Update { patch } => {
            api.update_record(entry.target_id, &patch.without_server_fields())
                .await
        }
        MutationPayload::Delete => api.delete_record(entry.target_id).await,
    }
}
