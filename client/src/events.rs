//! Observable sync events and per-mutation outcomes.

use crate::error::{ClientError, Result};
use tidy_engine::{MutationId, PendingMutation, RecordId, TxId};
use tokio::sync::oneshot;

/// Something the presentation layer may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// First catch-up with the remote stream; sent once per coordinator
    Ready,
    /// A batch was applied
    Committed { applied: usize, resolved: usize },
    /// An inbound message was dropped as malformed
    MessageSkipped { reason: String },
    /// The change stream dropped; the open batch was discarded
    Disconnected { dropped: usize },
    /// A remote write succeeded
    Acknowledged {
        mutation: MutationId,
        record_id: RecordId,
        txid: TxId,
    },
    /// A local mutation was reverted
    RolledBack {
        mutation: MutationId,
        record_id: RecordId,
        reason: String,
    },
}

/// Final state of one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Echoed by the change stream
    Confirmed { txid: Option<TxId> },
    /// Rolled back
    Failed { reason: String },
}

/// Returned by every accepted mutation.
///
/// Dropping the handle is fine: the mutation proceeds either way. Awaiting
/// [`MutationHandle::confirmed`] surfaces the outcome to the caller.
#[derive(Debug)]
pub struct MutationHandle {
    pub mutation: MutationId,
    pub record_id: RecordId,
    outcome: oneshot::Receiver<MutationOutcome>,
}

impl MutationHandle {
    pub(crate) fn new(
        entry: &PendingMutation,
        outcome: oneshot::Receiver<MutationOutcome>,
    ) -> Self {
        Self {
            mutation: entry.id,
            record_id: entry.target_id,
            outcome,
        }
    }

    /// Wait until the mutation is confirmed by the change stream.
    ///
    /// Returns the transaction token if the write was acknowledged first.
    pub async fn confirmed(self) -> Result<Option<TxId>> {
        match self.outcome.await {
            Ok(MutationOutcome::Confirmed { txid }) => Ok(txid),
            Ok(MutationOutcome::Failed { reason }) => Err(ClientError::MutationFailed(reason)),
            Err(_) => Err(ClientError::Stopped),
        }
    }
}
