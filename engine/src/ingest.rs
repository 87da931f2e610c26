//! Remote change ingestor.
//!
//! A two-state machine over the inbound frame stream:
//!
//! ```text
//!   IDLE --data--> ACCUMULATING --data--> ACCUMULATING
//!     ^                 |
//!     +---up-to-date----+      (IDLE --up-to-date--> IDLE is an empty commit)
//! ```
//!
//! Data messages are normalized as they arrive and buffered; nothing reaches
//! the store until the commit marker closes the batch.
//!
//! A `must-refetch` marker discards the open batch and opens a new one that
//! replaces the whole store when it commits.

use crate::{error::Error, Batch, ChangeOp, Control, Frame, Timestamp};

/// Ingestor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestState {
    /// No batch open
    #[default]
    Idle,
    /// Batch open, zero or more messages buffered
    Accumulating,
}

/// Result of feeding one frame to the ingestor.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestStep {
    /// Message appended to the open batch
    Buffered,
    /// Message could not be normalized and was dropped; the batch stays open
    Skipped(Error),
    /// Commit marker received; the batch (possibly empty) must be applied now
    Committed(Batch),
    /// Control marker with no meaning for the collection
    Ignored(String),
    /// Refetch started; carries the number of buffered messages discarded
    Restarted(usize),
}

/// Batching state machine for the inbound change stream.
#[derive(Debug, Clone, Default)]
pub struct Ingestor {
    state: IngestState,
    open: Vec<ChangeOp>,
    refetch: bool,
    commits: u64,
    skipped: u64,
}

impl Ingestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame. `now` is used for defaults and as the commit time.
    pub fn receive(&mut self, frame: Frame, now: Timestamp) -> IngestStep {
        match frame {
            Frame::Change { kind, value } => {
                self.begin();
                match ChangeOp::from_value(kind, &value, now) {
                    Ok(op) => {
                        self.open.push(op);
                        IngestStep::Buffered
                    }
                    Err(e) => {
                        self.skipped += 1;
                        IngestStep::Skipped(e)
                    }
                }
            }
            Frame::Malformed(reason) => {
                self.begin();
                self.skipped += 1;
                IngestStep::Skipped(Error::InvalidPayload(reason))
            }
            Frame::Control(Control::UpToDate) => {
                let ops = std::mem::take(&mut self.open);
                self.state = IngestState::Idle;
                self.commits += 1;
                let batch = if std::mem::take(&mut self.refetch) {
                    Batch::refetched(ops, now)
                } else {
                    Batch::new(ops, now)
                };
                IngestStep::Committed(batch)
            }
            Frame::Control(Control::MustRefetch) => {
                let dropped = self.open.len();
                self.open.clear();
                self.refetch = true;
                self.state = IngestState::Accumulating;
                IngestStep::Restarted(dropped)
            }
            Frame::Control(Control::Other(marker)) => IngestStep::Ignored(marker),
        }
    }

    fn begin(&mut self) {
        if self.state == IngestState::Idle {
            self.state = IngestState::Accumulating;
        }
    }

    /// Drop the open batch after a disconnect. Returns how many buffered
    /// messages were discarded; the restarted stream replays them.
    pub fn reset(&mut self) -> usize {
        self.state = IngestState::Idle;
        self.refetch = false;
        let dropped = self.open.len();
        self.open.clear();
        dropped
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Messages buffered in the open batch.
    pub fn buffered(&self) -> usize {
        self.open.len()
    }

    /// Commits seen since creation, including empty ones.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Messages skipped as malformed since creation.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
