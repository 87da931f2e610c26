//! # Tidy Engine
//!
//! The reconciliation core of a local-first task list.
//!
//! A remote system owns the authoritative list and pushes an ordered stream of
//! change messages, delimited into atomic batches by `up-to-date` markers.
//! Locally, the user mutates the list optimistically: changes show up at once
//! and are confirmed or rolled back later. This crate holds the state machine
//! that keeps both views consistent.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing of sockets, tasks or files
//! - **No ambient state**: time and client ids are always passed in
//! - **Atomic batches**: a batch reaches the store in one call or not at all
//!
//! ## Core Concepts
//!
//! - [`RecordStore`] - authoritative records, written only by committed batches
//! - [`MutationLog`] - pending optimistic inserts, updates and deletes
//! - [`Ingestor`] - `IDLE`/`ACCUMULATING` batching over inbound [`Frame`]s
//! - [`Snapshot`] - the store with the log replayed on top, as readers see it
//! - [`Collection`] - all of the above behind one owner
//!
//! ## Quick Start
//!
//! ```rust
//! use tidy_engine::{Collection, Frame};
//! use serde_json::json;
//!
//! let mut todos = Collection::new();
//!
//! // A local insert is visible before any round-trip.
//! let pending = todos.insert(42, "buy milk", 1_000).unwrap();
//! assert_eq!(todos.snapshot().len(), 1);
//!
//! // The remote echo arrives in a batch and confirms it.
//! todos.ingest(Frame::insert(json!({"id": 42, "text": "buy milk"})), 2_000);
//! todos.ingest(Frame::up_to_date(), 2_000);
//!
//! let snapshot = todos.snapshot();
//! assert!(snapshot.ready);
//! assert_eq!(snapshot.pending, 0);
//! assert_eq!(snapshot.get(42).unwrap().text, "buy milk");
//! # let _ = pending;
//! ```

pub mod collection;
pub mod error;
pub mod ingest;
pub mod mutation;
pub mod operation;
pub mod record;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use collection::{Acknowledgement, Collection, CommitSummary, IngestOutcome};
pub use error::Error;
pub use ingest::{IngestState, IngestStep, Ingestor};
pub use mutation::{MutationId, MutationLog, MutationPayload, MutationStatus, PendingMutation};
pub use operation::{Batch, ChangeKind, ChangeOp, Control, Frame};
pub use record::{Record, RecordPatch};
pub use snapshot::Snapshot;
pub use store::{BatchResult, RecordStore};

/// Type aliases for clarity
pub type RecordId = i64;
pub type Timestamp = u64;
pub type TxId = String;
