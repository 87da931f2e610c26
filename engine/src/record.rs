//! Record types for the synchronized task list.

use crate::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// A task record as held by the store and exposed in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, immutable once assigned
    pub id: RecordId,
    /// Task text
    pub text: String,
    /// Completion flag
    pub completed: bool,
    /// Creation time (milliseconds since epoch)
    pub created_at: Timestamp,
    /// Last modification time (milliseconds since epoch), never before `created_at`
    pub updated_at: Timestamp,
}

impl Record {
    /// Create a new, not yet completed record stamped with `timestamp`.
    pub fn new(id: RecordId, text: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            id,
            text: text.into(),
            completed: false,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Build a record from a partial payload, filling absent fields with defaults.
    ///
    /// Used when an update arrives for a record this client has never seen.
    pub fn from_patch(id: RecordId, patch: &RecordPatch, now: Timestamp) -> Self {
        let created_at = patch.created_at.unwrap_or(now);
        let updated_at = patch.updated_at.unwrap_or(now).max(created_at);
        Self {
            id,
            text: patch.text.clone().unwrap_or_default(),
            completed: patch.completed.unwrap_or(false),
            created_at,
            updated_at,
        }
    }

    /// Apply the fields present in `patch`. The id never changes.
    pub fn apply_patch(&mut self, patch: &RecordPatch) {
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
        self.updated_at = self.updated_at.max(self.created_at);
    }
}

/// A partial record: only the fields that are `Some` are meant to change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl RecordPatch {
    /// Fields that differ between `before` and `after`.
    pub fn diff(before: &Record, after: &Record) -> Self {
        Self {
            text: (before.text != after.text).then(|| after.text.clone()),
            completed: (before.completed != after.completed).then_some(after.completed),
            created_at: (before.created_at != after.created_at).then_some(after.created_at),
            updated_at: (before.updated_at != after.updated_at).then_some(after.updated_at),
        }
    }

    /// Patch carrying only client-owned fields; timestamps belong to the server.
    pub fn without_server_fields(&self) -> Self {
        Self {
            text: self.text.clone(),
            completed: self.completed,
            created_at: None,
            updated_at: None,
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.completed.is_none()
            && self.created_at.is_none()
            && self.updated_at.is_none()
    }
}
