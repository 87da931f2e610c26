//! Inbound change stream types.
//!
//! The remote system pushes an ordered sequence of frames. A frame is either a
//! data message (`insert`/`update`/`delete` plus a JSON value) or a control
//! marker. Values are shaped loosely: every field may be absent or arrive as a
//! string, so each data message is normalized into a typed [`ChangeOp`] before
//! it reaches the store.

use crate::{error::Result, Error, Record, RecordId, RecordPatch, Timestamp};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kind of a change, shared by remote messages and local mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(ChangeKind::Insert),
            "update" => Ok(ChangeKind::Update),
            "delete" => Ok(ChangeKind::Delete),
            other => Err(Error::InvalidPayload(format!("unknown operation '{other}'"))),
        }
    }
}

/// Control markers carried by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// End of an atomic batch; the client has caught up with the remote state.
    UpToDate,
    /// The remote side lost its history; everything up to the next
    /// `up-to-date` replaces the local state.
    MustRefetch,
    /// Any other marker. Carried through so callers can log it.
    Other(String),
}

/// One frame of the inbound change stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawFrame")]
pub enum Frame {
    /// A data message, not yet normalized.
    Change { kind: ChangeKind, value: Value },
    /// A control marker.
    Control(Control),
    /// A frame whose headers could not be understood.
    Malformed(String),
}

impl Frame {
    pub fn insert(value: Value) -> Self {
        Frame::Change {
            kind: ChangeKind::Insert,
            value,
        }
    }

    pub fn update(value: Value) -> Self {
        Frame::Change {
            kind: ChangeKind::Update,
            value,
        }
    }

    pub fn delete(value: Value) -> Self {
        Frame::Change {
            kind: ChangeKind::Delete,
            value,
        }
    }

    pub fn up_to_date() -> Self {
        Frame::Control(Control::UpToDate)
    }

    pub fn must_refetch() -> Self {
        Frame::Control(Control::MustRefetch)
    }
}

/// Wire shape: `{"headers": {"operation": "insert"}, "value": {...}}` or
/// `{"headers": {"control": "up-to-date"}}`.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    headers: RawHeaders,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawHeaders {
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    control: Option<String>,
}

impl From<RawFrame> for Frame {
    fn from(raw: RawFrame) -> Self {
        if let Some(control) = raw.headers.control {
            return match control.as_str() {
                "up-to-date" => Frame::Control(Control::UpToDate),
                "must-refetch" => Frame::Control(Control::MustRefetch),
                _ => Frame::Control(Control::Other(control)),
            };
        }
        match raw.headers.operation {
            Some(op) => match op.parse::<ChangeKind>() {
                Ok(kind) => Frame::Change {
                    kind,
                    value: raw.value,
                },
                Err(e) => Frame::Malformed(e.to_string()),
            },
            None => Frame::Malformed("frame has neither operation nor control header".into()),
        }
    }
}

/// A normalized remote change, ready to be applied to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    /// Full record
    Insert(Record),
    /// Fields present in the message
    Update { id: RecordId, patch: RecordPatch },
    Delete { id: RecordId },
}

impl ChangeOp {
    /// Normalize a raw message value.
    ///
    /// A missing or unreadable `id` is an error; every other field is coerced
    /// or defaulted. Inserts get `completed = false` and `now` for absent
    /// fields, updates only carry the fields that could be read.
    pub fn from_value(kind: ChangeKind, value: &Value, now: Timestamp) -> Result<Self> {
        let id = coerce_id(value.get("id"))?;
        match kind {
            ChangeKind::Insert => {
                let created_at = value.get("created_at").and_then(coerce_timestamp);
                let updated_at = value.get("updated_at").and_then(coerce_timestamp);
                let created_at = created_at.unwrap_or(now);
                Ok(ChangeOp::Insert(Record {
                    id,
                    text: value
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    completed: value.get("completed").and_then(coerce_bool).unwrap_or(false),
                    created_at,
                    updated_at: updated_at.unwrap_or(now).max(created_at),
                }))
            }
            ChangeKind::Update => Ok(ChangeOp::Update {
                id,
                patch: RecordPatch {
                    text: value.get("text").and_then(Value::as_str).map(str::to_string),
                    completed: value.get("completed").and_then(coerce_bool),
                    created_at: value.get("created_at").and_then(coerce_timestamp),
                    updated_at: value.get("updated_at").and_then(coerce_timestamp),
                },
            }),
            ChangeKind::Delete => Ok(ChangeOp::Delete { id }),
        }
    }

    pub fn id(&self) -> RecordId {
        match self {
            ChangeOp::Insert(record) => record.id,
            ChangeOp::Update { id, .. } => *id,
            ChangeOp::Delete { id } => *id,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeOp::Insert(_) => ChangeKind::Insert,
            ChangeOp::Update { .. } => ChangeKind::Update,
            ChangeOp::Delete { .. } => ChangeKind::Delete,
        }
    }
}

/// A closed transaction: every message between two commit markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Operations in arrival order
    pub ops: Vec<ChangeOp>,
    /// Time the commit marker was received
    pub committed_at: Timestamp,
    /// The batch is a full refetch and replaces the store contents
    pub truncate: bool,
}

impl Batch {
    pub fn new(ops: Vec<ChangeOp>, committed_at: Timestamp) -> Self {
        Self {
            ops,
            committed_at,
            truncate: false,
        }
    }

    /// A batch that replaces everything the store holds.
    pub fn refetched(ops: Vec<ChangeOp>, committed_at: Timestamp) -> Self {
        Self {
            truncate: true,
            ..Self::new(ops, committed_at)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

fn coerce_id(value: Option<&Value>) -> Result<RecordId> {
    match value {
        None | Some(Value::Null) => Err(Error::MissingId),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| Error::InvalidId(n.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => Err(Error::MissingId),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidId(s.clone())),
        Some(other) => Err(Error::InvalidId(other.to_string())),
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" | "t" | "1" => Some(true),
            "false" | "f" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn coerce_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => parse_timestamp(s.trim()),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<Timestamp> {
    if let Ok(millis) = s.parse::<u64>() {
        return Some(millis);
    }
    let millis = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_millis())
        .or_else(|_| {
            DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z").map(|dt| dt.timestamp_millis())
        })
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .map(|naive| naive.and_utc().timestamp_millis())
        })
        .ok()?;
    u64::try_from(millis).ok()
}
