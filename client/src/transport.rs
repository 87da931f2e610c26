//! External collaborators: the inbound change stream and the remote write API.
//!
//! The coordinator only talks to these traits. [`crate::http`] provides
//! implementations over HTTP; tests plug in in-memory doubles.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tidy_engine::{Frame, Record, RecordId, RecordPatch, TxId};
use tokio::sync::mpsc;

/// Source of inbound change frames.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Open a fresh subscription.
    ///
    /// Frames arrive in stream order. The channel closing means the stream
    /// disconnected; the coordinator then calls `subscribe` again and treats
    /// the new stream exactly like the first one.
    async fn subscribe(&self) -> Result<mpsc::Receiver<Frame>>;
}

/// Remote write endpoints.
#[async_trait]
pub trait WriteApi: Send + Sync {
    /// Create a record. The remote side may answer with its own id.
    async fn create_record(&self, record: &Record) -> Result<WriteAck>;

    /// Update client-owned fields of a record.
    async fn update_record(&self, id: RecordId, changes: &RecordPatch) -> Result<WriteAck>;

    /// Delete a record.
    async fn delete_record(&self, id: RecordId) -> Result<WriteAck>;
}

/// Acknowledgment of a remote write.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteAck {
    /// Transaction token; stored for diagnostics only
    #[serde(deserialize_with = "token")]
    pub txid: TxId,
    /// Id assigned by the remote system, if it differs from the client's
    #[serde(default, deserialize_with = "optional_id")]
    pub id: Option<RecordId>,
}

impl WriteAck {
    pub fn new(txid: impl Into<TxId>) -> Self {
        Self {
            txid: txid.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Tokens arrive as numbers or strings.
fn token<'de, D>(deserializer: D) -> std::result::Result<TxId, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected txid, got {other}"
        ))),
    }
}

fn optional_id<'de, D>(deserializer: D) -> std::result::Result<Option<RecordId>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid id {n}"))),
        Value::String(s) => s
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid id {s}"))),
        other => Err(serde::de::Error::custom(format!("invalid id {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_with_numeric_txid() {
        let ack: WriteAck = serde_json::from_str(r#"{"txid": 7781}"#).unwrap();
        assert_eq!(ack, WriteAck::new("7781"));
    }

    #[test]
    fn ack_with_string_txid_and_id() {
        let ack: WriteAck = serde_json::from_str(r#"{"txid": "7782", "id": "15"}"#).unwrap();
        assert_eq!(ack, WriteAck::new("7782").with_id(15));

        let ack: WriteAck = serde_json::from_str(r#"{"txid": 1, "id": null}"#).unwrap();
        assert_eq!(ack.id, None);
    }

    #[test]
    fn ack_without_txid_is_rejected() {
        assert!(serde_json::from_str::<WriteAck>(r#"{"id": 1}"#).is_err());
        assert!(serde_json::from_str::<WriteAck>(r#"{"txid": null}"#).is_err());
    }
}
