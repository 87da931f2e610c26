//! HTTP implementations of the change source and the write API.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tidy_engine::{Control, Frame, Record, RecordId, RecordPatch, Timestamp};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::transport::{ChangeSource, WriteAck, WriteApi};

/// Frames buffered between the poller and the coordinator.
const FRAME_BUFFER: usize = 256;

/// Long-polls a shape endpoint.
///
/// The source remembers the cursor of the last caught-up poll, so a
/// resubscribe resumes where the previous stream left off. Starting over from
/// offset `-1`, either on first use or after the server expired the shape,
/// begins with a must-refetch frame so the replayed shape replaces the store.
#[derive(Debug, Clone)]
pub struct HttpShapeSource {
    client: Client,
    url: String,
    table: String,
    committed: Arc<Mutex<ShapeCursor>>,
}

impl HttpShapeSource {
    pub fn new(client: Client, url: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            table: table.into(),
            committed: Arc::new(Mutex::new(ShapeCursor::default())),
        }
    }

    pub fn from_config(client: Client, config: &Config) -> Self {
        Self::new(client, &config.shape_url, &config.table)
    }

    fn poller(&self) -> ShapePoller {
        ShapePoller {
            client: self.client.clone(),
            url: self.url.clone(),
            table: self.table.clone(),
            cursor: lock(&self.committed).clone(),
            committed: self.committed.clone(),
        }
    }
}

#[async_trait]
impl ChangeSource for HttpShapeSource {
    async fn subscribe(&self) -> Result<mpsc::Receiver<Frame>> {
        let (sender, receiver) = mpsc::channel(FRAME_BUFFER);
        let mut poller = self.poller();

        tokio::spawn(async move {
            if let Err(e) = poller.run(sender).await {
                tracing::warn!(error = %e, "Shape stream ended");
            }
        });
        Ok(receiver)
    }
}

/// Position in a shape log.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ShapeCursor {
    offset: String,
    handle: Option<String>,
    live: bool,
}

impl Default for ShapeCursor {
    fn default() -> Self {
        Self {
            offset: "-1".to_string(),
            handle: None,
            live: false,
        }
    }
}

impl ShapeCursor {
    fn is_initial(&self) -> bool {
        self.offset == "-1"
    }
}

fn lock(cursor: &Mutex<ShapeCursor>) -> MutexGuard<'_, ShapeCursor> {
    cursor.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One shape subscription.
struct ShapePoller {
    client: Client,
    url: String,
    table: String,
    cursor: ShapeCursor,
    committed: Arc<Mutex<ShapeCursor>>,
}

impl ShapePoller {
    /// Poll until an error occurs or the receiver goes away.
    async fn run(&mut self, sender: mpsc::Sender<Frame>) -> Result<()> {
        if self.cursor.is_initial() && sender.send(Frame::must_refetch()).await.is_err() {
            return Ok(());
        }
        loop {
            let frames = tokio::select! {
                frames = self.poll() => frames?,
                _ = sender.closed() => return Ok(()),
            };
            for frame in frames {
                if sender.send(frame).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    async fn poll(&mut self) -> Result<Vec<Frame>> {
        let response = self
            .client
            .get(&self.url)
            .query(&self.query())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            tracing::warn!(offset = %self.cursor.offset, "Shape expired, refetching");
            self.restart(header(&response, "electric-handle"));
            return Ok(vec![Frame::must_refetch()]);
        }
        if !status.is_success() {
            return Err(rejected(response).await);
        }

        let handle = header(&response, "electric-handle");
        let offset = header(&response, "electric-offset");
        let body = response.bytes().await?;
        let frames = decode_frames(&body)?;
        self.advance(handle, offset, &frames);

        tracing::trace!(count = frames.len(), offset = %self.cursor.offset, "Shape poll");
        Ok(frames)
    }

    /// Move past a successful poll. Caught-up positions are kept for the next
    /// subscription.
    fn advance(&mut self, handle: Option<String>, offset: Option<String>, frames: &[Frame]) {
        if let Some(handle) = handle {
            self.cursor.handle = Some(handle);
        }
        if let Some(offset) = offset {
            self.cursor.offset = offset;
        }
        if frames
            .iter()
            .any(|frame| matches!(frame, Frame::Control(Control::UpToDate)))
        {
            self.cursor.live = true;
            *lock(&self.committed) = self.cursor.clone();
        }
    }

    /// Start over from the beginning of the shape.
    fn restart(&mut self, handle: Option<String>) {
        self.cursor = ShapeCursor {
            handle,
            ..ShapeCursor::default()
        };
        *lock(&self.committed) = self.cursor.clone();
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("table", self.table.clone()),
            ("offset", self.cursor.offset.clone()),
        ];
        if let Some(handle) = &self.cursor.handle {
            query.push(("handle", handle.clone()));
        }
        if self.cursor.live {
            query.push(("live", "true".to_string()));
        }
        query
    }
}

/// Decode a poll response body. Frames that are not objects become
/// [`Frame::Malformed`] instead of failing the whole response.
pub fn decode_frames(body: &[u8]) -> Result<Vec<Frame>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let values: Vec<Value> = serde_json::from_slice(body)?;
    Ok(values
        .into_iter()
        .map(|value| {
            serde_json::from_value(value).unwrap_or_else(|e| Frame::Malformed(e.to_string()))
        })
        .collect())
}

/// Write API at `{base}/api/todos`.
#[derive(Debug, Clone)]
pub struct HttpWriteApi {
    client: Client,
    base_url: String,
}

impl HttpWriteApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(client: Client, config: &Config) -> Self {
        Self::new(client, &config.api_url)
    }

    fn collection_url(&self) -> String {
        format!("{}/api/todos", self.base_url)
    }

    fn record_url(&self, id: RecordId) -> String {
        format!("{}/api/todos/{}", self.base_url, id)
    }
}

#[async_trait]
impl WriteApi for HttpWriteApi {
    async fn create_record(&self, record: &Record) -> Result<WriteAck> {
        let response = self
            .client
            .post(self.collection_url())
            .json(&create_body(record))
            .send()
            .await?;
        ack(response).await
    }

    async fn update_record(&self, id: RecordId, changes: &RecordPatch) -> Result<WriteAck> {
        let response = self
            .client
            .put(self.record_url(id))
            .json(&update_body(changes))
            .send()
            .await?;
        ack(response).await
    }

    async fn delete_record(&self, id: RecordId) -> Result<WriteAck> {
        let response = self.client.delete(self.record_url(id)).send().await?;
        ack(response).await
    }
}

fn create_body(record: &Record) -> Value {
    json!({
        "id": record.id,
        "text": record.text,
        "completed": record.completed,
        "created_at": rfc3339(record.created_at),
        "updated_at": rfc3339(record.updated_at),
    })
}

fn update_body(changes: &RecordPatch) -> Value {
    let mut body = serde_json::Map::new();
    if let Some(text) = &changes.text {
        body.insert("text".into(), json!(text));
    }
    if let Some(completed) = changes.completed {
        body.insert("completed".into(), json!(completed));
    }
    Value::Object(body)
}

fn rfc3339(timestamp: Timestamp) -> Option<String> {
    let millis = i64::try_from(timestamp).ok()?;
    DateTime::from_timestamp_millis(millis).map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn ack(response: Response) -> Result<WriteAck> {
    if !response.status().is_success() {
        return Err(rejected(response).await);
    }
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn rejected(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ClientError::Rejected { status, body }
}
