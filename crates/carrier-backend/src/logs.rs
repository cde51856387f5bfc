//! Batched channel-log persistence.
//!
//! Logs are written to a key-value store, one item per log keyed by its v7
//! UUID, value a gzip-compressed JSON `{http_logs, errors}` with a TTL
//! attribute. Writes are fire-and-forget from the request path: the batcher
//! accumulates items and flushes in batches of `batch_size` (25 in the
//! reference store), or on an interval for partial batches.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::{write::GzEncoder, Compression};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use carrier_common::clog::{ChannelLog, HttpTrace};
use carrier_common::ChannelError;

use crate::{BackendError, Result};

#[derive(Serialize)]
struct LogBody<'a> {
    http_logs: &'a [HttpTrace],
    errors: &'a [ChannelError],
}

/// A channel log serialized for the key-value store.
#[derive(Debug, Clone)]
pub struct StoredLog {
    pub uuid: Uuid,
    pub log_type: &'static str,
    pub channel_uuid: Option<Uuid>,
    pub created_on: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub is_error: bool,
    /// `created_on + ttl`; the store expires the item at this time.
    pub expires_on: DateTime<Utc>,
    /// gzip-compressed JSON `{http_logs: [...], errors: [...]}`.
    pub body_gz: Vec<u8>,
}

impl StoredLog {
    pub fn from_log(log: &ChannelLog, ttl_days: u32) -> Result<Self> {
        let body = LogBody {
            http_logs: log.http_traces(),
            errors: log.errors(),
        };
        let json = serde_json::to_vec(&body)
            .map_err(|e| BackendError::Storage(format!("log serialization: {e}")))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .and_then(|_| encoder.finish())
            .map(|body_gz| StoredLog {
                uuid: log.uuid(),
                log_type: log.log_type().as_str(),
                channel_uuid: log.channel_uuid(),
                created_on: log.created_on(),
                elapsed_ms: log.elapsed().as_millis() as u64,
                is_error: log.is_error(),
                expires_on: log.created_on() + chrono::Duration::days(i64::from(ttl_days)),
                body_gz,
            })
            .map_err(|e| BackendError::Storage(format!("log compression: {e}")))
    }

    /// Decompressed JSON body, for tests and the log browser.
    pub fn body_json(&self) -> Result<String> {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(self.body_gz.as_slice());
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|e| BackendError::Storage(format!("log decompression: {e}")))?;
        Ok(out)
    }
}

/// Destination for batched log writes.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn put_batch(&self, batch: Vec<StoredLog>) -> Result<()>;
}

/// In-memory sink for dev mode and tests.
#[derive(Default)]
pub struct MemLogSink {
    items: parking_lot::Mutex<Vec<StoredLog>>,
}

impl MemLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<StoredLog> {
        self.items.lock().clone()
    }
}

#[async_trait]
impl LogSink for MemLogSink {
    async fn put_batch(&self, batch: Vec<StoredLog>) -> Result<()> {
        self.items.lock().extend(batch);
        Ok(())
    }
}

/// Accumulates finalized logs and writes them to the sink in batches.
///
/// Dropping the batcher closes the channel; the writer task flushes whatever
/// remains before exiting.
pub struct LogBatcher {
    tx: mpsc::Sender<StoredLog>,
    ttl_days: u32,
}

impl LogBatcher {
    pub fn new(
        sink: Arc<dyn LogSink>,
        batch_size: usize,
        flush_interval: Duration,
        ttl_days: u32,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1_000);
        tokio::spawn(run_writer(sink, rx, batch_size, flush_interval));
        Self { tx, ttl_days }
    }

    /// Enqueue a finalized log. Never blocks the request path; when the
    /// writer is saturated the log is dropped with a warning.
    pub fn submit(&self, log: &ChannelLog) {
        let stored = match StoredLog::from_log(log, self.ttl_days) {
            Ok(s) => s,
            Err(e) => {
                warn!(log_uuid = %log.uuid(), error = %e, "Failed to serialize channel log");
                return;
            }
        };
        if self.tx.try_send(stored).is_err() {
            warn!(log_uuid = %log.uuid(), "Channel log writer saturated, dropping log");
        }
    }
}

async fn run_writer(
    sink: Arc<dyn LogSink>,
    mut rx: mpsc::Receiver<StoredLog>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut pending: Vec<StoredLog> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            item = rx.recv() => {
                match item {
                    Some(log) => {
                        pending.push(log);
                        if pending.len() >= batch_size {
                            flush(&sink, &mut pending).await;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush(&sink, &mut pending).await;
                }
            }
        }
    }

    // channel closed; drain what remains
    if !pending.is_empty() {
        flush(&sink, &mut pending).await;
    }
}

async fn flush(sink: &Arc<dyn LogSink>, pending: &mut Vec<StoredLog>) {
    let batch = std::mem::take(pending);
    let count = batch.len();
    if let Err(e) = sink.put_batch(batch).await {
        warn!(count, error = %e, "Channel log batch write failed");
    } else {
        debug!(count, "Flushed channel log batch");
    }
}
