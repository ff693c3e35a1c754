//! Dead-letter path for records the pipeline could not process.
//!
//! A [`DeadLetter`] keeps the failed record as JSON together with where it failed and why, so
//! it can be inspected and replayed. Records reach the path from:
//!
//! - the decoder ([`DeadLetterReason::Deserialization`]),
//! - the key extractors ([`DeadLetterReason::MalformedEvent`]),
//! - a poisoned aggregation key ([`DeadLetterReason::StateCorruption`]),
//! - a sink that gave up on a batch ([`DeadLetterReason::FatalFlush`]) or that is halted
//!   ([`DeadLetterReason::SinkHalted`]).
//!
//! Two [`DeadLetterSink`]s are provided: [`DeadLetterQueue`], in memory, and
//! [`JsonlDeadLetterWriter`], an append-only JSON Lines file flushed after every record.
//!
//! Replaying is decoding the payload back into the record type and feeding it to the sink it
//! came from. Aggregate snapshots carry cumulative totals, so replaying one never adds to a
//! total a second time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::consumer::{Consumer, ConsumerConfig};
use crate::error::DeadLetterError;
use crate::input::Input;

/// Why a record was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
  /// The source message could not be decoded.
  Deserialization,
  /// A key extractor rejected the transaction.
  MalformedEvent,
  /// The transaction hit a corrupted aggregation key.
  StateCorruption,
  /// A flush exhausted its retries or failed permanently.
  FatalFlush,
  /// The target sink was halted when the record arrived.
  SinkHalted,
}

impl DeadLetterReason {
  /// Label used in logs and metrics.
  pub fn as_str(&self) -> &'static str {
    match self {
      DeadLetterReason::Deserialization => "deserialization",
      DeadLetterReason::MalformedEvent => "malformed_event",
      DeadLetterReason::StateCorruption => "state_corruption",
      DeadLetterReason::FatalFlush => "fatal_flush",
      DeadLetterReason::SinkHalted => "sink_halted",
    }
  }
}

impl fmt::Display for DeadLetterReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A record that could not be processed, with its failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
  /// Pipeline or sink that gave up on the record.
  pub source: String,
  /// Failure class.
  pub reason: DeadLetterReason,
  /// Error message.
  pub error: String,
  /// The record, as JSON.
  pub payload: serde_json::Value,
  /// When the record was dead-lettered.
  pub timestamp: DateTime<Utc>,
}

impl DeadLetter {
  /// Creates a dead letter carrying an already encoded payload.
  pub fn new(
    source: impl Into<String>,
    reason: DeadLetterReason,
    error: impl fmt::Display,
    payload: serde_json::Value,
  ) -> Self {
    Self {
      source: source.into(),
      reason,
      error: error.to_string(),
      payload,
      timestamp: Utc::now(),
    }
  }

  /// Creates a dead letter for `record`.
  pub fn for_record<T: Serialize>(
    source: impl Into<String>,
    reason: DeadLetterReason,
    error: impl fmt::Display,
    record: &T,
  ) -> Self {
    let payload = serde_json::to_value(record)
      .unwrap_or_else(|e| serde_json::Value::String(format!("unencodable record: {}", e)));
    Self::new(source, reason, error, payload)
  }

  /// Decodes the payload back into the record it was built from.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    T::deserialize(&self.payload)
  }
}

/// Destination of dead letters.
#[async_trait]
pub trait DeadLetterSink: Send + Sync + fmt::Debug {
  /// Records `letter` durably for this sink's definition of durable.
  async fn deliver(&self, letter: DeadLetter) -> Result<(), DeadLetterError>;

  /// Every dead letter held, oldest first.
  async fn letters(&self) -> Result<Vec<DeadLetter>, DeadLetterError>;

  /// Removes the held dead letters `replayed` selects. Returns how many were removed.
  async fn acknowledge(
    &self,
    replayed: &(dyn for<'d> Fn(&'d DeadLetter) -> bool + Send + Sync),
  ) -> Result<usize, DeadLetterError>;
}

/// Delivery attempts made by [`route`] before a dead letter is given up on.
pub const DELIVERY_ATTEMPTS: u32 = 3;

const DELIVERY_BACKOFF: Duration = Duration::from_millis(50);

/// Logs, counts and delivers `letter`, retrying a failed delivery with linear backoff.
///
/// When every attempt fails the whole letter, payload included, is logged at `error` level and
/// the last delivery error is returned. The log line is then the only copy of the record.
pub async fn route(sink: &dyn DeadLetterSink, letter: DeadLetter) -> Result<(), DeadLetterError> {
  warn!(
    source = %letter.source,
    reason = %letter.reason,
    error = %letter.error,
    "Dead-lettering record"
  );
  crate::metrics::record_dead_letter(&letter.source, letter.reason.as_str());
  let mut attempt: u32 = 0;
  loop {
    attempt += 1;
    match sink.deliver(letter.clone()).await {
      Ok(()) => return Ok(()),
      Err(e) if attempt < DELIVERY_ATTEMPTS => {
        warn!(
          source = %letter.source,
          attempt,
          error = %e,
          "Dead-letter delivery failed, retrying"
        );
        tokio::time::sleep(DELIVERY_BACKOFF * attempt).await;
      }
      Err(e) => {
        error!(
          source = %letter.source,
          reason = %letter.reason,
          error = %letter.error,
          delivery_error = %e,
          attempts = attempt,
          payload = %letter.payload,
          timestamp = %letter.timestamp,
          "Dead letter lost"
        );
        crate::metrics::record_dead_letter_lost(&letter.source);
        return Err(e);
      }
    }
  }
}

/// In-memory dead-letter queue.
///
/// Cloning shares the queue. It also implements [`Consumer`] so a stream of dead letters (for
/// example one read back from a file) can be collected into it.
#[derive(Clone)]
pub struct DeadLetterQueue {
  /// The collected dead letters, oldest first.
  pub queue: Arc<Mutex<Vec<DeadLetter>>>,
  /// Consumer configuration.
  pub config: ConsumerConfig<DeadLetter>,
}

impl fmt::Debug for DeadLetterQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DeadLetterQueue")
      .field("name", &self.config.name)
      .finish()
  }
}

impl Default for DeadLetterQueue {
  fn default() -> Self {
    Self::new()
  }
}

impl DeadLetterQueue {
  /// Creates an empty queue.
  pub fn new() -> Self {
    Self {
      queue: Arc::new(Mutex::new(Vec::new())),
      config: ConsumerConfig::default().with_name("dead_letters".to_string()),
    }
  }

  /// Number of dead letters held.
  pub async fn len(&self) -> usize {
    self.queue.lock().await.len()
  }

  /// Whether the queue is empty.
  pub async fn is_empty(&self) -> bool {
    self.queue.lock().await.is_empty()
  }

  /// Removes and returns every dead letter.
  pub async fn drain(&self) -> Vec<DeadLetter> {
    std::mem::take(&mut *self.queue.lock().await)
  }

  /// Copies of every dead letter, oldest first.
  pub async fn items(&self) -> Vec<DeadLetter> {
    self.queue.lock().await.clone()
  }

  /// Copies of the dead letters with `reason`.
  pub async fn with_reason(&self, reason: DeadLetterReason) -> Vec<DeadLetter> {
    self
      .queue
      .lock()
      .await
      .iter()
      .filter(|l| l.reason == reason)
      .cloned()
      .collect()
  }
}

#[async_trait]
impl DeadLetterSink for DeadLetterQueue {
  async fn deliver(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
    self.queue.lock().await.push(letter);
    Ok(())
  }

  async fn letters(&self) -> Result<Vec<DeadLetter>, DeadLetterError> {
    Ok(self.items().await)
  }

  async fn acknowledge(
    &self,
    replayed: &(dyn for<'d> Fn(&'d DeadLetter) -> bool + Send + Sync),
  ) -> Result<usize, DeadLetterError> {
    let mut queue = self.queue.lock().await;
    let before = queue.len();
    queue.retain(|letter| !replayed(letter));
    Ok(before - queue.len())
  }
}

impl Input for DeadLetterQueue {
  type Input = DeadLetter;
  type InputStream = Pin<Box<dyn Stream<Item = DeadLetter> + Send>>;
}

#[async_trait]
impl Consumer for DeadLetterQueue {
  async fn consume(&mut self, mut stream: Self::InputStream) {
    let queue = Arc::clone(&self.queue);
    while let Some(letter) = stream.next().await {
      queue.lock().await.push(letter);
    }
  }

  fn set_config_impl(&mut self, config: ConsumerConfig<DeadLetter>) {
    self.config = config;
  }

  fn get_config_impl(&self) -> &ConsumerConfig<DeadLetter> {
    &self.config
  }

  fn get_config_mut_impl(&mut self) -> &mut ConsumerConfig<DeadLetter> {
    &mut self.config
  }
}

/// Append-only JSON Lines dead-letter file. Every record is flushed before `deliver` returns.
#[derive(Debug)]
pub struct JsonlDeadLetterWriter {
  path: PathBuf,
  file: Mutex<tokio::fs::File>,
}

impl JsonlDeadLetterWriter {
  /// Opens `path` for appending, creating it if needed.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, DeadLetterError> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .await?;
    Ok(Self {
      path,
      file: Mutex::new(file),
    })
  }

  /// Path of the file.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Reads every dead letter stored in `path`, oldest first.
  pub async fn read_all(path: impl AsRef<Path>) -> Result<Vec<DeadLetter>, DeadLetterError> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut letters = Vec::new();
    while let Some(line) = lines.next_line().await? {
      if line.trim().is_empty() {
        continue;
      }
      letters.push(serde_json::from_str(&line)?);
    }
    Ok(letters)
  }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterWriter {
  async fn deliver(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
    let mut line = serde_json::to_vec(&letter)?;
    line.push(b'\n');
    let mut file = self.file.lock().await;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
  }

  async fn letters(&self) -> Result<Vec<DeadLetter>, DeadLetterError> {
    let _file = self.file.lock().await;
    Self::read_all(&self.path).await
  }

  /// Rewrites the file without the acknowledged letters. The new contents are written to a
  /// sibling file first and renamed over the old one.
  async fn acknowledge(
    &self,
    replayed: &(dyn for<'d> Fn(&'d DeadLetter) -> bool + Send + Sync),
  ) -> Result<usize, DeadLetterError> {
    let mut file = self.file.lock().await;
    let letters = Self::read_all(&self.path).await?;
    let before = letters.len();
    let kept: Vec<DeadLetter> = letters.into_iter().filter(|l| !replayed(l)).collect();
    let removed = before - kept.len();
    if removed == 0 {
      return Ok(0);
    }

    let mut body = Vec::new();
    for letter in &kept {
      serde_json::to_writer(&mut body, letter)?;
      body.push(b'\n');
    }
    let mut tmp_name = self.path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    let mut rewritten = tokio::fs::File::create(&tmp).await?;
    rewritten.write_all(&body).await?;
    rewritten.sync_all().await?;
    drop(rewritten);
    tokio::fs::rename(&tmp, &self.path).await?;

    *file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .await?;
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transaction::fixtures::tx;
  use crate::transaction::Transaction;
  use std::sync::atomic::{AtomicU32, Ordering};

  /// Fails the first `failures` deliveries, then stores into `inner`.
  #[derive(Debug)]
  struct Flaky {
    failures: u32,
    calls: AtomicU32,
    inner: DeadLetterQueue,
  }

  impl Flaky {
    fn new(failures: u32) -> Self {
      Self {
        failures,
        calls: AtomicU32::new(0),
        inner: DeadLetterQueue::new(),
      }
    }
  }

  #[async_trait]
  impl DeadLetterSink for Flaky {
    async fn deliver(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
      if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
        return Err(std::io::Error::other("disk full").into());
      }
      self.inner.deliver(letter).await
    }

    async fn letters(&self) -> Result<Vec<DeadLetter>, DeadLetterError> {
      self.inner.letters().await
    }

    async fn acknowledge(
      &self,
      replayed: &(dyn for<'d> Fn(&'d DeadLetter) -> bool + Send + Sync),
    ) -> Result<usize, DeadLetterError> {
      self.inner.acknowledge(replayed).await
    }
  }

  fn fatal(n: i64) -> DeadLetter {
    DeadLetter::new(
      "sales_per_day",
      DeadLetterReason::FatalFlush,
      "store down",
      serde_json::json!({ "n": n }),
    )
  }

  #[tokio::test]
  async fn test_route_retries_failed_delivery() {
    let sink = Flaky::new(DELIVERY_ATTEMPTS - 1);
    route(&sink, fatal(1)).await.unwrap();
    assert_eq!(sink.calls.load(Ordering::SeqCst), DELIVERY_ATTEMPTS);
    assert_eq!(sink.inner.len().await, 1);
  }

  #[tokio::test]
  async fn test_route_reports_a_lost_letter() {
    let sink = Flaky::new(u32::MAX);
    let err = route(&sink, fatal(1)).await.unwrap_err();
    assert!(matches!(err, DeadLetterError::Io(_)));
    assert_eq!(sink.calls.load(Ordering::SeqCst), DELIVERY_ATTEMPTS);
    assert!(sink.inner.is_empty().await);
  }

  #[tokio::test]
  async fn test_queue_acknowledge_removes_selected() {
    let dlq = DeadLetterQueue::new();
    for n in 0..4 {
      dlq.deliver(fatal(n)).await.unwrap();
    }
    let removed = dlq
      .acknowledge(&|l: &DeadLetter| l.payload["n"].as_i64().is_some_and(|n| n % 2 == 0))
      .await
      .unwrap();
    assert_eq!(removed, 2);
    let left = dlq.letters().await.unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!(left[0].payload, serde_json::json!({ "n": 1 }));
    assert_eq!(left[1].payload, serde_json::json!({ "n": 3 }));
  }

  #[tokio::test]
  async fn test_jsonl_acknowledge_rewrites_file_and_keeps_appending() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dead.jsonl");
    let writer = JsonlDeadLetterWriter::open(&path).await.unwrap();
    for n in 0..3 {
      writer.deliver(fatal(n)).await.unwrap();
    }

    let removed = writer
      .acknowledge(&|l: &DeadLetter| l.payload["n"] != serde_json::json!(1))
      .await
      .unwrap();
    assert_eq!(removed, 2);
    writer.deliver(fatal(7)).await.unwrap();

    let letters = writer.letters().await.unwrap();
    let ns: Vec<_> = letters.iter().map(|l| l.payload["n"].clone()).collect();
    assert_eq!(ns, vec![serde_json::json!(1), serde_json::json!(7)]);
    assert!(!dir.path().join("dead.jsonl.tmp").exists());
  }

  #[tokio::test]
  async fn test_queue_collects_and_drains() {
    let dlq = DeadLetterQueue::new();
    route(
      &dlq,
      DeadLetter::new(
        "decoder",
        DeadLetterReason::Deserialization,
        "bad json",
        serde_json::json!("{oops"),
      ),
    )
    .await
    .unwrap();
    route(
      &dlq,
      DeadLetter::for_record(
        "sales_per_day",
        DeadLetterReason::MalformedEvent,
        "bad date",
        &tx("t-1", "books", "1", "never"),
      ),
    )
    .await
    .unwrap();

    assert_eq!(dlq.len().await, 2);
    assert_eq!(dlq.with_reason(DeadLetterReason::MalformedEvent).await.len(), 1);
    let drained = dlq.drain().await;
    assert_eq!(drained[0].source, "decoder");
    assert!(dlq.is_empty().await);
  }

  #[tokio::test]
  async fn test_payload_decodes_back() {
    let original = tx("t-1", "books", "4.20", "2024-01-01T00:00:00");
    let letter = DeadLetter::for_record("transactions", DeadLetterReason::FatalFlush, "x", &original);
    let back: Transaction = letter.decode().unwrap();
    assert_eq!(back, original);
  }

  #[tokio::test]
  async fn test_jsonl_writer_appends_and_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dead.jsonl");

    let writer = JsonlDeadLetterWriter::open(&path).await.unwrap();
    for i in 0..3 {
      writer
        .deliver(DeadLetter::new(
          "sink",
          DeadLetterReason::FatalFlush,
          format!("attempt {}", i),
          serde_json::json!({ "n": i }),
        ))
        .await
        .unwrap();
    }
    drop(writer);

    let reopened = JsonlDeadLetterWriter::open(&path).await.unwrap();
    reopened
      .deliver(DeadLetter::new(
        "sink",
        DeadLetterReason::SinkHalted,
        "halted",
        serde_json::Value::Null,
      ))
      .await
      .unwrap();

    let letters = JsonlDeadLetterWriter::read_all(&path).await.unwrap();
    assert_eq!(letters.len(), 4);
    assert_eq!(letters[2].payload, serde_json::json!({ "n": 2 }));
    assert_eq!(letters[3].reason, DeadLetterReason::SinkHalted);
  }

  #[tokio::test]
  async fn test_queue_consumes_a_stream() {
    let mut dlq = DeadLetterQueue::new();
    let letters = (0..3).map(|i| {
      DeadLetter::new("replay", DeadLetterReason::FatalFlush, i, serde_json::Value::Null)
    });
    dlq
      .consume(Box::pin(futures::stream::iter(letters.collect::<Vec<_>>())))
      .await;
    assert_eq!(dlq.len().await, 3);
  }
}
