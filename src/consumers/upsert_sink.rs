//! Batched idempotent upsert sink.
//!
//! One sink owns one table. Records are submitted through a [`SinkHandle`] and collected by an
//! accumulator task that writes them in batches:
//!
//! - a batch is flushed when it holds `batch_size` records or when its oldest record has waited
//!   `batch_interval`, whichever comes first;
//! - at most one batch is in flight; the next one accumulates meanwhile and is capped at
//!   `batch_size`, after which `submit` waits (backpressure);
//! - records sharing a primary key within a batch are coalesced into the newest one;
//! - a record whose per-key sequence is not newer than the last one written is dropped, so a
//!   write can never move a row backwards;
//! - transient store errors retry the same batch up to `max_retries` times with linear
//!   backoff, anything else (or exhaustion) is a [`FatalFlushError`].
//!
//! A fatal failure halts the sink: the failed batch and every record still buffered or
//! submitted later goes to the dead-letter path, and [`SinkHealth::Halted`] is published on the
//! health channel. Rows already committed stay committed.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::config::SinkConfig;
use crate::consumer::{Consumer, ConsumerConfig};
use crate::consumers::dead_letter_queue::{DeadLetter, DeadLetterReason, DeadLetterSink, route};
use crate::db::{DatabaseRow, RowKey, TableSchema, ToRow, UpsertStore};
use crate::error::{
  ErrorAction, ErrorStrategy, FatalFlushError, SinkError, StoreError, StreamError,
};
use crate::input::Input;
use crate::metrics;

/// Health of a sink, as published on its health channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkHealth {
  /// Accepting and flushing records.
  Running,
  /// Stopped flushing after a fatal failure; records are dead-lettered.
  Halted(FatalFlushError),
  /// Shut down.
  Closed,
}

/// Counters of one sink, returned on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkReport {
  /// Records received by the accumulator.
  pub submitted: u64,
  /// Rows committed.
  pub rows_written: u64,
  /// Batches committed.
  pub batches: u64,
  /// Retried attempts over all batches.
  pub retries: u64,
  /// Records replaced by a newer record with the same key in the same batch.
  pub coalesced: u64,
  /// Records dropped because a newer one had already been written.
  pub stale_dropped: u64,
  /// Records sent to the dead-letter path.
  pub dead_lettered: u64,
  /// Dead letters that could not be delivered, by the sink or its handles.
  pub dead_letters_lost: u64,
  /// Most records buffered at once, the in-flight batch excluded.
  pub peak_buffered: usize,
}

enum Command<R> {
  Record(R),
  Flush(oneshot::Sender<Result<(), FatalFlushError>>),
  Shutdown(oneshot::Sender<Result<SinkReport, FatalFlushError>>),
}

struct FlushOutcome {
  result: Result<u64, FatalFlushError>,
  retries: u32,
}

struct InFlight<R> {
  batch: Vec<R>,
  handle: JoinHandle<FlushOutcome>,
}

/// Accumulator state of a batched upsert sink. Create one with [`BatchedUpsertSink::start`].
pub struct BatchedUpsertSink<R: ToRow> {
  name: String,
  store: Arc<dyn UpsertStore>,
  dead_letters: Arc<dyn DeadLetterSink>,
  config: SinkConfig,
  buffer: Vec<R>,
  oldest: Option<Instant>,
  high_water: HashMap<RowKey, u64>,
  in_flight: Option<InFlight<R>>,
  halted: Option<FatalFlushError>,
  report: SinkReport,
  health: watch::Sender<SinkHealth>,
  buffered: Arc<AtomicUsize>,
  lost: Arc<AtomicU64>,
}

impl<R: ToRow> BatchedUpsertSink<R> {
  /// Creates the sink's table if needed and starts its accumulator task.
  pub async fn start(
    name: impl Into<String>,
    store: Arc<dyn UpsertStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    mut config: SinkConfig,
  ) -> Result<SinkHandle<R>, StoreError> {
    let name = name.into();
    store.ensure_table(R::schema()).await?;
    config.batch_size = config.batch_size.max(1);

    let (tx, rx) = mpsc::channel(1);
    let (health, health_rx) = watch::channel(SinkHealth::Running);
    let buffered = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicU64::new(0));

    info!(
      sink = %name,
      table = R::schema().name,
      batch_size = config.batch_size,
      batch_interval_ms = config.batch_interval.as_millis() as u64,
      max_retries = config.max_retries,
      "Starting upsert sink"
    );

    let sink = Self {
      name: name.clone(),
      store,
      dead_letters: Arc::clone(&dead_letters),
      config,
      buffer: Vec::new(),
      oldest: None,
      high_water: HashMap::new(),
      in_flight: None,
      halted: None,
      report: SinkReport::default(),
      health,
      buffered: Arc::clone(&buffered),
      lost: Arc::clone(&lost),
    };
    tokio::spawn(sink.run(rx));

    Ok(SinkHandle {
      config: ConsumerConfig::default()
        .with_name(name.clone())
        .with_error_strategy(ErrorStrategy::Skip),
      name,
      tx,
      health: health_rx,
      dead_letters,
      buffered,
      lost,
    })
  }

  async fn run(mut self, mut rx: mpsc::Receiver<Command<R>>) {
    loop {
      let deadline = self.oldest.map(|t| t + self.config.batch_interval);
      let accepting = self.buffer.len() < self.config.batch_size;
      let waiting_on_timer = deadline.is_some() && self.in_flight.is_none();

      tokio::select! {
        biased;
        joined = wait_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
          self.complete(joined).await;
          self.dispatch_if_due().await;
        }
        command = rx.recv(), if accepting => match command {
          Some(Command::Record(record)) => {
            self.push(record).await;
            self.dispatch_if_due().await;
          }
          Some(Command::Flush(reply)) => {
            let _ = reply.send(self.drain().await);
          }
          Some(Command::Shutdown(reply)) => {
            let result = self.drain().await.map(|()| self.final_report());
            self.close();
            let _ = reply.send(result);
            return;
          }
          None => {
            if let Err(e) = self.drain().await {
              error!(sink = %self.name, error = %e, "Final flush failed after all handles dropped");
            }
            self.close();
            return;
          }
        },
        _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if waiting_on_timer => {
          self.dispatch().await;
        }
      }
    }
  }

  async fn push(&mut self, record: R) {
    self.report.submitted += 1;
    if let Some(fatal) = &self.halted {
      let letter = DeadLetter::for_record(&self.name, DeadLetterReason::SinkHalted, fatal, &record);
      if route(self.dead_letters.as_ref(), letter).await.is_err() {
        self.lost.fetch_add(1, Ordering::Relaxed);
      }
      self.report.dead_lettered += 1;
      return;
    }
    if self.buffer.is_empty() {
      self.oldest = Some(Instant::now());
    }
    self.buffer.push(record);
    self.report.peak_buffered = self.report.peak_buffered.max(self.buffer.len());
    self.publish_buffered();
  }

  async fn dispatch_if_due(&mut self) {
    if self.in_flight.is_some() || self.buffer.is_empty() {
      return;
    }
    let due = self
      .oldest
      .is_some_and(|t| t + self.config.batch_interval <= Instant::now());
    if self.buffer.len() >= self.config.batch_size || due {
      self.dispatch().await;
    }
  }

  async fn dispatch(&mut self) {
    let records = std::mem::take(&mut self.buffer);
    self.oldest = None;
    self.publish_buffered();
    if records.is_empty() {
      return;
    }
    if let Some(fatal) = self.halted.clone() {
      self
        .dead_letter_all(records, DeadLetterReason::SinkHalted, &fatal)
        .await;
      return;
    }

    let batch = self.prepare(records);
    if batch.is_empty() {
      return;
    }
    let rows: Vec<DatabaseRow> = batch.iter().map(ToRow::to_row).collect();
    debug!(sink = %self.name, records = rows.len(), "Dispatching batch");
    let handle = tokio::spawn(write_with_retry(
      Arc::clone(&self.store),
      R::schema(),
      rows,
      self.name.clone(),
      self.config.clone(),
    ));
    self.in_flight = Some(InFlight { batch, handle });
  }

  /// Coalesces records by key and drops records older than what was already written.
  fn prepare(&mut self, records: Vec<R>) -> Vec<R> {
    let mut slots: HashMap<RowKey, usize> = HashMap::with_capacity(records.len());
    let mut batch: Vec<R> = Vec::with_capacity(records.len());
    for record in records {
      let key = record.key();
      match slots.get(&key) {
        Some(&slot) => {
          self.report.coalesced += 1;
          if supersedes(&record, &batch[slot]) {
            batch[slot] = record;
          }
        }
        None => {
          slots.insert(key, batch.len());
          batch.push(record);
        }
      }
    }

    let before = batch.len();
    let high_water = &mut self.high_water;
    batch.retain(|record| {
      let Some(sequence) = record.sequence() else {
        return true;
      };
      let key = record.key();
      match high_water.get(&key) {
        Some(&written) if sequence <= written => false,
        _ => {
          high_water.insert(key, sequence);
          true
        }
      }
    });
    let dropped = before - batch.len();
    if dropped > 0 {
      debug!(sink = %self.name, dropped, "Dropped stale records");
      self.report.stale_dropped += dropped as u64;
    }
    batch
  }

  async fn complete(&mut self, joined: Result<FlushOutcome, JoinError>) {
    let Some(in_flight) = self.in_flight.take() else {
      return;
    };
    let records = in_flight.batch.len();
    let outcome = joined.unwrap_or_else(|e| FlushOutcome {
      result: Err(FatalFlushError {
        sink: self.name.clone(),
        records,
        attempts: 1,
        last_error: StoreError::Permanent(format!("flush task failed: {}", e)),
      }),
      retries: 0,
    });
    self.report.retries += u64::from(outcome.retries);

    match outcome.result {
      Ok(written) => {
        self.report.rows_written += written;
        self.report.batches += 1;
        metrics::record_rows_flushed(&self.name, written);
        debug!(
          sink = %self.name,
          rows = written,
          retries = outcome.retries,
          "Batch committed"
        );
      }
      Err(fatal) => self.halt(fatal, in_flight.batch).await,
    }
  }

  async fn halt(&mut self, fatal: FatalFlushError, batch: Vec<R>) {
    error!(
      sink = %self.name,
      records = fatal.records,
      attempts = fatal.attempts,
      error = %fatal.last_error,
      "Upsert sink halted after fatal flush failure"
    );
    metrics::record_fatal_flush(&self.name);

    self
      .dead_letter_all(batch, DeadLetterReason::FatalFlush, &fatal)
      .await;
    let buffered = std::mem::take(&mut self.buffer);
    self.oldest = None;
    self.publish_buffered();
    self
      .dead_letter_all(buffered, DeadLetterReason::FatalFlush, &fatal)
      .await;

    self.health.send_replace(SinkHealth::Halted(fatal.clone()));
    self.halted = Some(fatal);
  }

  async fn dead_letter_all(&mut self, records: Vec<R>, reason: DeadLetterReason, fatal: &FatalFlushError) {
    for record in &records {
      let letter = DeadLetter::for_record(&self.name, reason, fatal, record);
      if route(self.dead_letters.as_ref(), letter).await.is_err() {
        self.lost.fetch_add(1, Ordering::Relaxed);
      }
    }
    self.report.dead_lettered += records.len() as u64;
  }

  /// Writes everything accepted so far. Fails if the sink has halted at any point.
  async fn drain(&mut self) -> Result<(), FatalFlushError> {
    loop {
      if let Some(in_flight) = self.in_flight.as_mut() {
        let joined = (&mut in_flight.handle).await;
        self.complete(joined).await;
      }
      if self.buffer.is_empty() {
        break;
      }
      self.dispatch().await;
    }
    match &self.halted {
      Some(fatal) => Err(fatal.clone()),
      None => Ok(()),
    }
  }

  fn final_report(&self) -> SinkReport {
    SinkReport {
      dead_letters_lost: self.lost.load(Ordering::Relaxed),
      ..self.report
    }
  }

  fn close(&mut self) {
    if self.halted.is_none() {
      self.health.send_replace(SinkHealth::Closed);
    }
    info!(
      sink = %self.name,
      rows = self.report.rows_written,
      batches = self.report.batches,
      dead_lettered = self.report.dead_lettered,
      dead_letters_lost = self.lost.load(Ordering::Relaxed),
      "Upsert sink closed"
    );
  }

  fn publish_buffered(&self) {
    self.buffered.store(self.buffer.len(), Ordering::Relaxed);
    metrics::record_sink_buffered(&self.name, self.buffer.len());
  }
}

/// Whether `candidate` should replace `current` when both have the same key.
fn supersedes<R: ToRow>(candidate: &R, current: &R) -> bool {
  match (candidate.sequence(), current.sequence()) {
    (Some(new), Some(old)) => new >= old,
    _ => true,
  }
}

async fn wait_in_flight<R>(in_flight: &mut Option<InFlight<R>>) -> Result<FlushOutcome, JoinError> {
  match in_flight {
    Some(in_flight) => (&mut in_flight.handle).await,
    None => std::future::pending().await,
  }
}

async fn write_with_retry(
  store: Arc<dyn UpsertStore>,
  schema: &'static TableSchema,
  rows: Vec<DatabaseRow>,
  sink: String,
  config: SinkConfig,
) -> FlushOutcome {
  let mut attempt: u32 = 0;
  loop {
    attempt += 1;
    match store.upsert_batch(schema, &rows).await {
      Ok(written) => {
        return FlushOutcome {
          result: Ok(written),
          retries: attempt - 1,
        };
      }
      Err(e) if e.is_transient() && attempt <= config.max_retries => {
        warn!(
          sink = %sink,
          attempt,
          max_retries = config.max_retries,
          error = %e,
          "Transient flush failure, retrying batch"
        );
        metrics::record_flush_retry(&sink);
        tokio::time::sleep(config.retry_backoff * attempt).await;
      }
      Err(e) => {
        return FlushOutcome {
          result: Err(FatalFlushError {
            sink,
            records: rows.len(),
            attempts: attempt,
            last_error: e,
          }),
          retries: attempt - 1,
        };
      }
    }
  }
}

/// Handle to a running [`BatchedUpsertSink`]. Clones feed the same sink.
pub struct SinkHandle<R: ToRow> {
  name: String,
  tx: mpsc::Sender<Command<R>>,
  health: watch::Receiver<SinkHealth>,
  dead_letters: Arc<dyn DeadLetterSink>,
  buffered: Arc<AtomicUsize>,
  lost: Arc<AtomicU64>,
  config: ConsumerConfig<R>,
}

impl<R: ToRow> Clone for SinkHandle<R> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      tx: self.tx.clone(),
      health: self.health.clone(),
      dead_letters: Arc::clone(&self.dead_letters),
      buffered: Arc::clone(&self.buffered),
      lost: Arc::clone(&self.lost),
      config: self.config.clone(),
    }
  }
}

impl<R: ToRow> fmt::Debug for SinkHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SinkHandle")
      .field("name", &self.name)
      .field("table", &R::schema().name)
      .field("health", &*self.health.borrow())
      .finish()
  }
}

impl<R: ToRow> SinkHandle<R> {
  /// Sink name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Hands `record` to the sink, waiting while the sink is at capacity.
  ///
  /// A refused record has been dead-lettered by the time the error is returned.
  pub async fn submit(&self, record: R) -> Result<(), SinkError> {
    let health = self.health.borrow().clone();
    match health {
      SinkHealth::Halted(fatal) => {
        let letter = DeadLetter::for_record(&self.name, DeadLetterReason::SinkHalted, &fatal, &record);
        self.route(letter).await;
        return Err(SinkError::Halted {
          sink: self.name.clone(),
          reason: fatal.to_string(),
        });
      }
      SinkHealth::Closed => return Err(self.refuse_closed(record).await),
      SinkHealth::Running => {}
    }
    if let Err(mpsc::error::SendError(command)) = self.tx.send(Command::Record(record)).await {
      return Err(match command {
        Command::Record(record) => self.refuse_closed(record).await,
        _ => self.closed(),
      });
    }
    Ok(())
  }

  async fn refuse_closed(&self, record: R) -> SinkError {
    let error = self.closed();
    let letter = DeadLetter::for_record(&self.name, DeadLetterReason::SinkHalted, &error, &record);
    self.route(letter).await;
    error
  }

  async fn route(&self, letter: DeadLetter) {
    if route(self.dead_letters.as_ref(), letter).await.is_err() {
      self.lost.fetch_add(1, Ordering::Relaxed);
    }
  }

  fn closed(&self) -> SinkError {
    SinkError::Closed {
      sink: self.name.clone(),
    }
  }

  /// Writes everything submitted so far and waits for it to commit.
  pub async fn flush(&self) -> Result<(), FatalFlushError> {
    let (reply, response) = oneshot::channel();
    if self.tx.send(Command::Flush(reply)).await.is_err() {
      return Err(self.gone());
    }
    response.await.unwrap_or_else(|_| Err(self.gone()))
  }

  /// Flushes what is left and stops the sink. Fails if the sink halted at any point.
  pub async fn shutdown(self) -> Result<SinkReport, FatalFlushError> {
    let (reply, response) = oneshot::channel();
    if self.tx.send(Command::Shutdown(reply)).await.is_err() {
      return Err(self.gone());
    }
    response.await.unwrap_or_else(|_| Err(self.gone()))
  }

  fn gone(&self) -> FatalFlushError {
    if let SinkHealth::Halted(fatal) = &*self.health.borrow() {
      return fatal.clone();
    }
    FatalFlushError {
      sink: self.name.clone(),
      records: 0,
      attempts: 0,
      last_error: StoreError::Permanent("sink task is not running".to_string()),
    }
  }

  /// Current health.
  pub fn health(&self) -> SinkHealth {
    self.health.borrow().clone()
  }

  /// A receiver notified on every health change.
  pub fn watch_health(&self) -> watch::Receiver<SinkHealth> {
    self.health.clone()
  }

  /// Records waiting for the next batch.
  pub fn buffered(&self) -> usize {
    self.buffered.load(Ordering::Relaxed)
  }

  /// Dead letters of this sink that could not be delivered so far.
  pub fn dead_letters_lost(&self) -> u64 {
    self.lost.load(Ordering::Relaxed)
  }

  /// Counter behind [`dead_letters_lost`](Self::dead_letters_lost), readable after shutdown.
  pub(crate) fn lost_counter(&self) -> Arc<AtomicU64> {
    Arc::clone(&self.lost)
  }
}

impl<R: ToRow> Input for SinkHandle<R> {
  type Input = R;
  type InputStream = Pin<Box<dyn Stream<Item = R> + Send>>;
}

#[async_trait]
impl<R: ToRow> Consumer for SinkHandle<R> {
  async fn consume(&mut self, mut stream: Self::InputStream) {
    while let Some(record) = stream.next().await {
      let Err(e) = self.submit(record.clone()).await else {
        continue;
      };
      let error = StreamError::new(
        Box::new(e),
        self.create_error_context(Some(record)),
        self.component_info(),
      );
      match self.handle_error(&error) {
        ErrorAction::Stop => {
          error!(sink = %self.name, error = %error, "Stopping consumption");
          break;
        }
        ErrorAction::Skip | ErrorAction::Retry => {
          warn!(sink = %self.name, error = %error, "Record refused and dead-lettered");
        }
      }
    }
  }

  fn set_config_impl(&mut self, config: ConsumerConfig<R>) {
    self.config = config;
  }

  fn get_config_impl(&self) -> &ConsumerConfig<R> {
    &self.config
  }

  fn get_config_mut_impl(&mut self) -> &mut ConsumerConfig<R> {
    &mut self.config
  }
}
