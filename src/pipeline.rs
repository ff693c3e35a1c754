//! The salesweave job: one source feeding four sinks.
//!
//! ```text
//!                         ┌─ worker 0 ─┐      ┌─ transactions sink
//! source ── dispatcher ───┼─ worker 1 ─┼──────┼─ sales_per_category sink
//!   (partition mod N)     └─ worker …  ┘      ├─ sales_per_day sink
//!                                             └─ sales_per_month sink
//! ```
//!
//! The dispatcher sends each source record to worker `partition mod workers` over a bounded
//! queue, so records of one partition are handled in order and a slow worker slows the source.
//! A worker:
//!
//! 1. decodes the record (failure: dead letter, then the decode [`ErrorStrategy`]);
//! 2. drops transaction ids it saw within its dedup window;
//! 3. builds the transaction row, which parses the timestamp and checks the amount, the two
//!    fields every key extractor reads; if that fails the event is dead-lettered before any
//!    state changes;
//! 4. submits the raw transaction row;
//! 5. runs each dimension's [`AggregateTransformer::process`] and submits the new snapshots.
//!
//! Aggregates of one key may be updated by several workers. Snapshots carry the cumulative
//! total and a per-key sequence, and the sinks never write an older sequence over a newer one.
//!
//! Cancelling the token stops reading; everything already read is processed and flushed before
//! [`SalesPipeline::run`] returns.
//!
//! # Restarting after a fatal flush
//!
//! A halted sink dead-letters its records with [`DeadLetterReason::FatalFlush`] or
//! [`DeadLetterReason::SinkHalted`]. Aggregate letters hold cumulative totals newer than the
//! table, so they have to reach the table before state is restored from it, and must not be
//! written after new totals have been built on top. The order is:
//!
//! 1. fix the store;
//! 2. [`replay_dead_letters`] into it, which also removes the replayed letters;
//! 3. start the pipeline with `restore_from_store`.
//!
//! [`SalesPipelineBuilder::build`] does step 2 itself when `replay_dead_letters` is set, and
//! refuses to restore with [`PipelineError::UnreplayedDeadLetters`] when it is not.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, SinkConfig};
use crate::consumers::dead_letter_queue::{
  DeadLetter, DeadLetterQueue, DeadLetterReason, DeadLetterSink, route,
};
use crate::consumers::upsert_sink::{BatchedUpsertSink, SinkHandle, SinkHealth, SinkReport};
use crate::db::{ToRow, UpsertStore};
use crate::error::{
  ComponentInfo, DeadLetterError, DeserializationError, ErrorAction, ErrorContext, ErrorStrategy,
  FatalFlushError, MalformedEventError, PipelineError, StreamError,
};
use crate::extract::{
  CategoryExtractor, CategoryKey, Clock, DailyExtractor, DailyKey, Dimension, KeyExtractor,
  MonthlyExtractor, MonthlyKey, SystemClock, TimeResolver,
};
use crate::metrics;
use crate::producer::Producer;
use crate::state::{AggregateSnapshot, InMemoryKeyedStore, KeyedStateStore};
use crate::stateful_transformer::{AggregateError, AggregateTransformer};
use crate::transaction::{SourceRecord, Transaction, TransactionRow};

const DECODER: &str = "decoder";
const EXTRACTOR: &str = "extractor";

/// Counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
  /// Records read from the source.
  pub received: u64,
  /// Records decoded into transactions.
  pub decoded: u64,
  /// Transactions dropped as redeliveries.
  pub duplicates: u64,
  /// Transactions rejected by a key extractor.
  pub malformed: u64,
  /// Records the workers sent to the dead-letter path. Sinks count their own.
  pub dead_lettered: u64,
  /// Dead letters of workers and sinks that could not be delivered.
  pub dead_letters_lost: u64,
  /// Report of each sink, by sink name.
  pub sinks: BTreeMap<&'static str, SinkReport>,
}

impl PipelineReport {
  /// Report of the sink of `dimension`.
  pub fn sink(&self, dimension: Dimension) -> Option<&SinkReport> {
    self.sinks.get(dimension.as_str())
  }
}

#[derive(Debug, Default)]
struct Counters {
  received: AtomicU64,
  decoded: AtomicU64,
  duplicates: AtomicU64,
  malformed: AtomicU64,
  dead_lettered: AtomicU64,
  dead_letters_lost: AtomicU64,
}

impl Counters {
  fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  fn report(&self) -> PipelineReport {
    PipelineReport {
      received: self.received.load(Ordering::Relaxed),
      decoded: self.decoded.load(Ordering::Relaxed),
      duplicates: self.duplicates.load(Ordering::Relaxed),
      malformed: self.malformed.load(Ordering::Relaxed),
      dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
      dead_letters_lost: self.dead_letters_lost.load(Ordering::Relaxed),
      sinks: BTreeMap::new(),
    }
  }
}

struct Stages {
  category: AggregateTransformer<CategoryExtractor>,
  daily: AggregateTransformer<DailyExtractor>,
  monthly: AggregateTransformer<MonthlyExtractor>,
}

#[derive(Clone)]
struct Sinks {
  transactions: SinkHandle<TransactionRow>,
  category: SinkHandle<AggregateSnapshot<CategoryKey>>,
  daily: SinkHandle<AggregateSnapshot<DailyKey>>,
  monthly: SinkHandle<AggregateSnapshot<MonthlyKey>>,
}

/// Builder of a [`SalesPipeline`].
pub struct SalesPipelineBuilder {
  store: Arc<dyn UpsertStore>,
  dead_letters: Arc<dyn DeadLetterSink>,
  config: PipelineConfig,
  clock: Arc<dyn Clock>,
  category_state: Option<Arc<dyn KeyedStateStore<CategoryKey>>>,
  daily_state: Option<Arc<dyn KeyedStateStore<DailyKey>>>,
  monthly_state: Option<Arc<dyn KeyedStateStore<MonthlyKey>>>,
}

impl SalesPipelineBuilder {
  /// Replaces the pipeline configuration.
  #[must_use]
  pub fn config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }

  /// Sets the clock read under processing time.
  #[must_use]
  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Uses `state` for the per-category totals.
  #[must_use]
  pub fn category_state(mut self, state: Arc<dyn KeyedStateStore<CategoryKey>>) -> Self {
    self.category_state = Some(state);
    self
  }

  /// Uses `state` for the per-day totals.
  #[must_use]
  pub fn daily_state(mut self, state: Arc<dyn KeyedStateStore<DailyKey>>) -> Self {
    self.daily_state = Some(state);
    self
  }

  /// Uses `state` for the per-month totals.
  #[must_use]
  pub fn monthly_state(mut self, state: Arc<dyn KeyedStateStore<MonthlyKey>>) -> Self {
    self.monthly_state = Some(state);
    self
  }

  /// Creates the tables, starts the sinks and, if configured, restores state from the store.
  ///
  /// Restoring first deals with dead-lettered sink records, see the
  /// [module documentation](crate::pipeline#restarting-after-a-fatal-flush).
  pub async fn build(self) -> Result<SalesPipeline, PipelineError> {
    if self.config.restore_from_store {
      if self.config.replay_dead_letters {
        replay_dead_letters(
          Arc::clone(&self.store),
          self.dead_letters.as_ref(),
          &self.config.sink,
        )
        .await?;
      } else {
        refuse_pending_replays(self.dead_letters.as_ref()).await?;
      }
    }

    let time = TimeResolver::new(self.config.time_semantics, self.clock);
    let stages = Stages {
      category: AggregateTransformer::new(
        CategoryExtractor::new(time.clone()),
        self
          .category_state
          .unwrap_or_else(|| Arc::new(InMemoryKeyedStore::new())),
      ),
      daily: AggregateTransformer::new(
        DailyExtractor::new(time.clone()),
        self
          .daily_state
          .unwrap_or_else(|| Arc::new(InMemoryKeyedStore::new())),
      ),
      monthly: AggregateTransformer::new(
        MonthlyExtractor::new(time),
        self
          .monthly_state
          .unwrap_or_else(|| Arc::new(InMemoryKeyedStore::new())),
      ),
    };

    let sinks = Sinks {
      transactions: start_sink(Dimension::Transactions, &self.store, &self.dead_letters, &self.config).await?,
      category: start_sink(Dimension::Category, &self.store, &self.dead_letters, &self.config).await?,
      daily: start_sink(Dimension::Daily, &self.store, &self.dead_letters, &self.config).await?,
      monthly: start_sink(Dimension::Monthly, &self.store, &self.dead_letters, &self.config).await?,
    };

    if self.config.restore_from_store {
      restore(&stages.category, self.store.as_ref()).await?;
      restore(&stages.daily, self.store.as_ref()).await?;
      restore(&stages.monthly, self.store.as_ref()).await?;
    }

    info!(
      workers = self.config.workers,
      time_semantics = ?self.config.time_semantics,
      dedup_window = self.config.dedup_window,
      "Pipeline ready"
    );

    Ok(SalesPipeline {
      config: self.config,
      stages: Arc::new(stages),
      sinks,
      dead_letters: self.dead_letters,
    })
  }
}

async fn start_sink<R: ToRow>(
  dimension: Dimension,
  store: &Arc<dyn UpsertStore>,
  dead_letters: &Arc<dyn DeadLetterSink>,
  config: &PipelineConfig,
) -> Result<SinkHandle<R>, PipelineError> {
  Ok(
    BatchedUpsertSink::<R>::start(
      dimension.as_str(),
      Arc::clone(store),
      Arc::clone(dead_letters),
      config.sink.clone(),
    )
    .await?,
  )
}

async fn restore<E>(stage: &AggregateTransformer<E>, store: &dyn UpsertStore) -> Result<usize, PipelineError>
where
  E: KeyExtractor,
  AggregateSnapshot<E::Key>: ToRow,
{
  let rows = store
    .load_rows(<AggregateSnapshot<E::Key> as ToRow>::schema())
    .await?;
  let snapshots = rows
    .iter()
    .map(<AggregateSnapshot<E::Key> as ToRow>::from_row)
    .collect::<Result<Vec<_>, _>>()?;
  Ok(stage.restore(snapshots)?)
}

/// Whether `letter` is a record a sink gave up on.
fn replayable(letter: &DeadLetter) -> bool {
  matches!(
    letter.reason,
    DeadLetterReason::FatalFlush | DeadLetterReason::SinkHalted
  ) && SINKS.iter().any(|d| d.as_str() == letter.source)
}

const SINKS: [Dimension; 4] = [
  Dimension::Transactions,
  Dimension::Category,
  Dimension::Daily,
  Dimension::Monthly,
];

async fn refuse_pending_replays(dead_letters: &dyn DeadLetterSink) -> Result<(), PipelineError> {
  let letters = dead_letters.letters().await?;
  for dimension in [Dimension::Category, Dimension::Daily, Dimension::Monthly] {
    let count = letters
      .iter()
      .filter(|l| replayable(l) && l.source == dimension.as_str())
      .count();
    if count > 0 {
      return Err(PipelineError::UnreplayedDeadLetters {
        sink: dimension.as_str().to_string(),
        count,
      });
    }
  }
  Ok(())
}

/// Writes every record a sink dead-lettered back to `store`, then removes those letters from
/// `dead_letters`. Returns the number of records replayed per sink.
///
/// Aggregate letters of one key are coalesced to the highest sequence, so the newest total
/// wins. Run this before a pipeline restores state from `store`, never after: a replayed total
/// overwrites whatever the table holds for its key. Nothing is removed unless every sink
/// replayed successfully.
pub async fn replay_dead_letters(
  store: Arc<dyn UpsertStore>,
  dead_letters: &dyn DeadLetterSink,
  config: &SinkConfig,
) -> Result<BTreeMap<&'static str, usize>, PipelineError> {
  let letters: Vec<DeadLetter> = dead_letters
    .letters()
    .await?
    .into_iter()
    .filter(replayable)
    .collect();
  let mut replayed = BTreeMap::new();
  if letters.is_empty() {
    return Ok(replayed);
  }

  replayed.insert(
    Dimension::Transactions.as_str(),
    replay::<TransactionRow>(Dimension::Transactions, &letters, &store, config).await?,
  );
  replayed.insert(
    Dimension::Category.as_str(),
    replay::<AggregateSnapshot<CategoryKey>>(Dimension::Category, &letters, &store, config).await?,
  );
  replayed.insert(
    Dimension::Daily.as_str(),
    replay::<AggregateSnapshot<DailyKey>>(Dimension::Daily, &letters, &store, config).await?,
  );
  replayed.insert(
    Dimension::Monthly.as_str(),
    replay::<AggregateSnapshot<MonthlyKey>>(Dimension::Monthly, &letters, &store, config).await?,
  );

  let removed = dead_letters
    .acknowledge(&|letter: &DeadLetter| letters.contains(letter))
    .await?;
  info!(records = letters.len(), removed, "Replayed dead-lettered sink records");
  Ok(replayed)
}

async fn replay<R: ToRow>(
  dimension: Dimension,
  letters: &[DeadLetter],
  store: &Arc<dyn UpsertStore>,
  config: &SinkConfig,
) -> Result<usize, PipelineError> {
  let records = letters
    .iter()
    .filter(|l| l.source == dimension.as_str())
    .map(DeadLetter::decode::<R>)
    .collect::<Result<Vec<R>, _>>()
    .map_err(DeadLetterError::from)?;
  if records.is_empty() {
    return Ok(0);
  }

  // Records failing again stay in `dead_letters`; this queue only keeps them out of it.
  let sink = BatchedUpsertSink::<R>::start(
    dimension.as_str(),
    Arc::clone(store),
    Arc::new(DeadLetterQueue::new()),
    config.clone(),
  )
  .await?;
  let count = records.len();
  for record in records {
    sink.submit(record).await?;
  }
  sink
    .shutdown()
    .await
    .map_err(|e| PipelineError::FinalFlush(vec![e]))?;
  debug!(sink = dimension.as_str(), records = count, "Replayed sink records");
  Ok(count)
}

/// A built pipeline, ready to [`run`](SalesPipeline::run).
pub struct SalesPipeline {
  config: PipelineConfig,
  stages: Arc<Stages>,
  sinks: Sinks,
  dead_letters: Arc<dyn DeadLetterSink>,
}

impl SalesPipeline {
  /// Starts building a pipeline writing to `store` and dead-lettering to `dead_letters`.
  pub fn builder(store: Arc<dyn UpsertStore>, dead_letters: Arc<dyn DeadLetterSink>) -> SalesPipelineBuilder {
    SalesPipelineBuilder {
      store,
      dead_letters,
      config: PipelineConfig::default(),
      clock: Arc::new(SystemClock),
      category_state: None,
      daily_state: None,
      monthly_state: None,
    }
  }

  /// Health of each sink.
  pub fn sink_health(&self) -> Vec<(Dimension, SinkHealth)> {
    vec![
      (Dimension::Transactions, self.sinks.transactions.health()),
      (Dimension::Category, self.sinks.category.health()),
      (Dimension::Daily, self.sinks.daily.health()),
      (Dimension::Monthly, self.sinks.monthly.health()),
    ]
  }

  /// Runs until the source ends or `cancel` fires, then flushes every sink.
  ///
  /// Returns [`PipelineError::FinalFlush`] if any sink could not write everything it accepted;
  /// every sink is shut down before that is reported.
  pub async fn run<P>(self, mut producer: P, cancel: CancellationToken) -> Result<PipelineReport, PipelineError>
  where
    P: Producer<Output = SourceRecord>,
  {
    let counters = Arc::new(Counters::default());
    let workers = self.config.workers.max(1);

    let mut queues = Vec::with_capacity(workers);
    let mut handles: Vec<JoinHandle<Result<(), PipelineError>>> = Vec::with_capacity(workers);
    for index in 0..workers {
      let (tx, rx) = mpsc::channel(self.config.worker_queue.max(1));
      let worker = Worker {
        index,
        stages: Arc::clone(&self.stages),
        sinks: self.sinks.clone(),
        dead_letters: Arc::clone(&self.dead_letters),
        counters: Arc::clone(&counters),
        dedup: DedupWindow::new(self.config.dedup_window),
        decode_strategy: self.config.decode_error_strategy.clone(),
      };
      queues.push(tx);
      handles.push(tokio::spawn(worker.run(rx)));
    }
    info!(workers, "Pipeline running");

    let stream = producer.produce();
    tokio::pin!(stream);
    loop {
      let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          info!("Cancellation requested, draining pipeline");
          break;
        }
        next = stream.next() => next,
      };
      let Some(record) = next else {
        info!("Source exhausted, draining pipeline");
        break;
      };
      Counters::bump(&counters.received);
      let worker = worker_for(record.partition, workers);
      if queues[worker].send(record).await.is_err() {
        warn!(worker, "Worker stopped, no longer reading the source");
        break;
      }
    }
    drop(queues);

    let mut first_error = None;
    for (index, handle) in handles.into_iter().enumerate() {
      let outcome = handle.await.unwrap_or_else(|e| {
        Err(PipelineError::Worker {
          worker: index,
          message: e.to_string(),
        })
      });
      if let Err(e) = outcome {
        error!(worker = index, error = %e, "Worker failed");
        first_error.get_or_insert(e);
      }
    }

    let mut report = counters.report();
    let mut failures = Vec::new();
    let Sinks {
      transactions,
      category,
      daily,
      monthly,
    } = self.sinks;
    shut_down(&mut report, &mut failures, Dimension::Transactions, transactions).await;
    shut_down(&mut report, &mut failures, Dimension::Category, category).await;
    shut_down(&mut report, &mut failures, Dimension::Daily, daily).await;
    shut_down(&mut report, &mut failures, Dimension::Monthly, monthly).await;

    if !failures.is_empty() {
      let err = PipelineError::FinalFlush(failures);
      error!(
        error = %err,
        dead_letters_lost = report.dead_letters_lost,
        "Pipeline stopped with unflushed records"
      );
      return Err(err);
    }
    if report.dead_letters_lost > 0 {
      let err = PipelineError::DeadLettersLost {
        count: report.dead_letters_lost,
      };
      error!(error = %err, "Pipeline stopped after losing dead letters");
      return Err(err);
    }
    if let Some(err) = first_error {
      return Err(err);
    }
    info!(
      received = report.received,
      decoded = report.decoded,
      duplicates = report.duplicates,
      dead_lettered = report.dead_lettered,
      "Pipeline stopped"
    );
    Ok(report)
  }
}

async fn shut_down<R: ToRow>(
  report: &mut PipelineReport,
  failures: &mut Vec<FatalFlushError>,
  dimension: Dimension,
  sink: SinkHandle<R>,
) {
  let lost = sink.lost_counter();
  let outcome = sink.shutdown().await;
  report.dead_letters_lost += lost.load(Ordering::Relaxed);
  match outcome {
    Ok(sink_report) => {
      report.sinks.insert(dimension.as_str(), sink_report);
    }
    Err(e) => failures.push(e),
  }
}

/// Worker owning source partitions `p` with `p mod workers == index`.
pub fn worker_for(partition: i32, workers: usize) -> usize {
  i64::from(partition).rem_euclid(workers.max(1) as i64) as usize
}

/// Remembers the last `capacity` transaction ids.
#[derive(Debug)]
struct DedupWindow {
  capacity: usize,
  order: VecDeque<String>,
  seen: HashSet<String>,
}

impl DedupWindow {
  fn new(capacity: usize) -> Self {
    Self {
      capacity,
      order: VecDeque::with_capacity(capacity.min(1024)),
      seen: HashSet::with_capacity(capacity.min(1024)),
    }
  }

  /// Records `id`; false if it is already in the window.
  fn insert(&mut self, id: &str) -> bool {
    if self.capacity == 0 {
      return true;
    }
    if self.seen.contains(id) {
      return false;
    }
    if self.order.len() == self.capacity {
      if let Some(evicted) = self.order.pop_front() {
        self.seen.remove(&evicted);
      }
    }
    self.order.push_back(id.to_string());
    self.seen.insert(id.to_string());
    true
  }
}

struct Worker {
  index: usize,
  stages: Arc<Stages>,
  sinks: Sinks,
  dead_letters: Arc<dyn DeadLetterSink>,
  counters: Arc<Counters>,
  dedup: DedupWindow,
  decode_strategy: ErrorStrategy<SourceRecord>,
}

impl Worker {
  async fn run(mut self, mut rx: mpsc::Receiver<SourceRecord>) -> Result<(), PipelineError> {
    debug!(worker = self.index, "Worker started");
    while let Some(record) = rx.recv().await {
      self.handle(record).await?;
    }
    debug!(worker = self.index, "Worker drained");
    Ok(())
  }

  async fn handle(&mut self, record: SourceRecord) -> Result<(), PipelineError> {
    let tx = match Transaction::decode(&record) {
      Ok(tx) => tx,
      Err(e) => return self.decode_failed(record, e).await,
    };
    Counters::bump(&self.counters.decoded);
    metrics::record_event(Dimension::Transactions.as_str());

    if !self.dedup.insert(&tx.transaction_id) {
      Counters::bump(&self.counters.duplicates);
      debug!(
        worker = self.index,
        transaction_id = %tx.transaction_id,
        "Dropping redelivered transaction"
      );
      return Ok(());
    }

    let row = match TransactionRow::new(tx.clone()) {
      Ok(row) => row,
      Err(e) => {
        self.malformed(&tx, e).await;
        return Ok(());
      }
    };

    submit(&self.sinks.transactions, row).await;
    self.fold(&self.stages.category, &self.sinks.category, &tx).await;
    self.fold(&self.stages.daily, &self.sinks.daily, &tx).await;
    self.fold(&self.stages.monthly, &self.sinks.monthly, &tx).await;
    Ok(())
  }

  async fn fold<E>(
    &self,
    stage: &AggregateTransformer<E>,
    sink: &SinkHandle<AggregateSnapshot<E::Key>>,
    tx: &Transaction,
  ) where
    E: KeyExtractor,
    AggregateSnapshot<E::Key>: ToRow,
  {
    match stage.process(tx) {
      Ok(snapshot) => submit(sink, snapshot).await,
      Err(AggregateError::Malformed(e)) => self.malformed(tx, e).await,
      Err(AggregateError::State(e)) => {
        self
          .dead_letter(DeadLetter::for_record(
            stage.dimension().as_str(),
            DeadLetterReason::StateCorruption,
            &e,
            tx,
          ))
          .await;
      }
    }
  }

  async fn malformed(&self, tx: &Transaction, e: MalformedEventError) {
    Counters::bump(&self.counters.malformed);
    self
      .dead_letter(DeadLetter::for_record(
        EXTRACTOR,
        DeadLetterReason::MalformedEvent,
        &e,
        tx,
      ))
      .await;
  }

  async fn decode_failed(
    &self,
    record: SourceRecord,
    e: DeserializationError,
  ) -> Result<(), PipelineError> {
    self
      .dead_letter(DeadLetter::new(
        DECODER,
        DeadLetterReason::Deserialization,
        &e,
        record.payload_json(),
      ))
      .await;

    let error = StreamError::new(
      Box::new(e.clone()),
      ErrorContext {
        timestamp: chrono::Utc::now(),
        item: Some(record),
        component_name: DECODER.to_string(),
        component_type: std::any::type_name::<Self>().to_string(),
      },
      ComponentInfo::new(DECODER.to_string(), std::any::type_name::<Self>().to_string()),
    );
    match self.decode_strategy.action_for(&error) {
      ErrorAction::Stop => {
        error!(worker = self.index, error = %e, "Stopping on undecodable record");
        Err(PipelineError::Deserialization(e))
      }
      ErrorAction::Skip | ErrorAction::Retry => Ok(()),
    }
  }

  async fn dead_letter(&self, letter: DeadLetter) {
    Counters::bump(&self.counters.dead_lettered);
    if route(self.dead_letters.as_ref(), letter).await.is_err() {
      Counters::bump(&self.counters.dead_letters_lost);
    }
  }
}

/// Submits to a sink. A refused record was dead-lettered by the sink.
async fn submit<R: ToRow>(sink: &SinkHandle<R>, record: R) {
  if let Err(e) = sink.submit(record).await {
    debug!(sink = sink.name(), error = %e, "Sink refused record");
  }
}
