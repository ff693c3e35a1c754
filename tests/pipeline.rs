//! End-to-end runs of the sales pipeline against the in-memory store.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use rust_decimal::Decimal;
use salesweave::config::{PipelineConfig, SinkConfig};
use salesweave::consumers::{
  BatchedUpsertSink, DeadLetter, DeadLetterQueue, DeadLetterReason, DeadLetterSink, InMemoryStore,
  SinkHealth,
};
use salesweave::db::{RowKey, SqlValue};
use salesweave::error::{DeadLetterError, ErrorStrategy, PipelineError};
use salesweave::extract::{DailyKey, Dimension, FixedClock, TimeSemantics};
use salesweave::pipeline::{PipelineReport, SalesPipeline, replay_dead_letters};
use salesweave::producers::{TokioChannelProducer, VecProducer};
use salesweave::schema::{SALES_PER_CATEGORY, SALES_PER_DAY, SALES_PER_MONTH, TRANSACTIONS};
use salesweave::state::AggregateSnapshot;
use salesweave::transaction::SourceRecord;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn dec(s: &str) -> Decimal {
  Decimal::from_str(s).unwrap()
}

fn date(s: &str) -> NaiveDate {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn record(partition: i32, offset: i64, id: &str, category: &str, amount: &str, at: &str) -> SourceRecord {
  let payload = json!({
    "transactionId": id,
    "productId": "product1",
    "productName": "laptop",
    "productCategory": category,
    "productPrice": dec(amount),
    "productQuantity": 1,
    "productBrand": "apple",
    "totalAmount": dec(amount),
    "currency": "USD",
    "customerId": "jdoe",
    "transactionDate": at,
    "paymentMethod": "credit_card",
  });
  SourceRecord::json(partition, offset, &payload).unwrap()
}

fn fast_sinks() -> SinkConfig {
  SinkConfig::default()
    .with_batch_size(3)
    .with_batch_interval(Duration::from_millis(10))
    .with_max_retries(5)
    .with_retry_backoff(Duration::from_millis(1))
}

fn config() -> PipelineConfig {
  PipelineConfig::default().with_workers(2).with_sink(fast_sinks())
}

async fn run(
  store: &InMemoryStore,
  dead_letters: &DeadLetterQueue,
  config: PipelineConfig,
  records: Vec<SourceRecord>,
) -> Result<PipelineReport, PipelineError> {
  let pipeline = SalesPipeline::builder(Arc::new(store.clone()), Arc::new(dead_letters.clone()))
    .config(config)
    .build()
    .await?;
  pipeline
    .run(VecProducer::new(records), CancellationToken::new())
    .await
}

fn total(store: &InMemoryStore, table: &'static salesweave::db::TableSchema, key: Vec<SqlValue>) -> Option<Decimal> {
  store
    .row(table, &RowKey(key))
    .map(|row| row.numeric(table, "total_sales").unwrap())
}

fn category_total(store: &InMemoryStore, day: &str, category: &str) -> Option<Decimal> {
  total(
    store,
    &SALES_PER_CATEGORY,
    vec![SqlValue::Date(date(day)), SqlValue::Text(category.to_string())],
  )
}

fn day_total(store: &InMemoryStore, day: &str) -> Option<Decimal> {
  total(store, &SALES_PER_DAY, vec![SqlValue::Date(date(day))])
}

fn month_total(store: &InMemoryStore, year: i32, month: i32) -> Option<Decimal> {
  total(
    store,
    &SALES_PER_MONTH,
    vec![SqlValue::Integer(year), SqlValue::Integer(month)],
  )
}

#[tokio::test]
async fn test_same_category_and_day_accumulate() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  let report = run(
    &store,
    &dlq,
    config(),
    vec![
      record(0, 0, "t-1", "electronics", "10.00", "2024-03-01T10:00:00"),
      record(0, 1, "t-2", "electronics", "15.00", "2024-03-01T17:30:00"),
    ],
  )
  .await
  .unwrap();

  assert_eq!(report.received, 2);
  assert_eq!(report.decoded, 2);
  assert_eq!(category_total(&store, "2024-03-01", "electronics"), Some(dec("25.00")));
  assert_eq!(day_total(&store, "2024-03-01"), Some(dec("25.00")));
  assert_eq!(month_total(&store, 2024, 3), Some(dec("25.00")));
  assert_eq!(store.rows(&TRANSACTIONS).len(), 2);
  assert!(dlq.is_empty().await);
}

#[tokio::test]
async fn test_days_split_but_month_accumulates() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  run(
    &store,
    &dlq,
    config(),
    vec![
      record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
      record(1, 0, "t-2", "toys", "5", "2024-01-20T09:00:00"),
    ],
  )
  .await
  .unwrap();

  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("10")));
  assert_eq!(day_total(&store, "2024-01-20"), Some(dec("5")));
  assert_eq!(store.rows(&SALES_PER_DAY).len(), 2);
  assert_eq!(month_total(&store, 2024, 1), Some(dec("15")));
  assert_eq!(store.rows(&SALES_PER_MONTH).len(), 1);
}

#[tokio::test]
async fn test_transient_failures_do_not_change_results() {
  let records = vec![
    record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
    record(0, 1, "t-2", "books", "7.5", "2024-01-05T10:00:00"),
    record(1, 0, "t-3", "toys", "2.5", "2024-01-06T10:00:00"),
  ];

  let healthy = InMemoryStore::new();
  run(&healthy, &DeadLetterQueue::new(), config(), records.clone())
    .await
    .unwrap();

  let flaky = InMemoryStore::new();
  flaky.fail_next(2, true);
  let dlq = DeadLetterQueue::new();
  let report = run(&flaky, &dlq, config(), records).await.unwrap();

  let retries: u64 = report.sinks.values().map(|sink| sink.retries).sum();
  assert_eq!(retries, 2);
  assert!(dlq.is_empty().await);
  for table in [&TRANSACTIONS, &SALES_PER_CATEGORY, &SALES_PER_DAY, &SALES_PER_MONTH] {
    let mut expected = healthy.rows(table);
    let mut actual = flaky.rows(table);
    expected.sort_by_key(|row| format!("{:?}", row));
    actual.sort_by_key(|row| format!("{:?}", row));
    assert_eq!(actual, expected, "table {}", table.name);
  }
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter_batch_and_fail_run() {
  let store = InMemoryStore::new();
  store.fail_next_on(&SALES_PER_DAY, 6, true);
  let dlq = DeadLetterQueue::new();
  let records = vec![
    record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
    record(0, 1, "t-2", "books", "20", "2024-01-05T10:00:00"),
    record(0, 2, "t-3", "toys", "5", "2024-01-05T11:00:00"),
  ];
  let config = PipelineConfig::default()
    .with_workers(1)
    .with_sink(fast_sinks().with_batch_size(100));

  let err = run(&store, &dlq, config, records).await.unwrap_err();
  let PipelineError::FinalFlush(failures) = &err else {
    panic!("expected a final flush failure, got {err}");
  };
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].sink, "sales_per_day");
  assert_eq!(failures[0].attempts, 6);
  assert!(failures[0].last_error.is_transient());

  // The other sinks were unaffected.
  assert_eq!(store.rows(&TRANSACTIONS).len(), 3);
  assert_eq!(month_total(&store, 2024, 1), Some(dec("35")));
  assert_eq!(day_total(&store, "2024-01-05"), None);

  // Replaying the dead letters restores the day without double counting.
  let letters: Vec<AggregateSnapshot<DailyKey>> = dlq
    .items()
    .await
    .into_iter()
    .filter(|letter| letter.source == "sales_per_day")
    .inspect(|letter| {
      assert!(matches!(
        letter.reason,
        DeadLetterReason::FatalFlush | DeadLetterReason::SinkHalted
      ))
    })
    .map(|letter| letter.decode().unwrap())
    .collect();
  assert!(!letters.is_empty());

  let repaired = InMemoryStore::new();
  let sink = BatchedUpsertSink::<AggregateSnapshot<DailyKey>>::start(
    "sales_per_day",
    Arc::new(repaired.clone()),
    Arc::new(DeadLetterQueue::new()),
    fast_sinks(),
  )
  .await
  .unwrap();
  for snapshot in letters {
    sink.submit(snapshot).await.unwrap();
  }
  sink.shutdown().await.unwrap();
  assert_eq!(day_total(&repaired, "2024-01-05"), Some(dec("35")));
}

#[tokio::test]
async fn test_restart_continues_from_stored_totals() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  run(
    &store,
    &dlq,
    config(),
    vec![record(0, 0, "t-1", "electronics", "10", "2024-03-01T10:00:00")],
  )
  .await
  .unwrap();

  run(
    &store,
    &dlq,
    config(),
    vec![record(0, 1, "t-2", "electronics", "5", "2024-03-01T12:00:00")],
  )
  .await
  .unwrap();

  assert_eq!(category_total(&store, "2024-03-01", "electronics"), Some(dec("15")));
  assert_eq!(day_total(&store, "2024-03-01"), Some(dec("15")));
  assert_eq!(month_total(&store, 2024, 3), Some(dec("15")));
}

#[tokio::test]
async fn test_restart_without_restore_starts_from_zero() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  run(
    &store,
    &dlq,
    config(),
    vec![record(0, 0, "t-1", "electronics", "10", "2024-03-01T10:00:00")],
  )
  .await
  .unwrap();
  run(
    &store,
    &dlq,
    config().with_restore_from_store(false),
    vec![record(0, 1, "t-2", "electronics", "5", "2024-03-01T12:00:00")],
  )
  .await
  .unwrap();

  assert_eq!(day_total(&store, "2024-03-01"), Some(dec("5")));
}

#[tokio::test]
async fn test_redelivered_transaction_is_counted_once() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  let report = run(
    &store,
    &dlq,
    config(),
    vec![
      record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
      record(0, 1, "t-2", "books", "4", "2024-01-05T09:30:00"),
      record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
    ],
  )
  .await
  .unwrap();

  assert_eq!(report.duplicates, 1);
  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("14")));
  assert_eq!(store.rows(&TRANSACTIONS).len(), 2);
}

#[tokio::test]
async fn test_bad_records_are_dead_lettered_and_skipped() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  let report = run(
    &store,
    &dlq,
    config(),
    vec![
      record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
      SourceRecord::new(0, 1, b"not json".to_vec()),
      record(0, 2, "t-2", "books", "3", "the day after"),
      record(0, 3, "t-3", "books", "1", "2024-01-05T12:00:00"),
    ],
  )
  .await
  .unwrap();

  assert_eq!(report.received, 4);
  assert_eq!(report.decoded, 3);
  assert_eq!(report.malformed, 1);
  assert_eq!(report.dead_lettered, 2);

  let undecodable = dlq.with_reason(DeadLetterReason::Deserialization).await;
  assert_eq!(undecodable.len(), 1);
  assert_eq!(undecodable[0].source, "decoder");
  assert_eq!(undecodable[0].payload, json!("not json"));

  let malformed = dlq.with_reason(DeadLetterReason::MalformedEvent).await;
  assert_eq!(malformed.len(), 1);
  assert_eq!(malformed[0].payload["transactionId"], json!("t-2"));

  // The malformed event touched no table.
  assert_eq!(store.rows(&TRANSACTIONS).len(), 2);
  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("11")));
}

#[tokio::test]
async fn test_stop_strategy_fails_run_on_undecodable_record() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  let err = run(
    &store,
    &dlq,
    config()
      .with_workers(1)
      .with_decode_error_strategy(ErrorStrategy::Stop),
    vec![
      record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
      SourceRecord::new(0, 1, b"{".to_vec()),
    ],
  )
  .await
  .unwrap_err();

  assert!(matches!(err, PipelineError::Deserialization(ref e) if e.offset == 1));
  assert_eq!(dlq.len().await, 1);
  // What was accepted before the failure is still flushed.
  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("10")));
}

#[tokio::test]
async fn test_processing_time_buckets_by_clock() {
  let store = InMemoryStore::new();
  let now = NaiveDateTime::parse_from_str("2025-06-30 23:59:00", "%Y-%m-%d %H:%M:%S").unwrap();
  let pipeline = SalesPipeline::builder(Arc::new(store.clone()), Arc::new(DeadLetterQueue::new()))
    .config(config().with_time_semantics(TimeSemantics::ProcessingTime))
    .clock(Arc::new(FixedClock(now)))
    .build()
    .await
    .unwrap();
  pipeline
    .run(
      VecProducer::new(vec![
        record(0, 0, "t-1", "books", "2", "2024-01-05T09:00:00"),
        record(1, 0, "t-2", "books", "3", "2023-11-11T09:00:00"),
      ]),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(day_total(&store, "2025-06-30"), Some(dec("5")));
  assert_eq!(month_total(&store, 2025, 6), Some(dec("5")));
  assert_eq!(category_total(&store, "2025-06-30", "books"), Some(dec("5")));
}

#[tokio::test]
async fn test_cancellation_flushes_everything_read() {
  let store = InMemoryStore::new();
  let pipeline = SalesPipeline::builder(Arc::new(store.clone()), Arc::new(DeadLetterQueue::new()))
    .config(config().with_sink(fast_sinks().with_batch_size(100).with_batch_interval(Duration::from_secs(3600))))
    .build()
    .await
    .unwrap();
  assert!(
    pipeline
      .sink_health()
      .iter()
      .all(|(_, health)| *health == SinkHealth::Running)
  );

  let (tx, rx) = mpsc::channel(16);
  let cancel = CancellationToken::new();
  let running = tokio::spawn(pipeline.run(TokioChannelProducer::new(rx), cancel.clone()));

  for (offset, amount) in ["1", "2", "3"].into_iter().enumerate() {
    let id = format!("t-{}", offset);
    tx.send(record(0, offset as i64, &id, "books", amount, "2024-01-05T09:00:00"))
      .await
      .unwrap();
  }
  // Nothing is flushed before shutdown with an hour-long interval.
  tokio::time::sleep(Duration::from_millis(200)).await;
  assert!(store.rows(&TRANSACTIONS).is_empty());

  cancel.cancel();
  let report = running.await.unwrap().unwrap();
  drop(tx);

  assert_eq!(report.received, 3);
  assert_eq!(report.sink(Dimension::Transactions).unwrap().rows_written, 3);
  assert_eq!(store.rows(&TRANSACTIONS).len(), 3);
  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("6")));
}

#[tokio::test]
async fn test_unmultipliable_amount_is_dead_lettered_and_partition_continues() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  let overflowing = SourceRecord::json(
    0,
    0,
    &json!({
      "transactionId": "t-huge",
      "productId": "product1",
      "productName": "laptop",
      "productCategory": "books",
      "productPrice": "79228162514264337593543950335",
      "productQuantity": 2,
      "productBrand": "apple",
      "currency": "USD",
      "customerId": "jdoe",
      "transactionDate": "2024-01-05T08:00:00",
      "paymentMethod": "credit_card",
    }),
  )
  .unwrap();
  let mut records = vec![overflowing];
  for offset in 1..=4 {
    let id = format!("t-{}", offset);
    records.push(record(0, offset, &id, "books", "10", "2024-01-05T09:00:00"));
  }

  let report = run(&store, &dlq, config(), records).await.unwrap();

  assert_eq!(report.received, 5);
  assert_eq!(report.malformed, 1);
  let malformed = dlq.with_reason(DeadLetterReason::MalformedEvent).await;
  assert_eq!(malformed.len(), 1);
  assert_eq!(malformed[0].payload["transactionId"], json!("t-huge"));
  assert!(malformed[0].error.contains("totalAmount"), "{}", malformed[0].error);
  assert_eq!(category_total(&store, "2024-01-05", "books"), Some(dec("40")));
  assert_eq!(store.rows(&TRANSACTIONS).len(), 4);
}

#[tokio::test]
async fn test_text_too_long_for_its_column_is_dead_lettered_without_halting() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  let long_category = "c".repeat(300);
  let report = run(
    &store,
    &dlq,
    config(),
    vec![
      record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
      record(0, 1, "t-2", &long_category, "7", "2024-01-05T10:00:00"),
      record(0, 2, "t-3", "books", "5", "2024-01-05T11:00:00"),
    ],
  )
  .await
  .unwrap();

  assert_eq!(report.decoded, 2);
  let rejected = dlq.with_reason(DeadLetterReason::Deserialization).await;
  assert_eq!(rejected.len(), 1);
  assert!(rejected[0].error.contains("productCategory"), "{}", rejected[0].error);
  assert!(dlq.with_reason(DeadLetterReason::FatalFlush).await.is_empty());
  assert_eq!(store.rows(&TRANSACTIONS).len(), 2);
  assert_eq!(category_total(&store, "2024-01-05", "books"), Some(dec("15")));
}

#[tokio::test]
async fn test_restart_after_fatal_flush_replays_dead_letters_first() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  store.fail_next_on(&SALES_PER_DAY, 6, true);
  let first = PipelineConfig::default()
    .with_workers(1)
    .with_sink(fast_sinks().with_batch_size(100));
  let err = run(
    &store,
    &dlq,
    first,
    vec![
      record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
      record(0, 1, "t-2", "books", "25", "2024-01-05T10:00:00"),
    ],
  )
  .await
  .unwrap_err();
  assert!(matches!(err, PipelineError::FinalFlush(_)), "{err}");
  assert_eq!(day_total(&store, "2024-01-05"), None);

  run(
    &store,
    &dlq,
    config(),
    vec![record(0, 2, "t-3", "books", "10", "2024-01-05T11:00:00")],
  )
  .await
  .unwrap();

  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("45")));
  assert_eq!(category_total(&store, "2024-01-05", "books"), Some(dec("45")));
  assert_eq!(month_total(&store, 2024, 1), Some(dec("45")));
  assert!(dlq.items().await.iter().all(|l| l.source != "sales_per_day"));

  // A second replay finds nothing and cannot move the day back.
  let replayed = replay_dead_letters(Arc::new(store.clone()), &dlq, &fast_sinks())
    .await
    .unwrap();
  assert!(replayed.is_empty());
  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("45")));
}

#[tokio::test]
async fn test_restore_refuses_unreplayed_dead_letters() {
  let store = InMemoryStore::new();
  let dlq = DeadLetterQueue::new();
  store.fail_next_on(&SALES_PER_DAY, 6, true);
  let first = PipelineConfig::default()
    .with_workers(1)
    .with_sink(fast_sinks().with_batch_size(100));
  run(
    &store,
    &dlq,
    first,
    vec![
      record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
      record(0, 1, "t-2", "books", "25", "2024-01-05T10:00:00"),
    ],
  )
  .await
  .unwrap_err();
  let pending = dlq.len().await;

  let err = SalesPipeline::builder(Arc::new(store.clone()), Arc::new(dlq.clone()))
    .config(config().with_replay_dead_letters(false))
    .build()
    .await
    .err()
    .unwrap();
  let PipelineError::UnreplayedDeadLetters { sink, count } = &err else {
    panic!("expected unreplayed dead letters, got {err}");
  };
  assert_eq!(sink, "sales_per_day");
  assert!(*count > 0);
  assert_eq!(dlq.len().await, pending);

  let replayed = replay_dead_letters(Arc::new(store.clone()), &dlq, &fast_sinks())
    .await
    .unwrap();
  assert_eq!(replayed.get("sales_per_day"), Some(count));
  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("35")));
  assert!(dlq.is_empty().await);

  run(
    &store,
    &dlq,
    config().with_replay_dead_letters(false),
    vec![record(0, 2, "t-3", "books", "10", "2024-01-05T11:00:00")],
  )
  .await
  .unwrap();
  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("45")));
}

/// A dead-letter destination whose every write fails.
#[derive(Debug)]
struct FullDisk;

#[async_trait]
impl DeadLetterSink for FullDisk {
  async fn deliver(&self, _letter: DeadLetter) -> Result<(), DeadLetterError> {
    Err(std::io::Error::other("no space left on device").into())
  }

  async fn letters(&self) -> Result<Vec<DeadLetter>, DeadLetterError> {
    Ok(Vec::new())
  }

  async fn acknowledge(
    &self,
    _replayed: &(dyn for<'d> Fn(&'d DeadLetter) -> bool + Send + Sync),
  ) -> Result<usize, DeadLetterError> {
    Ok(0)
  }
}

#[tokio::test]
async fn test_undeliverable_dead_letter_fails_the_run() {
  let store = InMemoryStore::new();
  let pipeline = SalesPipeline::builder(Arc::new(store.clone()), Arc::new(FullDisk))
    .config(config())
    .build()
    .await
    .unwrap();
  let err = pipeline
    .run(
      VecProducer::new(vec![
        record(0, 0, "t-1", "books", "10", "2024-01-05T09:00:00"),
        SourceRecord::new(0, 1, b"not json".to_vec()),
        record(0, 2, "t-2", "books", "5", "2024-01-05T10:00:00"),
      ]),
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

  assert!(
    matches!(err, PipelineError::DeadLettersLost { count: 1 }),
    "{err}"
  );
  // Records around the lost one were still written.
  assert_eq!(day_total(&store, "2024-01-05"), Some(dec("15")));
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(16))]

  #[test]
  fn prop_totals_do_not_depend_on_batching(
    cents in prop::collection::vec(1i64..100_000, 1..40),
    batch_size in 1usize..8,
    workers in 1usize..4,
  ) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let records: Vec<SourceRecord> = cents
      .iter()
      .enumerate()
      .map(|(i, c)| {
        let amount = Decimal::new(*c, 2).to_string();
        let day = format!("2024-02-{:02}T08:00:00", 1 + i % 3);
        record((i % 5) as i32, i as i64, &format!("t-{}", i), "books", &amount, &day)
      })
      .collect();
    let config = PipelineConfig::default()
      .with_workers(workers)
      .with_sink(fast_sinks().with_batch_size(batch_size));

    runtime
      .block_on(run(&store, &DeadLetterQueue::new(), config, records))
      .unwrap();

    let expected: Decimal = cents.iter().map(|c| Decimal::new(*c, 2)).sum();
    prop_assert_eq!(month_total(&store, 2024, 2), Some(expected));
    let days: Decimal = (1..=3)
      .filter_map(|d| day_total(&store, &format!("2024-02-{:02}", d)))
      .sum();
    prop_assert_eq!(days, expected);
    prop_assert_eq!(store.rows(&TRANSACTIONS).len(), cents.len());
  }
}
