//! Key extractors: one per aggregation dimension.
//!
//! Each extractor maps a [`Transaction`] to its grouping key and the partial aggregate it
//! contributes (the transaction amount). Extraction is pure; the only failure is a
//! [`MalformedEventError`] for an unparseable timestamp or an unusable amount.
//!
//! Which clock the day and month come from is a [`TimeSemantics`] choice. Event time (the
//! transaction's own `transactionDate`) is the default; processing time reads a [`Clock`].

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::MalformedEventError;
use crate::transaction::Transaction;

/// The four pipelines of a salesweave job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
  /// Raw transaction log.
  Transactions,
  /// Sales per (day, category).
  Category,
  /// Sales per day.
  Daily,
  /// Sales per (year, month).
  Monthly,
}

impl Dimension {
  /// Name used for the dimension's sink, logs and metric labels. Matches its table name.
  pub fn as_str(&self) -> &'static str {
    match self {
      Dimension::Transactions => "transactions",
      Dimension::Category => "sales_per_category",
      Dimension::Daily => "sales_per_day",
      Dimension::Monthly => "sales_per_month",
    }
  }
}

impl fmt::Display for Dimension {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Key of the per-category aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryKey {
  /// Calendar day.
  pub transaction_date: NaiveDate,
  /// Product category.
  pub category: String,
}

impl fmt::Display for CategoryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.transaction_date, self.category)
  }
}

/// Key of the per-day aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DailyKey {
  /// Calendar day.
  pub transaction_date: NaiveDate,
}

impl fmt::Display for DailyKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.transaction_date)
  }
}

/// Key of the per-month aggregate. Always the pair, so the same month of two years never
/// shares a total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthlyKey {
  /// Calendar year.
  pub year: i32,
  /// Month of the year, 1 to 12.
  pub month: u32,
}

impl fmt::Display for MonthlyKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:04}-{:02}", self.year, self.month)
  }
}

/// Source of "now" for processing-time keys.
pub trait Clock: Send + Sync + fmt::Debug {
  /// Current UTC wall-clock time.
  fn now(&self) -> NaiveDateTime;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> NaiveDateTime {
    Utc::now().naive_utc()
  }
}

/// A clock that always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
  fn now(&self) -> NaiveDateTime {
    self.0
  }
}

/// Which time a transaction is bucketed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSemantics {
  /// The transaction's own `transactionDate`.
  #[default]
  EventTime,
  /// The time the pipeline processes the transaction.
  ProcessingTime,
}

/// Resolves the bucketing time of a transaction.
///
/// Under processing time the event's own timestamp is still parsed so a malformed value is
/// reported the same way under both semantics.
#[derive(Debug, Clone)]
pub struct TimeResolver {
  semantics: TimeSemantics,
  clock: Arc<dyn Clock>,
}

impl Default for TimeResolver {
  fn default() -> Self {
    Self::new(TimeSemantics::EventTime, Arc::new(SystemClock))
  }
}

impl TimeResolver {
  /// Creates a resolver for `semantics`, reading `clock` under processing time.
  pub fn new(semantics: TimeSemantics, clock: Arc<dyn Clock>) -> Self {
    Self { semantics, clock }
  }

  /// The configured semantics.
  pub fn semantics(&self) -> TimeSemantics {
    self.semantics
  }

  /// The bucketing time of `tx`.
  pub fn resolve(&self, tx: &Transaction) -> Result<NaiveDateTime, MalformedEventError> {
    let event_time = tx.transaction_date.parse(&tx.transaction_id)?;
    Ok(match self.semantics {
      TimeSemantics::EventTime => event_time,
      TimeSemantics::ProcessingTime => self.clock.now(),
    })
  }
}

/// Maps a transaction to a grouping key and its partial aggregate.
pub trait KeyExtractor: Send + Sync + fmt::Debug {
  /// The grouping key.
  type Key: Clone
    + Eq
    + Hash
    + Ord
    + fmt::Debug
    + fmt::Display
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static;

  /// The dimension this extractor feeds.
  fn dimension(&self) -> Dimension;

  /// Derives `(key, amount)` from `tx`.
  fn extract(&self, tx: &Transaction) -> Result<(Self::Key, Decimal), MalformedEventError>;
}

/// Extracts `(day, category)`.
#[derive(Debug, Clone, Default)]
pub struct CategoryExtractor {
  time: TimeResolver,
}

impl CategoryExtractor {
  /// Creates an extractor using `time` to pick the day.
  pub fn new(time: TimeResolver) -> Self {
    Self { time }
  }
}

impl KeyExtractor for CategoryExtractor {
  type Key = CategoryKey;

  fn dimension(&self) -> Dimension {
    Dimension::Category
  }

  fn extract(&self, tx: &Transaction) -> Result<(CategoryKey, Decimal), MalformedEventError> {
    let at = self.time.resolve(tx)?;
    let key = CategoryKey {
      transaction_date: at.date(),
      category: tx.product_category.clone(),
    };
    Ok((key, tx.amount()?))
  }
}

/// Extracts the day.
#[derive(Debug, Clone, Default)]
pub struct DailyExtractor {
  time: TimeResolver,
}

impl DailyExtractor {
  /// Creates an extractor using `time` to pick the day.
  pub fn new(time: TimeResolver) -> Self {
    Self { time }
  }
}

impl KeyExtractor for DailyExtractor {
  type Key = DailyKey;

  fn dimension(&self) -> Dimension {
    Dimension::Daily
  }

  fn extract(&self, tx: &Transaction) -> Result<(DailyKey, Decimal), MalformedEventError> {
    let at = self.time.resolve(tx)?;
    Ok((
      DailyKey {
        transaction_date: at.date(),
      },
      tx.amount()?,
    ))
  }
}

/// Extracts `(year, month)`.
#[derive(Debug, Clone, Default)]
pub struct MonthlyExtractor {
  time: TimeResolver,
}

impl MonthlyExtractor {
  /// Creates an extractor using `time` to pick the month.
  pub fn new(time: TimeResolver) -> Self {
    Self { time }
  }
}

impl KeyExtractor for MonthlyExtractor {
  type Key = MonthlyKey;

  fn dimension(&self) -> Dimension {
    Dimension::Monthly
  }

  fn extract(&self, tx: &Transaction) -> Result<(MonthlyKey, Decimal), MalformedEventError> {
    let at = self.time.resolve(tx)?;
    Ok((
      MonthlyKey {
        year: at.year(),
        month: at.month(),
      },
      tx.amount()?,
    ))
  }
}

/// `(day, category)` and amount of `tx`, by event time.
pub fn extract_category(tx: &Transaction) -> Result<(CategoryKey, Decimal), MalformedEventError> {
  CategoryExtractor::default().extract(tx)
}

/// Day and amount of `tx`, by event time.
pub fn extract_daily(tx: &Transaction) -> Result<(DailyKey, Decimal), MalformedEventError> {
  DailyExtractor::default().extract(tx)
}

/// `(year, month)` and amount of `tx`, by event time.
pub fn extract_monthly(tx: &Transaction) -> Result<(MonthlyKey, Decimal), MalformedEventError> {
  MonthlyExtractor::default().extract(tx)
}
