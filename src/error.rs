//! # Error Handling
//!
//! Two layers of errors flow through a salesweave pipeline:
//!
//! - **Component strategies**: [`ErrorStrategy`] and [`ErrorAction`] decide what a producer or
//!   consumer does when an item fails (stop, skip, retry). [`StreamError`] carries the failing
//!   item together with [`ErrorContext`] and [`ComponentInfo`] so a custom strategy can inspect it.
//! - **Domain taxonomy**: typed errors for each failure class of the pipeline.
//!
//! | Error | Raised by | Policy |
//! |---|---|---|
//! | [`DeserializationError`] | decoding a source record | dead-lettered, stream continues |
//! | [`MalformedEventError`] | key extraction | dead-lettered, stream continues |
//! | [`StoreError::Transient`] | a flush attempt | batch retried unmodified |
//! | [`FatalFlushError`] | retry exhaustion | batch dead-lettered, sink halts |
//! | [`StateError`](crate::state::StateError) | aggregation state | key poisoned, event dead-lettered |
//!
//! Only retry exhaustion and state corruption reach the operator: they are logged at `error`
//! level, counted, and (for sinks) published on the sink's health channel.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::state::StateError;

/// Action to take when an error occurs in a pipeline component.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorAction {
  /// Stop processing immediately.
  Stop,
  /// Skip the item that caused the error and continue processing.
  Skip,
  /// Retry the operation that caused the error.
  Retry,
}

type CustomErrorHandler<T> = Arc<dyn Fn(&StreamError<T>) -> ErrorAction + Send + Sync>;

/// Strategy for handling errors in pipeline components.
///
/// ```rust
/// use salesweave::error::{ErrorAction, ErrorStrategy};
///
/// let strategy: ErrorStrategy<u32> = ErrorStrategy::new_custom(|error| {
///   if error.retries < 2 {
///     ErrorAction::Retry
///   } else {
///     ErrorAction::Skip
///   }
/// });
/// # let _ = strategy;
/// ```
pub enum ErrorStrategy<T> {
  /// Stop processing immediately when an error occurs.
  Stop,
  /// Skip items that cause errors and continue processing.
  Skip,
  /// Retry failed operations up to the specified number of times.
  Retry(usize),
  /// Custom error handling logic.
  Custom(CustomErrorHandler<T>),
}

impl<T: fmt::Debug + Clone + Send + Sync> Clone for ErrorStrategy<T> {
  fn clone(&self) -> Self {
    match self {
      ErrorStrategy::Stop => ErrorStrategy::Stop,
      ErrorStrategy::Skip => ErrorStrategy::Skip,
      ErrorStrategy::Retry(n) => ErrorStrategy::Retry(*n),
      ErrorStrategy::Custom(handler) => ErrorStrategy::Custom(handler.clone()),
    }
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> fmt::Debug for ErrorStrategy<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ErrorStrategy::Stop => write!(f, "ErrorStrategy::Stop"),
      ErrorStrategy::Skip => write!(f, "ErrorStrategy::Skip"),
      ErrorStrategy::Retry(n) => write!(f, "ErrorStrategy::Retry({})", n),
      ErrorStrategy::Custom(_) => write!(f, "ErrorStrategy::Custom"),
    }
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> PartialEq for ErrorStrategy<T> {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (ErrorStrategy::Stop, ErrorStrategy::Stop) => true,
      (ErrorStrategy::Skip, ErrorStrategy::Skip) => true,
      (ErrorStrategy::Retry(n1), ErrorStrategy::Retry(n2)) => n1 == n2,
      (ErrorStrategy::Custom(_), ErrorStrategy::Custom(_)) => true,
      _ => false,
    }
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> ErrorStrategy<T> {
  /// Creates a custom error handling strategy with a user-defined handler function.
  pub fn new_custom<F>(f: F) -> Self
  where
    F: Fn(&StreamError<T>) -> ErrorAction + Send + Sync + 'static,
  {
    Self::Custom(Arc::new(f))
  }

  /// Resolves the action for `error` under this strategy.
  pub fn action_for(&self, error: &StreamError<T>) -> ErrorAction {
    match self {
      ErrorStrategy::Stop => ErrorAction::Stop,
      ErrorStrategy::Skip => ErrorAction::Skip,
      ErrorStrategy::Retry(n) if error.retries < *n => ErrorAction::Retry,
      ErrorStrategy::Custom(handler) => handler(error),
      _ => ErrorAction::Stop,
    }
  }
}

/// Error that occurred while a component was processing a stream.
#[derive(Debug)]
pub struct StreamError<T> {
  /// The original error that occurred.
  pub source: Box<dyn Error + Send + Sync>,
  /// Context about when and where the error occurred.
  pub context: ErrorContext<T>,
  /// Information about the component that encountered the error.
  pub component: ComponentInfo,
  /// Number of times this error has been retried.
  pub retries: usize,
}

impl<T: fmt::Debug + Clone + Send + Sync> Clone for StreamError<T> {
  fn clone(&self) -> Self {
    Self {
      source: Box::new(StringError(self.source.to_string())),
      context: self.context.clone(),
      component: self.component.clone(),
      retries: self.retries,
    }
  }
}

/// A simple error type that wraps a string message.
#[derive(Debug)]
pub struct StringError(pub String);

impl fmt::Display for StringError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl Error for StringError {}

impl<T: fmt::Debug + Clone + Send + Sync> StreamError<T> {
  /// Creates a new `StreamError` with `retries` set to 0.
  pub fn new(
    source: Box<dyn Error + Send + Sync>,
    context: ErrorContext<T>,
    component: ComponentInfo,
  ) -> Self {
    Self {
      source,
      context,
      component,
      retries: 0,
    }
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> fmt::Display for StreamError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Error in {} ({}): {}",
      self.component.name, self.component.type_name, self.source
    )
  }
}

impl<T: fmt::Debug + Clone + Send + Sync> Error for StreamError<T> {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    Some(self.source.as_ref())
  }
}

/// Context information about when and where an error occurred.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext<T> {
  /// The timestamp when the error occurred.
  pub timestamp: chrono::DateTime<chrono::Utc>,
  /// The item being processed when the error occurred, if available.
  pub item: Option<T>,
  /// The name of the component that encountered the error.
  pub component_name: String,
  /// The type of the component that encountered the error.
  pub component_type: String,
}

impl<T: fmt::Debug + Clone + Send + Sync> Default for ErrorContext<T> {
  fn default() -> Self {
    Self {
      timestamp: chrono::Utc::now(),
      item: None,
      component_name: "default".to_string(),
      component_type: "default".to_string(),
    }
  }
}

/// Information about a pipeline component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInfo {
  /// The name of the component.
  pub name: String,
  /// The type name of the component.
  pub type_name: String,
}

impl Default for ComponentInfo {
  fn default() -> Self {
    Self {
      name: "default".to_string(),
      type_name: "default".to_string(),
    }
  }
}

impl ComponentInfo {
  /// Creates a new `ComponentInfo` with the given name and type name.
  pub fn new(name: String, type_name: String) -> Self {
    Self { name, type_name }
  }
}

/// A source record could not be decoded into a transaction.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot decode record at partition {partition} offset {offset}: {message}")]
pub struct DeserializationError {
  /// Source partition of the record.
  pub partition: i32,
  /// Offset of the record within its partition.
  pub offset: i64,
  /// Decoder message.
  pub message: String,
}

/// A decoded transaction carries a value the key extractors cannot use.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed transaction {transaction_id}: field `{field}` {reason}")]
pub struct MalformedEventError {
  /// Identity of the offending transaction.
  pub transaction_id: String,
  /// Wire name of the offending field.
  pub field: &'static str,
  /// What is wrong with it.
  pub reason: String,
}

/// Failure reported by an [`UpsertStore`](crate::db::UpsertStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  /// Connection loss, timeout, pool exhaustion, serialization failure or deadlock.
  #[error("transient store error: {0}")]
  Transient(String),
  /// Anything retrying the same batch cannot fix.
  #[error("store error: {0}")]
  Permanent(String),
}

impl StoreError {
  /// Whether resending the same batch may succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, StoreError::Transient(_))
  }
}

/// A batch could not be persisted within the retry budget.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("sink `{sink}` gave up on a batch of {records} records after {attempts} attempt(s): {last_error}")]
pub struct FatalFlushError {
  /// Name of the sink that failed.
  pub sink: String,
  /// Number of records in the failed batch.
  pub records: usize,
  /// Number of attempts made, including the first.
  pub attempts: u32,
  /// Error returned by the last attempt.
  pub last_error: StoreError,
}

/// A record was refused by a sink. The record itself has already been dead-lettered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
  /// The sink stopped flushing after a fatal flush failure.
  #[error("sink `{sink}` is halted: {reason}")]
  Halted {
    /// Sink name.
    sink: String,
    /// The failure that halted it.
    reason: String,
  },
  /// The sink has been shut down.
  #[error("sink `{sink}` is closed")]
  Closed {
    /// Sink name.
    sink: String,
  },
}

/// A dead letter could not be recorded.
#[derive(Debug, Error)]
pub enum DeadLetterError {
  /// Writing the dead-letter file failed.
  #[error("dead-letter I/O error: {0}")]
  Io(#[from] std::io::Error),
  /// The record could not be encoded.
  #[error("dead-letter encoding error: {0}")]
  Encoding(#[from] serde_json::Error),
}

/// An environment value could not be turned into configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid value `{value}` for {key}: {reason}")]
pub struct ConfigError {
  /// Variable name.
  pub key: String,
  /// Offending value.
  pub value: String,
  /// Why it was rejected.
  pub reason: String,
}

/// Top-level error of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
  /// See [`DeserializationError`].
  #[error(transparent)]
  Deserialization(#[from] DeserializationError),
  /// See [`MalformedEventError`].
  #[error(transparent)]
  Malformed(#[from] MalformedEventError),
  /// See [`StoreError`].
  #[error(transparent)]
  Store(#[from] StoreError),
  /// See [`StateError`].
  #[error(transparent)]
  State(#[from] StateError),
  /// See [`SinkError`].
  #[error(transparent)]
  Sink(#[from] SinkError),
  /// See [`DeadLetterError`].
  #[error(transparent)]
  DeadLetter(#[from] DeadLetterError),
  /// See [`ConfigError`].
  #[error(transparent)]
  Config(#[from] ConfigError),
  /// One or more sinks could not flush their remaining records on shutdown.
  #[error("final flush failed for {} sink(s): {}", .0.len(), join_messages(.0))]
  FinalFlush(Vec<FatalFlushError>),
  /// The source could not be read, or was stopped by its error strategy.
  #[error("source stopped: {0}")]
  SourceStopped(String),
  /// Dead letters that every delivery attempt failed for. Their payloads are only in the log.
  #[error("{count} dead letter(s) could not be delivered")]
  DeadLettersLost {
    /// Letters lost.
    count: u64,
  },
  /// Restoring aggregate totals from the store would ignore dead-lettered updates of a sink.
  #[error(
    "{count} dead-lettered record(s) of sink `{sink}` must be replayed before restoring state"
  )]
  UnreplayedDeadLetters {
    /// Sink the records belong to.
    sink: String,
    /// Records waiting for replay.
    count: usize,
  },
  /// A worker task panicked or was cancelled.
  #[error("worker {worker} failed: {message}")]
  Worker {
    /// Worker index.
    worker: usize,
    /// Join error description.
    message: String,
  },
}

fn join_messages(errors: &[FatalFlushError]) -> String {
  errors
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("; ")
}
