//! Aggregation stage.
//!
//! An [`AggregateTransformer`] folds each transaction into one dimension: it extracts the key
//! and partial amount, applies the amount to the dimension's [`KeyedStateStore`], and emits the
//! key's new cumulative [`AggregateSnapshot`]. Because the emitted value is the full total, a
//! sink may write any later snapshot of a key over an earlier one without losing updates.
//!
//! Failures are values: a transaction the extractor rejects comes out as
//! [`AggregateError::Malformed`] with the state untouched, and a refused update as
//! [`AggregateError::State`] with the key poisoned. The caller dead-letters both.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, info};

use crate::error::{MalformedEventError, PipelineError};
use crate::extract::{Dimension, KeyExtractor};
use crate::metrics;
use crate::state::{AggregateSnapshot, KeyedStateStore, StateError, StateResult};
use crate::transaction::Transaction;

/// When snapshots are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmissionPolicy {
  /// One snapshot per applied update.
  #[default]
  EveryUpdate,
}

/// Why a transaction produced no snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregateError {
  /// The extractor rejected the transaction.
  #[error(transparent)]
  Malformed(#[from] MalformedEventError),
  /// The state store refused the update.
  #[error(transparent)]
  State(#[from] StateError),
}

impl From<AggregateError> for PipelineError {
  fn from(error: AggregateError) -> Self {
    match error {
      AggregateError::Malformed(e) => PipelineError::Malformed(e),
      AggregateError::State(e) => PipelineError::State(e),
    }
  }
}

/// Folds transactions into one dimension's running totals.
pub struct AggregateTransformer<E: KeyExtractor> {
  extractor: E,
  store: Arc<dyn KeyedStateStore<E::Key>>,
  policy: EmissionPolicy,
}

impl<E: KeyExtractor + Clone> Clone for AggregateTransformer<E> {
  fn clone(&self) -> Self {
    Self {
      extractor: self.extractor.clone(),
      store: Arc::clone(&self.store),
      policy: self.policy,
    }
  }
}

impl<E: KeyExtractor> std::fmt::Debug for AggregateTransformer<E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AggregateTransformer")
      .field("dimension", &self.extractor.dimension())
      .field("policy", &self.policy)
      .field("store", &self.store)
      .finish()
  }
}

impl<E: KeyExtractor> AggregateTransformer<E> {
  /// Creates a transformer folding into `store`.
  pub fn new(extractor: E, store: Arc<dyn KeyedStateStore<E::Key>>) -> Self {
    Self {
      extractor,
      store,
      policy: EmissionPolicy::EveryUpdate,
    }
  }

  /// Sets the emission policy.
  #[must_use]
  pub fn with_policy(mut self, policy: EmissionPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// The dimension this transformer feeds.
  pub fn dimension(&self) -> Dimension {
    self.extractor.dimension()
  }

  /// The state store.
  pub fn store(&self) -> &Arc<dyn KeyedStateStore<E::Key>> {
    &self.store
  }

  /// Key and partial amount of `tx`, without touching state.
  pub fn extract(&self, tx: &Transaction) -> Result<(E::Key, Decimal), MalformedEventError> {
    self.extractor.extract(tx)
  }

  /// Applies `partial` to `key`. A refused update is logged and counted here.
  pub fn apply(&self, key: &E::Key, partial: Decimal) -> StateResult<AggregateSnapshot<E::Key>> {
    self.store.apply(key, partial).inspect_err(|e| {
      let dimension = self.dimension();
      error!(
        pipeline = %dimension,
        key = %key,
        error = %e,
        "Aggregation state refused an update"
      );
      metrics::record_state_corruption(dimension.as_str());
    })
  }

  /// Extracts then applies.
  pub fn process(&self, tx: &Transaction) -> Result<AggregateSnapshot<E::Key>, AggregateError> {
    let (key, partial) = self.extract(tx)?;
    Ok(self.apply(&key, partial)?)
  }

  /// Seeds the store with totals read back from the dimension's table. Returns the number of
  /// keys restored.
  pub fn restore(&self, snapshots: Vec<AggregateSnapshot<E::Key>>) -> StateResult<usize> {
    let count = snapshots.len();
    for snapshot in snapshots {
      self.store.restore(snapshot.key, snapshot.total_sales)?;
    }
    if count > 0 {
      info!(pipeline = %self.dimension(), keys = count, "Restored aggregation state");
    }
    Ok(count)
  }
}
