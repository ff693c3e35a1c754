//! In-memory [`UpsertStore`].
//!
//! Holds each table as a map from primary key to row and applies the same conflict rule as
//! the PostgreSQL statements: an incoming row replaces the stored one. It requires
//! [`UpsertStore::ensure_table`] before a table is written, like a real database.
//!
//! Tests drive failure paths through it: [`InMemoryStore::fail_next`] queues errors for the
//! next batches and [`InMemoryStore::pause`] holds every batch until [`InMemoryStore::resume`],
//! which makes a slow store observable.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::db::{DatabaseRow, RowKey, TableSchema, UpsertStore};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
  tables: HashMap<&'static str, HashMap<RowKey, DatabaseRow>>,
  faults: VecDeque<StoreError>,
  table_faults: HashMap<&'static str, VecDeque<StoreError>>,
  calls: u64,
  batches: u64,
  statements: u64,
  batch_sizes: Vec<usize>,
}

/// Shared in-memory tables. Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
  inner: Arc<Mutex<Inner>>,
  paused: Arc<watch::Sender<bool>>,
}

impl Default for InMemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryStore {
  /// Creates a store without tables.
  pub fn new() -> Self {
    let (paused, _) = watch::channel(false);
    Self {
      inner: Arc::new(Mutex::new(Inner::default())),
      paused: Arc::new(paused),
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
    self
      .inner
      .lock()
      .map_err(|_| StoreError::Permanent("in-memory store lock poisoned".to_string()))
  }

  /// Makes the next `n` batches fail, transiently or permanently.
  pub fn fail_next(&self, n: usize, transient: bool) {
    if let Ok(mut inner) = self.lock() {
      inner.faults.extend(injected(n, transient));
    }
  }

  /// Makes the next `n` batches written to `table` fail. These are used before the faults
  /// queued by [`InMemoryStore::fail_next`].
  pub fn fail_next_on(&self, table: &'static TableSchema, n: usize, transient: bool) {
    if let Ok(mut inner) = self.lock() {
      inner
        .table_faults
        .entry(table.name)
        .or_default()
        .extend(injected(n, transient));
    }
  }

  /// Holds every batch until [`InMemoryStore::resume`].
  pub fn pause(&self) {
    self.paused.send_replace(true);
  }

  /// Releases held batches.
  pub fn resume(&self) {
    self.paused.send_replace(false);
  }

  /// Stored row of `table` with primary key `key`.
  pub fn row(&self, table: &TableSchema, key: &RowKey) -> Option<DatabaseRow> {
    self
      .lock()
      .ok()?
      .tables
      .get(table.name)?
      .get(key)
      .cloned()
  }

  /// Every stored row of `table`.
  pub fn rows(&self, table: &TableSchema) -> Vec<DatabaseRow> {
    self
      .lock()
      .ok()
      .and_then(|inner| {
        inner
          .tables
          .get(table.name)
          .map(|rows| rows.values().cloned().collect())
      })
      .unwrap_or_default()
  }

  /// Whether `table` has been created.
  pub fn has_table(&self, table: &TableSchema) -> bool {
    self
      .lock()
      .map(|inner| inner.tables.contains_key(table.name))
      .unwrap_or(false)
  }

  /// Number of `upsert_batch` calls, failed ones included.
  pub fn calls(&self) -> u64 {
    self.lock().map(|inner| inner.calls).unwrap_or(0)
  }

  /// Number of batches committed.
  pub fn batches(&self) -> u64 {
    self.lock().map(|inner| inner.batches).unwrap_or(0)
  }

  /// Number of upsert statements committed.
  pub fn statements(&self) -> u64 {
    self.lock().map(|inner| inner.statements).unwrap_or(0)
  }

  /// Size of every committed batch, in commit order.
  pub fn batch_sizes(&self) -> Vec<usize> {
    self
      .lock()
      .map(|inner| inner.batch_sizes.clone())
      .unwrap_or_default()
  }
}

fn injected(n: usize, transient: bool) -> impl Iterator<Item = StoreError> {
  (1..=n).map(move |i| {
    let message = format!("injected failure {}", i);
    if transient {
      StoreError::Transient(message)
    } else {
      StoreError::Permanent(message)
    }
  })
}

#[async_trait]
impl UpsertStore for InMemoryStore {
  async fn ensure_table(&self, schema: &'static TableSchema) -> Result<(), StoreError> {
    self.lock()?.tables.entry(schema.name).or_default();
    Ok(())
  }

  async fn upsert_batch(
    &self,
    schema: &'static TableSchema,
    rows: &[DatabaseRow],
  ) -> Result<u64, StoreError> {
    self.lock()?.calls += 1;

    let mut paused = self.paused.subscribe();
    // The sender lives in `self`, so the channel cannot close while we wait.
    let _ = paused.wait_for(|paused| !*paused).await;

    let mut inner = self.lock()?;
    let table_fault = inner
      .table_faults
      .get_mut(schema.name)
      .and_then(VecDeque::pop_front);
    if let Some(fault) = table_fault.or_else(|| inner.faults.pop_front()) {
      return Err(fault);
    }

    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
      schema.validate(row)?;
      keyed.push((schema.key_of(row)?, row.clone()));
    }

    let table = inner.tables.get_mut(schema.name).ok_or_else(|| {
      StoreError::Permanent(format!("relation \"{}\" does not exist", schema.name))
    })?;
    for (key, row) in keyed {
      table.insert(key, row);
    }
    inner.batches += 1;
    inner.statements += rows.len() as u64;
    inner.batch_sizes.push(rows.len());
    Ok(rows.len() as u64)
  }

  async fn load_rows(&self, schema: &'static TableSchema) -> Result<Vec<DatabaseRow>, StoreError> {
    let inner = self.lock()?;
    let table = inner.tables.get(schema.name).ok_or_else(|| {
      StoreError::Permanent(format!("relation \"{}\" does not exist", schema.name))
    })?;
    Ok(table.values().cloned().collect())
  }
}
