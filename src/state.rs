//! Keyed aggregation state.
//!
//! One store instance per dimension holds the running total of every key. The store is the
//! only owner of those totals: sinks receive [`AggregateSnapshot`] copies and never write back.
//!
//! **Per-key linearizability:** [`KeyedStateStore::apply`] on one key behaves as if all calls
//! ran in some serial order. Different keys update in parallel.
//!
//! **Sequence numbers:** every successful `apply` bumps the key's `sequence`. Sinks use it to
//! drop a snapshot that is older than one they already wrote.
//!
//! **Corruption:** a total can only grow. An update that would make it negative, or overflow
//! the decimal range, is refused with [`StateError::Corruption`] and the key is poisoned: every
//! later `apply` on it fails with [`StateError::KeyPoisoned`] until the process is restarted.
//! The store does not repair the key.
//!
//! There is no eviction. Keys are days, months and categories, a set that grows slowly for the
//! life of the process; a TTL or LRU policy would be added behind [`KeyedStateStore`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for state operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
  /// A lock was poisoned by a panicking thread.
  #[error("state lock is poisoned")]
  LockPoisoned,
  /// An update would have broken the store's invariants. It was not applied.
  #[error("state corruption for key {key}: {reason}")]
  Corruption {
    /// Display form of the key.
    key: String,
    /// What the update would have done.
    reason: String,
  },
  /// The key was poisoned by an earlier corruption.
  #[error("key {key} is poisoned: {reason}")]
  KeyPoisoned {
    /// Display form of the key.
    key: String,
    /// The corruption that poisoned it.
    reason: String,
  },
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// The full cumulative total of one key at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateSnapshot<K> {
  /// Grouping key.
  pub key: K,
  /// Cumulative total, never a delta.
  pub total_sales: Decimal,
  /// Number of updates applied to this key since the store was created.
  pub sequence: u64,
}

/// Running totals for one dimension.
pub trait KeyedStateStore<K>: Send + Sync + fmt::Debug {
  /// Adds `partial` to the total of `key`, starting from zero, and returns the new snapshot.
  fn apply(&self, key: &K, partial: Decimal) -> StateResult<AggregateSnapshot<K>>;

  /// Current snapshot of `key`, if it has one.
  fn snapshot(&self, key: &K) -> StateResult<Option<AggregateSnapshot<K>>>;

  /// Seeds `key` with a total loaded from the store. Replaces any current total and resets
  /// the key's sequence.
  fn restore(&self, key: K, total: Decimal) -> StateResult<()>;

  /// Number of keys held.
  fn len(&self) -> StateResult<usize>;

  /// Whether no key is held.
  fn is_empty(&self) -> StateResult<bool> {
    Ok(self.len()? == 0)
  }
}

#[derive(Debug, Default)]
struct KeyState {
  total: Decimal,
  sequence: u64,
  poisoned: Option<String>,
}

/// In-process [`KeyedStateStore`].
///
/// The map lock is only held long enough to find or insert a key; the per-key mutex
/// serializes updates of that key.
pub struct InMemoryKeyedStore<K> {
  entries: RwLock<HashMap<K, Arc<Mutex<KeyState>>>>,
}

impl<K> Default for InMemoryKeyedStore<K> {
  fn default() -> Self {
    Self {
      entries: RwLock::new(HashMap::new()),
    }
  }
}

impl<K> fmt::Debug for InMemoryKeyedStore<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let keys = self.entries.read().map(|m| m.len()).unwrap_or(0);
    f.debug_struct("InMemoryKeyedStore")
      .field("keys", &keys)
      .finish()
  }
}

impl<K> InMemoryKeyedStore<K>
where
  K: Clone + Eq + Hash + fmt::Display + Send + Sync,
{
  /// Creates an empty store.
  pub fn new() -> Self {
    Self::default()
  }

  fn entry(&self, key: &K) -> StateResult<Arc<Mutex<KeyState>>> {
    if let Some(entry) = self
      .entries
      .read()
      .map_err(|_| StateError::LockPoisoned)?
      .get(key)
    {
      return Ok(entry.clone());
    }
    let mut entries = self.entries.write().map_err(|_| StateError::LockPoisoned)?;
    Ok(entries.entry(key.clone()).or_default().clone())
  }

  /// Whether `key` has been poisoned by a corruption.
  pub fn is_poisoned(&self, key: &K) -> StateResult<bool> {
    let entries = self.entries.read().map_err(|_| StateError::LockPoisoned)?;
    match entries.get(key) {
      Some(entry) => Ok(
        entry
          .lock()
          .map_err(|_| StateError::LockPoisoned)?
          .poisoned
          .is_some(),
      ),
      None => Ok(false),
    }
  }

  /// Snapshots of every healthy key, in no particular order.
  pub fn snapshots(&self) -> StateResult<Vec<AggregateSnapshot<K>>> {
    let entries = self.entries.read().map_err(|_| StateError::LockPoisoned)?;
    let mut out = Vec::with_capacity(entries.len());
    for (key, entry) in entries.iter() {
      let state = entry.lock().map_err(|_| StateError::LockPoisoned)?;
      if state.poisoned.is_none() {
        out.push(AggregateSnapshot {
          key: key.clone(),
          total_sales: state.total,
          sequence: state.sequence,
        });
      }
    }
    Ok(out)
  }
}

impl<K> KeyedStateStore<K> for InMemoryKeyedStore<K>
where
  K: Clone + Eq + Hash + fmt::Display + Send + Sync,
{
  fn apply(&self, key: &K, partial: Decimal) -> StateResult<AggregateSnapshot<K>> {
    let entry = self.entry(key)?;
    let mut state = entry.lock().map_err(|_| StateError::LockPoisoned)?;

    if let Some(reason) = &state.poisoned {
      return Err(StateError::KeyPoisoned {
        key: key.to_string(),
        reason: reason.clone(),
      });
    }

    let corruption = match state.total.checked_add(partial) {
      Some(total) if total >= Decimal::ZERO => {
        state.total = total;
        state.sequence += 1;
        return Ok(AggregateSnapshot {
          key: key.clone(),
          total_sales: total,
          sequence: state.sequence,
        });
      }
      Some(total) => format!(
        "applying {} to {} would leave a negative total {}",
        partial, state.total, total
      ),
      None => format!("applying {} to {} overflows", partial, state.total),
    };

    state.poisoned = Some(corruption.clone());
    Err(StateError::Corruption {
      key: key.to_string(),
      reason: corruption,
    })
  }

  fn snapshot(&self, key: &K) -> StateResult<Option<AggregateSnapshot<K>>> {
    let entries = self.entries.read().map_err(|_| StateError::LockPoisoned)?;
    let Some(entry) = entries.get(key) else {
      return Ok(None);
    };
    let state = entry.lock().map_err(|_| StateError::LockPoisoned)?;
    if let Some(reason) = &state.poisoned {
      return Err(StateError::KeyPoisoned {
        key: key.to_string(),
        reason: reason.clone(),
      });
    }
    Ok(Some(AggregateSnapshot {
      key: key.clone(),
      total_sales: state.total,
      sequence: state.sequence,
    }))
  }

  fn restore(&self, key: K, total: Decimal) -> StateResult<()> {
    if total < Decimal::ZERO {
      return Err(StateError::Corruption {
        key: key.to_string(),
        reason: format!("stored total {} is negative", total),
      });
    }
    let mut entries = self.entries.write().map_err(|_| StateError::LockPoisoned)?;
    entries.insert(
      key,
      Arc::new(Mutex::new(KeyState {
        total,
        sequence: 0,
        poisoned: None,
      })),
    );
    Ok(())
  }

  fn len(&self) -> StateResult<usize> {
    Ok(self.entries.read().map_err(|_| StateError::LockPoisoned)?.len())
  }
}
