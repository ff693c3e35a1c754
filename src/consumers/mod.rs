//! Built-in consumers and stores.
//!
//! Sinks write to an [`UpsertStore`](crate::db::UpsertStore); records they cannot write end up
//! at a [`DeadLetterSink`](dead_letter_queue::DeadLetterSink).

/// Dead-letter records, the in-memory queue and the JSON Lines writer.
pub mod dead_letter_queue;
/// PostgreSQL upsert store.
pub mod db_postgres_store;
/// In-memory upsert store with fault injection.
pub mod memory_store;
/// Batched, retrying upsert sink.
pub mod upsert_sink;

pub use dead_letter_queue::{
  DeadLetter, DeadLetterQueue, DeadLetterReason, DeadLetterSink, JsonlDeadLetterWriter,
};
pub use db_postgres_store::PostgresStore;
pub use memory_store::InMemoryStore;
pub use upsert_sink::{BatchedUpsertSink, SinkHandle, SinkHealth, SinkReport};
