//! # salesweave
//!
//! Streaming sales aggregation: financial transactions are read from Kafka, folded into running
//! totals per category and day, per day and per month, and written with batched idempotent
//! upserts into PostgreSQL, next to the raw transactions.
//!
//! ## Layout
//!
//! - [`producer`], [`consumer`]: the component traits, with their
//!   [`ErrorStrategy`](error::ErrorStrategy) plumbing.
//! - [`transaction`], [`extract`], [`state`], [`stateful_transformer`]: decoding, key extraction
//!   and the keyed running totals.
//! - [`db`], [`schema`], [`consumers`]: table definitions, the store seam and the batched sinks.
//! - [`pipeline`]: the job wiring one source to the four sinks.
//! - [`config`], [`logging`], [`metrics`]: the ambient stack.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use salesweave::consumers::{DeadLetterQueue, InMemoryStore};
//! use salesweave::pipeline::SalesPipeline;
//! use salesweave::producers::VecProducer;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), salesweave::error::PipelineError> {
//! let store = Arc::new(InMemoryStore::new());
//! let pipeline = SalesPipeline::builder(store, Arc::new(DeadLetterQueue::new()))
//!   .build()
//!   .await?;
//! let report = pipeline
//!   .run(VecProducer::new(Vec::new()), CancellationToken::new())
//!   .await?;
//! println!("{} records", report.received);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

/// Environment-driven configuration.
pub mod config;
/// Consumer trait.
pub mod consumer;
/// Built-in consumers and stores.
pub mod consumers;
/// Table schemas, rows and the upsert store seam.
pub mod db;
/// Error strategies and the domain error taxonomy.
pub mod error;
/// Dimensions, aggregation keys and key extraction.
pub mod extract;
/// Input side of a component.
pub mod input;
/// Tracing subscriber setup.
pub mod logging;
/// Prometheus metrics.
pub mod metrics;
/// Output side of a component.
pub mod output;
/// The sales aggregation job.
pub mod pipeline;
/// Producer trait.
pub mod producer;
/// Built-in producers.
pub mod producers;
/// Table definitions of the four sinks.
pub mod schema;
/// Keyed running totals.
pub mod state;
/// Aggregation stage.
pub mod stateful_transformer;
/// Transaction wire format and source records.
pub mod transaction;

pub use consumer::{Consumer, ConsumerConfig};
pub use error::{ErrorAction, ErrorStrategy, PipelineError, StreamError};
pub use input::Input;
pub use output::Output;
pub use pipeline::{PipelineReport, SalesPipeline};
pub use producer::{Producer, ProducerConfig};
pub use transaction::{SourceRecord, Transaction};
