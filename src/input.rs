//! Input side of a pipeline component.
//!
//! Consumers implement [`Input`] to declare which items they accept and the stream type those
//! items arrive on. In salesweave the items are plain domain values
//! ([`AggregateSnapshot`](crate::state::AggregateSnapshot),
//! [`TransactionRow`](crate::transaction::TransactionRow), ...), never an envelope.
//!
//! ```rust
//! use salesweave::input::Input;
//! use futures::Stream;
//! use std::pin::Pin;
//!
//! struct CountingSink;
//!
//! impl Input for CountingSink {
//!   type Input = u64;
//!   type InputStream = Pin<Box<dyn Stream<Item = u64> + Send>>;
//! }
//! ```

use futures::Stream;

/// Trait for components that accept an input stream.
pub trait Input
where
  Self::Input: Send + 'static,
{
  /// The type of items accepted.
  type Input;
  /// The stream type that yields items of type `Self::Input`.
  type InputStream: Stream<Item = Self::Input> + Send + 'static;
}
