//! Output side of a pipeline component.
//!
//! Producers implement [`Output`]. Together with [`Input`](crate::input::Input) it lets the
//! compiler check that what a producer emits is what the next component accepts.

use futures::Stream;

/// Trait for components that produce an output stream.
pub trait Output
where
  Self::Output: Send + 'static,
{
  /// The type of items produced.
  type Output;
  /// The stream type that yields items of type `Self::Output`.
  type OutputStream: Stream<Item = Self::Output> + Send + 'static;
}
