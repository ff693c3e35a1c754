//! Producer over an in-memory `Vec`.
//!
//! Used to feed recorded source records or replayed dead letters through the pipeline. The
//! items are cloned on every call to [`Producer::produce`], so one producer can be run twice.

use std::pin::Pin;

use futures::{Stream, stream};

use crate::error::ErrorStrategy;
use crate::output::Output;
use crate::producer::{Producer, ProducerConfig};

/// A producer that yields the items of a `Vec` in order.
#[derive(Clone)]
pub struct VecProducer<T>
where
  T: std::fmt::Debug + Clone + Send + Sync + 'static,
{
  /// Items to produce.
  pub data: Vec<T>,
  /// Producer configuration.
  pub config: ProducerConfig<T>,
}

impl<T: std::fmt::Debug + Clone + Send + Sync + 'static> VecProducer<T> {
  /// Creates a producer over `data`.
  pub fn new(data: Vec<T>) -> Self {
    Self {
      data,
      config: ProducerConfig::default(),
    }
  }

  /// Sets the error handling strategy.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<T>) -> Self {
    self.config.error_strategy = strategy;
    self
  }
}

impl<T: std::fmt::Debug + Clone + Send + Sync + 'static> Output for VecProducer<T> {
  type Output = T;
  type OutputStream = Pin<Box<dyn Stream<Item = T> + Send>>;
}

impl<T: std::fmt::Debug + Clone + Send + Sync + 'static> Producer for VecProducer<T> {
  fn produce(&mut self) -> Self::OutputStream {
    Box::pin(stream::iter(self.data.clone()))
  }

  fn set_config_impl(&mut self, config: ProducerConfig<T>) {
    self.config = config;
  }

  fn get_config_impl(&self) -> &ProducerConfig<T> {
    &self.config
  }

  fn get_config_mut_impl(&mut self) -> &mut ProducerConfig<T> {
    &mut self.config
  }
}
