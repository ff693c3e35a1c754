//! # Producer Trait
//!
//! Producers are the start of a pipeline. In salesweave the production producer is the Kafka
//! source ([`KafkaProducer`](crate::producers::KafkaProducer), feature `kafka`) yielding
//! [`SourceRecord`](crate::transaction::SourceRecord)s; tests and replays use
//! [`VecProducer`](crate::producers::VecProducer).
//!
//! A producer never fails its stream because of a single bad item. Errors raised while
//! producing (a broker hiccup, an unreadable message) are turned into a [`StreamError`] and
//! resolved through the producer's [`ErrorStrategy`].

use crate::error::{ComponentInfo, ErrorAction, ErrorContext, ErrorStrategy, StreamError};
use crate::output::Output;
use async_trait::async_trait;

/// Configuration for a producer component.
#[derive(Debug, Clone)]
pub struct ProducerConfig<M: std::fmt::Debug + Clone + Send + Sync> {
  /// The error handling strategy to use when producing items.
  pub error_strategy: ErrorStrategy<M>,
  /// Optional name for identifying this producer in logs and metrics.
  pub name: Option<String>,
}

impl<M: std::fmt::Debug + Clone + Send + Sync> Default for ProducerConfig<M> {
  fn default() -> Self {
    Self {
      error_strategy: ErrorStrategy::Stop,
      name: None,
    }
  }
}

impl<M: std::fmt::Debug + Clone + Send + Sync> ProducerConfig<M> {
  /// Sets the error handling strategy.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<M>) -> Self {
    self.error_strategy = strategy;
    self
  }

  /// Sets the producer name.
  #[must_use]
  pub fn with_name(mut self, name: String) -> Self {
    self.name = Some(name);
    self
  }

  /// Returns the current error handling strategy.
  pub fn error_strategy(&self) -> ErrorStrategy<M> {
    self.error_strategy.clone()
  }

  /// Returns the current name, if set.
  pub fn name(&self) -> Option<String> {
    self.name.clone()
  }
}

/// Trait for components that produce data streams.
///
/// ```rust
/// use salesweave::producer::{Producer, ProducerConfig};
/// use salesweave::output::Output;
/// use futures::Stream;
/// use std::pin::Pin;
///
/// #[derive(Clone)]
/// struct Countdown {
///   from: u32,
///   config: ProducerConfig<u32>,
/// }
///
/// impl Output for Countdown {
///   type Output = u32;
///   type OutputStream = Pin<Box<dyn Stream<Item = u32> + Send>>;
/// }
///
/// impl Producer for Countdown {
///   fn produce(&mut self) -> Self::OutputStream {
///     Box::pin(futures::stream::iter((0..=self.from).rev()))
///   }
///
///   fn set_config_impl(&mut self, config: ProducerConfig<u32>) {
///     self.config = config;
///   }
///
///   fn get_config_impl(&self) -> &ProducerConfig<u32> {
///     &self.config
///   }
///
///   fn get_config_mut_impl(&mut self) -> &mut ProducerConfig<u32> {
///     &mut self.config
///   }
/// }
/// ```
#[async_trait]
pub trait Producer: Output
where
  Self::Output: std::fmt::Debug + Clone + Send + Sync,
{
  /// Produces the stream of items.
  fn produce(&mut self) -> Self::OutputStream;

  /// Returns a copy of this producer with `config` applied.
  #[must_use]
  fn with_config(&self, config: ProducerConfig<Self::Output>) -> Self
  where
    Self: Sized + Clone,
  {
    let mut this = self.clone();
    this.set_config(config);
    this
  }

  /// Sets the configuration for this producer.
  fn set_config(&mut self, config: ProducerConfig<Self::Output>) {
    self.set_config_impl(config);
  }

  /// Returns a reference to the producer's configuration.
  fn config(&self) -> &ProducerConfig<Self::Output> {
    self.get_config_impl()
  }

  /// Returns a mutable reference to the producer's configuration.
  fn config_mut(&mut self) -> &mut ProducerConfig<Self::Output> {
    self.get_config_mut_impl()
  }

  /// Sets the name for this producer.
  #[must_use]
  fn with_name(mut self, name: String) -> Self
  where
    Self: Sized,
  {
    self.config_mut().name = Some(name);
    self
  }

  /// Resolves the action for `error` through the configured [`ErrorStrategy`].
  fn handle_error(&self, error: &StreamError<Self::Output>) -> ErrorAction {
    self.config().error_strategy.action_for(error)
  }

  /// Builds an [`ErrorContext`] for the item that failed, if there is one.
  fn create_error_context(&self, item: Option<Self::Output>) -> ErrorContext<Self::Output> {
    let info = self.component_info();
    ErrorContext {
      timestamp: chrono::Utc::now(),
      item,
      component_name: info.name,
      component_type: info.type_name,
    }
  }

  /// Name and type of this producer, for logs and error reports.
  fn component_info(&self) -> ComponentInfo {
    ComponentInfo {
      name: self
        .config()
        .name()
        .unwrap_or_else(|| "producer".to_string()),
      type_name: std::any::type_name::<Self>().to_string(),
    }
  }

  /// Stores the configuration.
  fn set_config_impl(&mut self, config: ProducerConfig<Self::Output>);

  /// Returns the stored configuration.
  fn get_config_impl(&self) -> &ProducerConfig<Self::Output>;

  /// Returns the stored configuration mutably.
  fn get_config_mut_impl(&mut self) -> &mut ProducerConfig<Self::Output>;
}
