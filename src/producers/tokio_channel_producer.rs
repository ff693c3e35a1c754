//! Producer over a `tokio::sync::mpsc` receiver.
//!
//! The stream ends when every sender is dropped. It lets embedding code push source records
//! into a running pipeline, and it is how tests keep a pipeline's source open until they
//! cancel it.

use std::pin::Pin;

use futures::{Stream, stream};
use tokio::sync::mpsc::Receiver;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::output::Output;
use crate::producer::{Producer, ProducerConfig};

/// A producer that yields what arrives on a channel.
pub struct TokioChannelProducer<T>
where
  T: std::fmt::Debug + Clone + Send + Sync + 'static,
{
  receiver: Option<Receiver<T>>,
  /// Producer configuration.
  pub config: ProducerConfig<T>,
}

impl<T> TokioChannelProducer<T>
where
  T: std::fmt::Debug + Clone + Send + Sync + 'static,
{
  /// Creates a producer reading from `receiver`.
  pub fn new(receiver: Receiver<T>) -> Self {
    Self {
      receiver: Some(receiver),
      config: ProducerConfig::default(),
    }
  }
}

impl<T> Output for TokioChannelProducer<T>
where
  T: std::fmt::Debug + Clone + Send + Sync + 'static,
{
  type Output = T;
  type OutputStream = Pin<Box<dyn Stream<Item = T> + Send>>;
}

impl<T> Producer for TokioChannelProducer<T>
where
  T: std::fmt::Debug + Clone + Send + Sync + 'static,
{
  /// The receiver can only be drained once; later calls produce an empty stream.
  fn produce(&mut self) -> Self::OutputStream {
    match self.receiver.take() {
      Some(receiver) => Box::pin(ReceiverStream::new(receiver)),
      None => {
        warn!(
          component = %self.component_info().name,
          "Channel receiver already consumed, producing empty stream"
        );
        Box::pin(stream::empty())
      }
    }
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

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;

  #[tokio::test]
  async fn test_ends_when_senders_drop() {
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    let mut producer = TokioChannelProducer::new(rx);
    let stream = producer.produce();
    tx.send("a").await.unwrap();
    tx.send("b").await.unwrap();
    drop(tx);
    assert_eq!(stream.collect::<Vec<_>>().await, vec!["a", "b"]);
    assert_eq!(producer.produce().count().await, 0);
  }
}
