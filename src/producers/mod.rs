//! Built-in producers.

/// Producer over a Kafka consumer group.
#[cfg(feature = "kafka")]
pub mod kafka_producer;
/// Producer draining a tokio mpsc receiver.
pub mod tokio_channel_producer;
/// Producer over an in-memory vector.
pub mod vec_producer;

#[cfg(feature = "kafka")]
pub use kafka_producer::{KafkaProducer, SourceFailure};
pub use tokio_channel_producer::TokioChannelProducer;
pub use vec_producer::VecProducer;
