//! Kafka source.
//!
//! Subscribes to the configured topics and yields every message as a [`SourceRecord`], payload
//! untouched. Decoding happens downstream so a bad message is dead-lettered with its partition
//! and offset instead of ending the stream.
//!
//! A source that cannot start, or that its error strategy stops, ends the stream and records
//! why in its [`SourceFailure`]. Call [`KafkaProducer::connect`] first to fail before the
//! pipeline starts instead.
//!
//! Offsets are committed by the client's auto-commit. A record whose offset was committed but
//! that had not reached the store when the process died is not redelivered; the `transactions`
//! upsert and the dedup window make redelivery of the other kind harmless.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use rdkafka::{
  ClientContext,
  config::{ClientConfig, RDKafkaLogLevel},
  consumer::stream_consumer::StreamConsumer,
  consumer::{Consumer, ConsumerContext},
  error::KafkaResult,
  message::{BorrowedMessage, Message},
  topic_partition_list::TopicPartitionList,
};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::KafkaSourceConfig;
use crate::error::{ErrorAction, ErrorStrategy, StreamError};
use crate::output::Output;
use crate::producer::{Producer, ProducerConfig};
use crate::transaction::SourceRecord;

/// Why a source stream ended before it was cancelled. Clones share the slot; the first reason
/// recorded is kept.
#[derive(Debug, Clone, Default)]
pub struct SourceFailure(Arc<Mutex<Option<String>>>);

impl SourceFailure {
  fn record(&self, reason: String) {
    if let Ok(mut slot) = self.0.lock() {
      slot.get_or_insert(reason);
    }
  }

  /// The recorded reason, if the stream failed.
  pub fn get(&self) -> Option<String> {
    self.0.lock().ok().and_then(|slot| slot.clone())
  }
}

/// Producer reading [`SourceRecord`]s from Kafka.
#[derive(Clone)]
pub struct KafkaProducer {
  /// Producer configuration. Receive errors are skipped after a short pause by default.
  pub config: ProducerConfig<SourceRecord>,
  kafka_config: KafkaSourceConfig,
  consumer: Option<Arc<StreamConsumer<SourceContext>>>,
  failure: SourceFailure,
}

impl KafkaProducer {
  /// Creates a producer for `kafka_config`.
  pub fn new(kafka_config: KafkaSourceConfig) -> Self {
    Self {
      config: ProducerConfig::default()
        .with_error_strategy(ErrorStrategy::Skip)
        .with_name("kafka_source".to_string()),
      kafka_config,
      consumer: None,
      failure: SourceFailure::default(),
    }
  }

  /// Creates the consumer and subscribes now. Without this, [`produce`](Producer::produce)
  /// does both and a failure ends the stream.
  pub fn connect(mut self) -> KafkaResult<Self> {
    self.consumer = Some(Arc::new(subscribe(&self.kafka_config)?));
    Ok(self)
  }

  /// Where this producer records why its stream ended early.
  pub fn failure(&self) -> SourceFailure {
    self.failure.clone()
  }

  /// Sets the error handling strategy for receive errors.
  #[must_use]
  pub fn with_error_strategy(mut self, strategy: ErrorStrategy<SourceRecord>) -> Self {
    self.config.error_strategy = strategy;
    self
  }

  /// The Kafka configuration.
  pub fn kafka_config(&self) -> &KafkaSourceConfig {
    &self.kafka_config
  }
}

/// Client properties for `config`, custom properties applied last.
pub fn client_config(config: &KafkaSourceConfig) -> ClientConfig {
  let mut client_config = ClientConfig::new();
  client_config.set("bootstrap.servers", &config.bootstrap_servers);
  client_config.set("group.id", &config.group_id);
  client_config.set("enable.partition.eof", "false");
  client_config.set("auto.offset.reset", config.starting_offset.as_str());
  client_config.set(
    "enable.auto.commit",
    if config.enable_auto_commit {
      "true"
    } else {
      "false"
    },
  );
  client_config.set(
    "auto.commit.interval.ms",
    config.auto_commit_interval_ms.to_string(),
  );
  client_config.set("session.timeout.ms", config.session_timeout_ms.to_string());
  client_config.set_log_level(RDKafkaLogLevel::Warning);
  for (key, value) in &config.custom_properties {
    client_config.set(key, value);
  }
  client_config
}

fn subscribe(config: &KafkaSourceConfig) -> KafkaResult<StreamConsumer<SourceContext>> {
  let consumer: StreamConsumer<SourceContext> =
    client_config(config).create_with_context(SourceContext)?;
  let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
  consumer.subscribe(&topics)?;
  info!(
    topics = ?config.topics,
    group_id = %config.group_id,
    "Subscribed to Kafka topics"
  );
  Ok(consumer)
}

impl Output for KafkaProducer {
  type Output = SourceRecord;
  type OutputStream = Pin<Box<dyn Stream<Item = SourceRecord> + Send>>;
}

impl Producer for KafkaProducer {
  fn produce(&mut self) -> Self::OutputStream {
    let kafka_config = self.kafka_config.clone();
    let component = self.component_info();
    let error_strategy = self.config.error_strategy.clone();
    let prepared = self.consumer.take();
    let failure = self.failure.clone();
    let this = self.clone();

    Box::pin(stream! {
      let consumer = match prepared {
        Some(consumer) => consumer,
        None => match subscribe(&kafka_config) {
          Ok(consumer) => Arc::new(consumer),
          Err(e) => {
            error!(
              component = %component.name,
              topics = ?kafka_config.topics,
              error = %e,
              "Kafka source failed to start"
            );
            failure.record(format!("cannot start Kafka consumer: {}", e));
            return;
          }
        },
      };

      let mut retries = 0usize;
      loop {
        match consumer.recv().await {
          Ok(message) => {
            retries = 0;
            let record = convert_message(&message);
            drop(message);
            yield record;
          }
          Err(e) => {
            let mut error = StreamError::new(
              Box::new(e),
              this.create_error_context(None),
              component.clone(),
            );
            error.retries = retries;
            match error_strategy.action_for(&error) {
              ErrorAction::Stop => {
                error!(
                  component = %component.name,
                  error = %error,
                  "Stopping due to Kafka receive error"
                );
                failure.record(format!("Kafka receive error: {}", error));
                break;
              }
              ErrorAction::Skip => {
                warn!(
                  component = %component.name,
                  error = %error,
                  "Kafka receive error, continuing to poll"
                );
                sleep(Duration::from_millis(100)).await;
              }
              ErrorAction::Retry => {
                retries += 1;
                warn!(
                  component = %component.name,
                  error = %error,
                  retries,
                  "Retrying Kafka receive after delay"
                );
                sleep(Duration::from_secs(1)).await;
              }
            }
          }
        }
      }
    })
  }

  fn set_config_impl(&mut self, config: ProducerConfig<SourceRecord>) {
    self.config = config;
  }

  fn get_config_impl(&self) -> &ProducerConfig<SourceRecord> {
    &self.config
  }

  fn get_config_mut_impl(&mut self) -> &mut ProducerConfig<SourceRecord> {
    &mut self.config
  }
}

struct SourceContext;

impl ClientContext for SourceContext {}

impl ConsumerContext for SourceContext {
  fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
    if let Err(e) = result {
      warn!(error = %e, "Kafka offset commit failed");
    }
  }
}

fn convert_message(message: &BorrowedMessage<'_>) -> SourceRecord {
  SourceRecord {
    partition: message.partition(),
    offset: message.offset(),
    key: message.key().map(<[u8]>::to_vec),
    payload: message.payload().unwrap_or_default().to_vec(),
    timestamp: message.timestamp().to_millis(),
  }
}
