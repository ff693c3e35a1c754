//! `salesweave` binary: Kafka to PostgreSQL.
//!
//! Configured entirely from the environment, see [`salesweave::config`]. Stops reading on
//! Ctrl-C or SIGTERM, flushes every sink and exits non-zero if anything could not be written
//! or the Kafka source could not be read.

use std::process::ExitCode;
use std::sync::Arc;

use salesweave::config::AppConfig;
use salesweave::consumers::{DeadLetterQueue, DeadLetterSink, JsonlDeadLetterWriter, PostgresStore};
use salesweave::error::PipelineError;
use salesweave::pipeline::SalesPipeline;
use salesweave::producers::KafkaProducer;
use salesweave::{logging, metrics};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
  let config = match AppConfig::from_env() {
    Ok(config) => config,
    Err(e) => {
      logging::init("info");
      error!(error = %e, "Invalid configuration");
      return ExitCode::FAILURE;
    }
  };
  logging::init(config.log_filter.as_deref().unwrap_or("info"));

  match run(config).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!(error = %e, "salesweave stopped with an error");
      ExitCode::FAILURE
    }
  }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
  if let Some(addr) = config.metrics_addr {
    metrics::install_prometheus_recorder_on(addr)?;
    info!(%addr, "Serving Prometheus metrics");
  }

  let source = KafkaProducer::new(config.kafka).connect()?;
  let source_failure = source.failure();

  let store = Arc::new(PostgresStore::connect(&config.store).await?);
  let dead_letters: Arc<dyn DeadLetterSink> = match &config.dead_letters.path {
    Some(path) => Arc::new(JsonlDeadLetterWriter::open(path).await?),
    None => {
      warn!("No dead-letter file configured, dead letters are kept in memory only");
      Arc::new(DeadLetterQueue::new())
    }
  };

  let pipeline = SalesPipeline::builder(store, dead_letters)
    .config(config.pipeline)
    .build()
    .await?;

  let cancel = CancellationToken::new();
  tokio::spawn(cancel_on_signal(cancel.clone()));

  let report = pipeline.run(source, cancel).await?;
  if let Some(reason) = source_failure.get() {
    return Err(PipelineError::SourceStopped(reason).into());
  }
  info!(
    report = %serde_json::to_string(&report).unwrap_or_default(),
    "salesweave finished"
  );
  Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
      Ok(mut terminate) => {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
          _ = terminate.recv() => info!("Received SIGTERM"),
        }
      }
      Err(e) => {
        warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl-C stops the pipeline");
        let _ = tokio::signal::ctrl_c().await;
      }
    }
  }
  #[cfg(not(unix))]
  {
    let _ = tokio::signal::ctrl_c().await;
  }
  cancel.cancel();
}
