//! Prometheus-compatible metrics for salesweave.
//!
//! Every decision point of a pipeline records a counter labelled by pipeline or sink name.
//! Install a recorder with [`install_prometheus_recorder_on`] at start-up to expose them for
//! scraping; without a recorder, recording is a no-op.
//!
//! | Metric | Kind | Labels |
//! |---|---|---|
//! | `salesweave_events_total` | counter | `pipeline` |
//! | `salesweave_dead_letters_total` | counter | `source`, `reason` |
//! | `salesweave_dead_letters_lost_total` | counter | `source` |
//! | `salesweave_rows_flushed_total` | counter | `sink` |
//! | `salesweave_flush_retries_total` | counter | `sink` |
//! | `salesweave_fatal_flushes_total` | counter | `sink` |
//! | `salesweave_state_corruptions_total` | counter | `pipeline` |
//! | `salesweave_sink_buffered` | gauge | `sink` |
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! salesweave::metrics::install_prometheus_recorder_on("0.0.0.0:9000".parse()?)?;
//! # Ok(())
//! # }
//! ```

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Installs the Prometheus recorder and serves `GET /metrics` on `addr`. Call once.
pub fn install_prometheus_recorder_on(addr: std::net::SocketAddr) -> Result<(), BuildError> {
  PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Counts a source event entering `pipeline`.
pub fn record_event(pipeline: &str) {
  counter!("salesweave_events_total", "pipeline" => pipeline.to_string()).increment(1);
}

/// Counts a record sent to the dead-letter path.
pub fn record_dead_letter(source: &str, reason: &str) {
  counter!(
    "salesweave_dead_letters_total",
    "source" => source.to_string(),
    "reason" => reason.to_string()
  )
  .increment(1);
}

/// Counts a dead letter that could not be delivered.
pub fn record_dead_letter_lost(source: &str) {
  counter!("salesweave_dead_letters_lost_total", "source" => source.to_string()).increment(1);
}

/// Counts rows written by a successful flush.
pub fn record_rows_flushed(sink: &str, rows: u64) {
  counter!("salesweave_rows_flushed_total", "sink" => sink.to_string()).increment(rows);
}

/// Counts a retried flush attempt.
pub fn record_flush_retry(sink: &str) {
  counter!("salesweave_flush_retries_total", "sink" => sink.to_string()).increment(1);
}

/// Counts a batch given up on.
pub fn record_fatal_flush(sink: &str) {
  counter!("salesweave_fatal_flushes_total", "sink" => sink.to_string()).increment(1);
}

/// Counts a corrupted or poisoned aggregation key hit.
pub fn record_state_corruption(pipeline: &str) {
  counter!("salesweave_state_corruptions_total", "pipeline" => pipeline.to_string()).increment(1);
}

/// Sets the number of records buffered in a sink.
pub fn record_sink_buffered(sink: &str, buffered: usize) {
  gauge!("salesweave_sink_buffered", "sink" => sink.to_string()).set(buffered as f64);
}
