//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the filter passed to [`init`], so an operator can raise verbosity for
//! one module (`RUST_LOG=salesweave::consumers::upsert_sink=debug`) without a new build.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global subscriber: human-readable lines on stdout, filtered by `RUST_LOG` or
/// else `default_filter`.
///
/// Returns false if a subscriber was already installed, which is harmless (tests call this
/// more than once).
pub fn init(default_filter: &str) -> bool {
  let env_filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(default_filter))
    .unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(fmt::layer().with_target(true))
    .try_init()
    .is_ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_second_init_is_harmless() {
    init("warn");
    assert!(!init("debug"));
  }
}
