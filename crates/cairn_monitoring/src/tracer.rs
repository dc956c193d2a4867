//! This module configures `tracing_subscriber` to write to a log file and optionally to standard
//! output.
use std::path::PathBuf;

use anyhow::anyhow;
use serde::Deserialize;
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

use crate::from_env::optional_var;
use crate::from_env::FromEnvError;

const TRACING_MODE_VAR: &str = "CAIRN_TRACING_MODE";
const TRACING_DIR_VAR: &str = "CAIRN_TRACING_DIR";
const MAX_LOG_FILES: usize = 4;

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum TracerMode {
  /// Output the Tracer logs to Stdout
  Stdout,
}

impl TracerMode {
  /// Parse a comma separated list of modes. The log file is always written, so `file` is
  /// accepted and ignored.
  pub fn from_env() -> Result<Vec<Self>, FromEnvError> {
    let Some(mode) = optional_var(TRACING_MODE_VAR) else {
      return Ok(vec![]);
    };

    let mut tracer_modes = vec![];
    for mode in mode.split(',').map(|s| s.trim()) {
      match mode {
        "stdout" => {
          if !tracer_modes.contains(&Self::Stdout) {
            tracer_modes.push(Self::stdout());
          }
        }
        "file" => {}
        value => {
          return Err(FromEnvError::InvalidKey(
            String::from(TRACING_MODE_VAR),
            anyhow!("Invalid value: {}", value),
          ))
        }
      }
    }

    Ok(tracer_modes)
  }

  /// Default STDOUT configuration
  pub fn stdout() -> Self {
    Self::Stdout
  }
}

fn trace_directory() -> PathBuf {
  optional_var(TRACING_DIR_VAR)
    .map(PathBuf::from)
    .unwrap_or_else(|| std::env::temp_dir().join("cairn_trace"))
}

/// Holds the writer guards of every installed layer. Dropping it flushes pending output.
pub struct Tracer {
  #[allow(unused)]
  worker_guards: Vec<WorkerGuard>,
}

/// A formatting layer over a non-blocking writer, filtered by `RUST_LOG`
fn span_layer<W>(
  writer: W,
  worker_guards: &mut Vec<WorkerGuard>,
) -> impl Layer<Registry> + Send + Sync
where
  W: std::io::Write + Send + 'static,
{
  let (non_blocking, worker_guard) = tracing_appender::non_blocking(writer);
  worker_guards.push(worker_guard);

  tracing_subscriber::fmt::layer()
    .with_writer(non_blocking)
    .with_span_events(FmtSpan::CLOSE)
    .with_filter(EnvFilter::from_default_env())
}

impl Tracer {
  pub fn new(options: &[TracerMode]) -> anyhow::Result<Self> {
    let mut worker_guards = vec![];

    let log_file = RollingFileAppender::builder()
      .rotation(Rotation::HOURLY)
      .max_log_files(MAX_LOG_FILES)
      .filename_prefix("cairn-tracing")
      .build(trace_directory())
      .map_err(|err| anyhow!(err))?;

    let mut layers = vec![span_layer(log_file, &mut worker_guards).boxed()];
    if options.contains(&TracerMode::Stdout) {
      layers.push(span_layer(std::io::stdout(), &mut worker_guards).boxed());
    }

    tracing::subscriber::set_global_default(Registry::default().with(layers))?;

    Ok(Self { worker_guards })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  static TEST_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

  #[test]
  fn test_tracing_options_sets_to_none_if_no_mode_is_set() {
    let _guard = TEST_LOCK.lock();
    std::env::remove_var(TRACING_MODE_VAR);
    let options = TracerMode::from_env().unwrap();
    assert!(options.is_empty());
  }

  #[test]
  fn test_tracing_options_sets_to_stdout() {
    let _guard = TEST_LOCK.lock();
    std::env::set_var(TRACING_MODE_VAR, "file, stdout,stdout");
    let options = TracerMode::from_env().unwrap();
    assert_eq!(options, vec![TracerMode::Stdout]);
  }

  #[test]
  fn test_tracing_options_rejects_unknown_modes() {
    let _guard = TEST_LOCK.lock();
    std::env::set_var(TRACING_MODE_VAR, "chrome");
    let error = TracerMode::from_env().unwrap_err();
    assert_eq!(
      error.to_string(),
      "Invalid value for CAIRN_TRACING_MODE: Invalid value: chrome"
    );
    std::env::remove_var(TRACING_MODE_VAR);
  }
}
