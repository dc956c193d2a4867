use std::path::PathBuf;

use anyhow::Context;
use cairn_core::types::EnvMap;
use serde::Deserialize;
use serde::Serialize;

const CACHE_DIR_VAR: &str = "CAIRN_CACHE_DIR";
const WORKERS_VAR: &str = "CAIRN_WORKERS";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CairnOptions {
  pub project_root: PathBuf,

  /// Where cache entries are persisted. Entries are kept in memory when unset.
  pub cache_dir: Option<PathBuf>,

  /// Environment variables visible to requests
  #[serde(default)]
  pub env: EnvMap,

  /// Number of requests that may execute at once. Defaults to the number of CPUs.
  pub workers: Option<usize>,

  /// Initialize tracing output from `CAIRN_TRACING_MODE` when the engine is created
  #[serde(default)]
  pub tracing: bool,
}

impl CairnOptions {
  pub fn new(project_root: PathBuf) -> Self {
    Self {
      project_root,
      ..Default::default()
    }
  }

  /// Options for `project_root` taking the process environment and the `CAIRN_*` overrides
  pub fn from_env(project_root: PathBuf) -> anyhow::Result<Self> {
    let env = std::env::vars().collect::<EnvMap>();
    Self::from_env_map(project_root, env)
  }

  pub(crate) fn from_env_map(project_root: PathBuf, env: EnvMap) -> anyhow::Result<Self> {
    let cache_dir = env
      .get(CACHE_DIR_VAR)
      .filter(|value| !value.is_empty())
      .map(PathBuf::from);

    let workers = env
      .get(WORKERS_VAR)
      .filter(|value| !value.is_empty())
      .map(|value| {
        value
          .parse::<usize>()
          .with_context(|| format!("Invalid value for {WORKERS_VAR}: {value}"))
      })
      .transpose()?;

    Ok(Self {
      project_root,
      cache_dir,
      env,
      workers,
      tracing: false,
    })
  }

  /// Worker capacity, never less than one
  pub fn workers(&self) -> usize {
    self.workers.unwrap_or_else(num_cpus::get).max(1)
  }
}
