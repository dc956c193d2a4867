use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::request_tracker::Request;
use crate::request_tracker::ResultAndInvalidations;
use crate::request_tracker::RunRequestContext;
use crate::request_tracker::RunRequestError;

use super::RequestResult;

pub use self::config::*;

mod config;


/// Plugin hook that loads the configuration for one search path
pub trait LoadConfig: Debug + Send + Sync {
  fn load_config(&self, config: &mut Config) -> anyhow::Result<()>;
}

/// The configuration a plugin loaded, together with everything it was loaded from
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResult {
  pub resolved_path: Option<PathBuf>,
  pub included_files: Vec<PathBuf>,
  /// Package name to an optional version constraint
  pub dev_deps: BTreeMap<String, Option<String>>,
  pub watch_glob: Option<String>,
  pub should_rehydrate: bool,
  pub should_reload: bool,
  pub should_invalidate_on_startup: bool,
  pub result: Option<Value>,
  pub result_hash: Option<String>,
  /// Candidate config paths that were checked and did not exist
  pub missing_paths: Vec<PathBuf>,
}

/// Runs a plugin's [`LoadConfig`] hook for a search path.
///
/// Identified by the plugin name and the search path. The loader itself is not part of the
/// identity, a plugin is expected to load the same way for the same name.
#[derive(Debug)]
pub struct ConfigRequest {
  pub plugin: String,
  pub search_path: PathBuf,
  pub loader: Arc<dyn LoadConfig>,
}

impl Hash for ConfigRequest {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.plugin.hash(state);
    self.search_path.hash(state);
  }
}

#[async_trait]
impl Request for ConfigRequest {
  fn kind(&self) -> &str {
    "config_request"
  }

  fn params(&self) -> String {
    format!("{} {}", self.plugin, self.search_path.display())
  }

  fn search_path(&self) -> Option<PathBuf> {
    Some(self.search_path.clone())
  }

  #[tracing::instrument(level = "debug", skip_all, fields(plugin = %self.plugin))]
  async fn run(
    &self,
    request_context: RunRequestContext,
  ) -> Result<ResultAndInvalidations, RunRequestError> {
    let mut config = Config::new(request_context.config().clone(), self.search_path.clone());

    self.loader.load_config(&mut config)?;

    let (result, invalidations, flags) = config.into_parts();

    Ok(ResultAndInvalidations::new(RequestResult::Config(result), invalidations).with_flags(flags))
  }
}
