use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

pub use config_request::*;
pub use plugin_request::*;

mod config_request;
mod plugin_request;

/// Union of all request outputs
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum RequestResult {
  Config(ConfigResult),
  Plugin(Value),
  // The following are test request types only used in the test build
  #[cfg(test)]
  TestSub(String),
  #[cfg(test)]
  TestMain(Vec<String>),
}

impl RequestResult {
  pub fn as_config(&self) -> Option<&ConfigResult> {
    match self {
      RequestResult::Config(output) => Some(output),
      _ => None,
    }
  }

  pub fn as_plugin(&self) -> Option<&Value> {
    match self {
      RequestResult::Plugin(output) => Some(output),
      _ => None,
    }
  }
}
