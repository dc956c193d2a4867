use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// The parsed contents of a configuration source, tagged by the kind of source it came from
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum ConfigContents {
  Json(Value),
  /// JSON5, also used for extension-less `.*rc` files
  Json5(Value),
  Toml(Value),
  Yaml(Value),
  /// The raw text of a file loaded with parsing disabled
  Text(String),
  /// A script config. These are evaluated by plugins, not by the engine.
  Script(PathBuf),
}

impl ConfigContents {
  /// The structured value, for every kind of source that has one
  pub fn as_value(&self) -> Option<&Value> {
    match self {
      ConfigContents::Json(value)
      | ConfigContents::Json5(value)
      | ConfigContents::Toml(value)
      | ConfigContents::Yaml(value) => Some(value),
      ConfigContents::Text(_) | ConfigContents::Script(_) => None,
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.as_value().and_then(|value| value.get(key))
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
  Json,
  Json5,
  Toml,
  Yaml,
  Script,
  Text,
}

impl ConfigFormat {
  pub fn from_path(path: &Path) -> Self {
    match path.extension().and_then(|extension| extension.to_str()) {
      Some("json") => ConfigFormat::Json,
      Some("json5") => ConfigFormat::Json5,
      Some("toml") => ConfigFormat::Toml,
      Some("yaml" | "yml") => ConfigFormat::Yaml,
      Some("js" | "cjs" | "mjs" | "ts" | "cts" | "mts") => ConfigFormat::Script,
      Some(_) => ConfigFormat::Text,
      None => {
        let is_rc_file = path
          .file_name()
          .and_then(|name| name.to_str())
          .is_some_and(|name| name.starts_with('.') && name.ends_with("rc"));

        if is_rc_file {
          ConfigFormat::Json5
        } else {
          ConfigFormat::Text
        }
      }
    }
  }
}
