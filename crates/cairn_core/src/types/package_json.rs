use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

pub type DependencyList = BTreeMap<String, String>;

/// A package descriptor. Fields the engine does not interpret are kept in `fields`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
  pub name: Option<String>,
  pub version: Option<String>,
  #[serde(default)]
  pub dependencies: DependencyList,
  #[serde(default)]
  pub dev_dependencies: DependencyList,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}
