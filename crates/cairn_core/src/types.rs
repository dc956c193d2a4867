use std::collections::BTreeMap;

pub use self::config_contents::*;
pub use self::invalidation::*;
pub use self::package_json::*;

mod config_contents;
mod invalidation;
mod package_json;

/// Environment variables visible to requests
pub type EnvMap = BTreeMap<String, String>;
