use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// An input a request consulted while computing its result.
///
/// Requests report the exact set of inputs they read; the request tracker turns each of these
/// into an edge of the request graph and snapshots the current state of the input.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Invalidation {
  /// A file path. The path does not need to exist: a missing file is an input too, and creating
  /// it invalidates the request.
  FileChange(PathBuf),
  /// A glob pattern matched against files created or deleted later on
  Glob(String),
  /// An environment variable
  Env(String),
  /// An installed package, optionally constrained to a semver range
  DevDependency {
    name: String,
    constraint: Option<String>,
  },
}

impl Invalidation {
  pub fn file(path: impl Into<PathBuf>) -> Self {
    Invalidation::FileChange(path.into())
  }

  pub fn env(name: impl Into<String>) -> Self {
    Invalidation::Env(name.into())
  }
}
