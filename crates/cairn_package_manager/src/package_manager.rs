use std::fmt::Debug;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use mockall::automock;
use serde::Deserialize;

/// PackageManager abstraction instance
pub type PackageManagerRef = Arc<dyn PackageManager + Send + Sync>;

#[derive(Debug, Deserialize, PartialEq)]
pub struct Resolution {
  /// The package descriptor of the resolved package
  pub resolved: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DevDep {
  pub file_path: PathBuf,
  /// The installed version, when the package declares one
  pub version: Option<String>,
}

#[automock]
pub trait PackageManager: Debug {
  fn resolve(&self, specifier: &str, from: &Path) -> anyhow::Result<Resolution>;
  fn resolve_dev_dependency(
    &self,
    package_name: &str,
    resolve_from: &Path,
  ) -> anyhow::Result<DevDep>;
}
