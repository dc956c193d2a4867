use std::path::Path;
use std::path::PathBuf;

use cairn_core::diagnostic::Diagnostic;
use cairn_core::diagnostic::ErrorKind;
use cairn_core::diagnostic_error;
use cairn_core::types::PackageJson;
use cairn_filesystem::FileSystemRef;

use crate::DevDep;
use crate::PackageManager;
use crate::Resolution;

/// Resolves packages the way node does, by walking up through `node_modules` directories
#[derive(Debug)]
pub struct NodePackageManager {
  project_root: PathBuf,
  fs: FileSystemRef,
}

impl NodePackageManager {
  pub fn new(project_root: PathBuf, fs: FileSystemRef) -> Self {
    Self { project_root, fs }
  }

  fn read_package_json(&self, path: &Path) -> anyhow::Result<PackageJson> {
    let contents = self.fs.read_to_string(path)?;
    let package_json = serde_json::from_str::<PackageJson>(&contents)
      .map_err(|error| diagnostic_error!("Error parsing {}: {error}", path.display()))?;

    Ok(package_json)
  }
}

impl PackageManager for NodePackageManager {
  fn resolve(&self, specifier: &str, from: &Path) -> anyhow::Result<Resolution> {
    let start = if self.fs.is_file(from) {
      from.parent().unwrap_or(from)
    } else {
      from
    };

    for directory in start.ancestors() {
      let candidate = directory
        .join("node_modules")
        .join(specifier)
        .join("package.json");

      if self.fs.is_file(&candidate) {
        return Ok(Resolution {
          resolved: candidate,
        });
      }
    }

    Err(diagnostic_error!(Diagnostic::new(format!(
      "Cannot find package '{specifier}' from {}",
      from.display()
    ))
    .kind(ErrorKind::NotFound)
    .hint(format!(
      "Install '{specifier}' in {}",
      self.project_root.display()
    ))))
  }

  #[tracing::instrument(level = "debug", skip(self, resolve_from), ret)]
  fn resolve_dev_dependency(
    &self,
    package_name: &str,
    resolve_from: &Path,
  ) -> anyhow::Result<DevDep> {
    let Resolution { resolved } = self.resolve(package_name, resolve_from)?;

    match self.read_package_json(&resolved) {
      Ok(package_json) => Ok(DevDep {
        file_path: resolved,
        version: package_json.version,
      }),
      Err(err) => {
        // An unreadable descriptor leaves the dependency unversioned
        tracing::warn!(
          "Error while reading dev dependency '{}': {:?}",
          package_name,
          err
        );

        Ok(DevDep {
          file_path: resolved,
          version: None,
        })
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use cairn_filesystem::in_memory_file_system::InMemoryFileSystem;
  use pretty_assertions::assert_eq;

  use super::*;

  fn package_manager(fs: &Arc<InMemoryFileSystem>) -> NodePackageManager {
    NodePackageManager::new(PathBuf::from("/project"), fs.clone())
  }

  #[test]
  fn resolves_the_closest_installed_package() -> anyhow::Result<()> {
    let fs = Arc::new(InMemoryFileSystem::default());
    fs.write_file(
      Path::new("/project/node_modules/foo/package.json"),
      String::from(r#"{"name": "foo", "version": "1.0.0"}"#),
    );
    fs.write_file(
      Path::new("/project/packages/a/node_modules/foo/package.json"),
      String::from(r#"{"name": "foo", "version": "2.0.0"}"#),
    );
    fs.write_file(Path::new("/project/packages/a/index.js"), String::new());
    fs.write_file(Path::new("/project/packages/b/index.js"), String::new());

    let package_manager = package_manager(&fs);

    assert_eq!(
      package_manager.resolve_dev_dependency("foo", Path::new("/project/packages/a/index.js"))?,
      DevDep {
        file_path: PathBuf::from("/project/packages/a/node_modules/foo/package.json"),
        version: Some(String::from("2.0.0")),
      }
    );
    assert_eq!(
      package_manager.resolve_dev_dependency("foo", Path::new("/project/packages/b/index.js"))?,
      DevDep {
        file_path: PathBuf::from("/project/node_modules/foo/package.json"),
        version: Some(String::from("1.0.0")),
      }
    );

    Ok(())
  }

  #[test]
  fn resolves_scoped_packages() -> anyhow::Result<()> {
    let fs = Arc::new(InMemoryFileSystem::default());
    fs.write_file(
      Path::new("/project/node_modules/@scope/pkg/package.json"),
      String::from(r#"{"version": "0.3.1"}"#),
    );

    let dev_dep = package_manager(&fs).resolve_dev_dependency("@scope/pkg", Path::new("/project"))?;

    assert_eq!(dev_dep.version, Some(String::from("0.3.1")));
    Ok(())
  }

  #[test]
  fn returns_an_error_when_the_package_is_not_installed() {
    let fs = Arc::new(InMemoryFileSystem::default());

    let error = package_manager(&fs)
      .resolve("missing", Path::new("/project"))
      .map_err(|err| err.to_string());

    assert_eq!(
      error,
      Err(String::from("Cannot find package 'missing' from /project"))
    );
  }

  #[test]
  fn unreadable_descriptors_have_no_version() -> anyhow::Result<()> {
    let fs = Arc::new(InMemoryFileSystem::default());
    fs.write_file(
      Path::new("/project/node_modules/foo/package.json"),
      String::from("{"),
    );

    let dev_dep = package_manager(&fs).resolve_dev_dependency("foo", Path::new("/project"))?;

    assert_eq!(dev_dep.version, None);
    Ok(())
  }
}
