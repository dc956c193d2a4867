use std::path::Path;
use std::path::PathBuf;

use cairn_core::config_loader::ConfigFile;
use cairn_core::config_loader::ConfigLoaderRef;
use cairn_core::hash::hash_json;
use cairn_core::types::ConfigContents;
use cairn_core::types::Invalidation;
use cairn_core::types::PackageJson;
use serde_json::Value;

use crate::request_tracker::RequestFlags;

use super::ConfigResult;

#[derive(Clone, Debug, PartialEq)]
pub struct GetConfigOptions {
  /// Read the config from this key of the nearest package.json when it is present there
  pub package_key: Option<String>,
  /// Return the raw text instead of parsing it
  pub parse: bool,
  /// Do not record the file as an input of the config
  pub exclude: bool,
}

impl Default for GetConfigOptions {
  fn default() -> Self {
    Self {
      package_key: None,
      parse: true,
      exclude: false,
    }
  }
}

/// Accumulates what a plugin's config depends on while it is being loaded.
///
/// Every file read through [`Config::get_config`] is recorded, as well as every candidate path
/// that was checked and did not exist, so that creating it later invalidates the config.
#[derive(Debug)]
pub struct Config {
  loader: ConfigLoaderRef,
  search_path: PathBuf,
  package: Option<Option<PackageJson>>,
  output: ConfigResult,
}

impl Config {
  pub fn new(loader: ConfigLoaderRef, search_path: PathBuf) -> Self {
    Self {
      loader,
      search_path,
      package: None,
      output: ConfigResult::default(),
    }
  }

  pub fn search_path(&self) -> &Path {
    &self.search_path
  }

  pub fn project_root(&self) -> &Path {
    &self.loader.project_root
  }

  /// What has been recorded so far
  pub fn output(&self) -> &ConfigResult {
    &self.output
  }

  /// Find the closest of `filenames` from the search path up to the project root
  pub fn get_config(
    &mut self,
    filenames: &[&str],
    options: GetConfigOptions,
  ) -> anyhow::Result<Option<ConfigFile<ConfigContents>>> {
    let search_path = self.search_path.clone();
    self.get_config_from(&search_path, filenames, options)
  }

  /// Like [`Config::get_config`], starting at another search path
  #[tracing::instrument(level = "trace", skip(self))]
  pub fn get_config_from(
    &mut self,
    search_path: &Path,
    filenames: &[&str],
    options: GetConfigOptions,
  ) -> anyhow::Result<Option<ConfigFile<ConfigContents>>> {
    if let Some(package_key) = &options.package_key {
      if let Some(config) = self.get_package_key(search_path, package_key)? {
        return Ok(Some(config));
      }
    }

    let search = self.loader.search(filenames, search_path);
    self.add_missing_paths(search.checked);

    let Some(path) = search.found else {
      return Ok(None);
    };

    let config = self.loader.read_config(&path, options.parse)?;

    if !options.exclude {
      self.record_file(path);
    }

    // Script configs are evaluated by the plugin, which the engine cannot track
    if matches!(config.contents, ConfigContents::Script(_)) {
      self.output.should_invalidate_on_startup = true;
    }

    Ok(Some(config))
  }

  fn get_package_key(
    &mut self,
    search_path: &Path,
    package_key: &str,
  ) -> anyhow::Result<Option<ConfigFile<ConfigContents>>> {
    let search = self.loader.search(&["package.json"], search_path);
    self.add_missing_paths(search.checked);

    let Some(path) = search.found else {
      return Ok(None);
    };

    let package = self.loader.read_config(&path, true)?;

    match package.contents.get(package_key).cloned() {
      Some(contents) => {
        self.record_file(path.clone());

        Ok(Some(ConfigFile {
          contents: ConfigContents::Json(contents),
          path,
          raw: package.raw,
        }))
      }
      None => {
        // Adding the key later changes the config
        self.add_included_file(path);
        Ok(None)
      }
    }
  }

  /// The nearest package.json of the search path. Read once per config.
  pub fn get_package(&mut self) -> anyhow::Result<Option<PackageJson>> {
    if let Some(package) = &self.package {
      return Ok(package.clone());
    }

    let search = self.loader.search(&["package.json"], &self.search_path);
    self.add_missing_paths(search.checked);

    let package = match search.found {
      Some(path) => {
        let file = self.loader.load_package_json::<PackageJson>(&path)?;
        self.add_included_file(file.path);
        Some(file.contents)
      }
      None => None,
    };

    self.package = Some(package.clone());
    Ok(package)
  }

  fn record_file(&mut self, path: PathBuf) {
    match &self.output.resolved_path {
      None => self.output.resolved_path = Some(path),
      Some(resolved) if *resolved == path => {}
      Some(_) => self.add_included_file(path),
    }
  }

  fn add_missing_paths(&mut self, paths: Vec<PathBuf>) {
    for path in paths {
      if !self.output.missing_paths.contains(&path) {
        self.output.missing_paths.push(path);
      }
    }
  }

  pub fn add_included_file(&mut self, path: PathBuf) {
    if self.output.resolved_path.as_ref() != Some(&path)
      && !self.output.included_files.contains(&path)
    {
      self.output.included_files.push(path);
    }
  }

  pub fn add_dev_dependency(&mut self, name: impl Into<String>, constraint: Option<String>) {
    self.output.dev_deps.insert(name.into(), constraint);
  }

  /// Invalidate the config when a file matching `glob` is created or deleted.
  /// The pattern is matched against absolute paths.
  pub fn set_watch_glob(&mut self, glob: impl Into<String>) {
    self.output.watch_glob = Some(glob.into());
  }

  pub fn set_resolved_path(&mut self, path: PathBuf) {
    self.output.included_files.retain(|included| *included != path);
    self.output.resolved_path = Some(path);
  }

  pub fn set_result(&mut self, result: Value) {
    self.output.result = Some(result);
  }

  pub fn set_result_hash(&mut self, hash: impl Into<String>) {
    self.output.result_hash = Some(hash.into());
  }

  pub fn should_rehydrate(&mut self) {
    self.output.should_rehydrate = true;
  }

  pub fn should_reload(&mut self) {
    self.output.should_reload = true;
  }

  pub fn should_invalidate_on_startup(&mut self) {
    self.output.should_invalidate_on_startup = true;
  }

  /// The loaded config, the inputs it was loaded from and how it should be cached
  pub fn into_parts(self) -> (ConfigResult, Vec<Invalidation>, RequestFlags) {
    let mut output = self.output;

    // A config that reloads every build never needs rehydrating
    if output.should_reload {
      output.should_rehydrate = false;
    }

    if output.result_hash.is_none() {
      output.result_hash = output.result.as_ref().map(hash_json);
    }

    let mut invalidations = Vec::new();
    invalidations.extend(
      output
        .resolved_path
        .iter()
        .chain(&output.included_files)
        .chain(&output.missing_paths)
        .cloned()
        .map(Invalidation::FileChange),
    );

    for (name, constraint) in &output.dev_deps {
      invalidations.push(Invalidation::DevDependency {
        name: name.clone(),
        constraint: constraint.clone(),
      });
    }

    if let Some(glob) = &output.watch_glob {
      invalidations.push(Invalidation::Glob(glob.clone()));
    }

    let flags = RequestFlags {
      rehydrate: output.should_rehydrate,
      reload: output.should_reload,
      invalidate_on_startup: output.should_invalidate_on_startup,
    };

    (output, invalidations, flags)
  }
}
