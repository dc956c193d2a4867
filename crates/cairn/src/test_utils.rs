use std::path::PathBuf;
use std::sync::Arc;

use cairn_core::cache::CacheRef;
use cairn_core::cache::InMemoryCache;
use cairn_core::types::EnvMap;
use cairn_filesystem::in_memory_file_system::InMemoryFileSystem;
use cairn_filesystem::FileSystemRef;
use cairn_package_manager::NodePackageManager;
use cairn_package_manager::PackageManagerRef;

use crate::request_tracker::RequestTracker;
use crate::CairnOptions;

pub struct RequestTrackerTestOptions {
  pub fs: FileSystemRef,
  pub cache: CacheRef,
  /// Resolves from `fs` when unset
  pub package_manager: Option<PackageManagerRef>,
  pub project_root: PathBuf,
  pub env: EnvMap,
  pub workers: Option<usize>,
}

impl Default for RequestTrackerTestOptions {
  fn default() -> Self {
    Self {
      fs: Arc::new(InMemoryFileSystem::default()),
      cache: Arc::new(InMemoryCache::default()),
      package_manager: None,
      project_root: PathBuf::from("/project"),
      env: EnvMap::new(),
      workers: Some(4),
    }
  }
}

pub(crate) fn request_tracker(options: RequestTrackerTestOptions) -> RequestTracker {
  let RequestTrackerTestOptions {
    fs,
    cache,
    package_manager,
    project_root,
    env,
    workers,
  } = options;

  let package_manager = package_manager.unwrap_or_else(|| {
    Arc::new(NodePackageManager::new(project_root.clone(), fs.clone()))
  });

  let options = CairnOptions {
    project_root,
    env,
    workers,
    ..Default::default()
  };

  RequestTracker::new(cache, fs, Arc::new(options), package_manager)
}
