use std::path::PathBuf;
use std::sync::Arc;

use cairn_core::cache::CacheRef;
use cairn_core::cache::FsCache;
use cairn_core::cache::InMemoryCache;
use cairn_filesystem::os_file_system::OsFileSystem;
use cairn_filesystem::FileSystemRef;
use cairn_package_manager::NodePackageManager;
use cairn_package_manager::PackageManagerRef;
use parking_lot::Mutex;
use tokio::runtime::Runtime;

use crate::request_tracker::BuildReport;
use crate::request_tracker::Request;
use crate::request_tracker::RequestTracker;
use crate::requests::RequestResult;
use crate::CairnOptions;
use crate::WatchEventSender;
use crate::WatchEvents;

/// Synchronous entry point that owns a runtime and one long lived [`RequestTracker`].
///
/// The tracker, and with it the request graph, survives between builds so that rebuilds only
/// re-execute what the reported changes invalidated.
pub struct Cairn {
  pub fs: FileSystemRef,
  pub options: Arc<CairnOptions>,
  pub package_manager: PackageManagerRef,
  pub project_root: PathBuf,
  request_tracker: Mutex<RequestTracker>,
  runtime: Runtime,
}

impl Cairn {
  pub fn new(
    fs: Option<FileSystemRef>,
    options: CairnOptions,
    package_manager: Option<PackageManagerRef>,
    cache: Option<CacheRef>,
  ) -> Result<Self, anyhow::Error> {
    if options.tracing {
      cairn_monitoring::initialize_from_env()?;
    }

    let fs = fs.unwrap_or_else(|| Arc::new(OsFileSystem));
    let project_root = options.project_root.clone();

    let package_manager = package_manager
      .unwrap_or_else(|| Arc::new(NodePackageManager::new(project_root.clone(), fs.clone())));

    let cache = cache.unwrap_or_else(|| match &options.cache_dir {
      Some(cache_dir) => Arc::new(FsCache::new(cache_dir.clone())),
      None => Arc::new(InMemoryCache::default()),
    });

    let threads = num_cpus::get();
    tracing::info!(%threads, "Creating tokio runtime...");
    let runtime = tokio::runtime::Builder::new_multi_thread()
      .enable_all()
      .thread_name("cairn-tokio-worker")
      .worker_threads(threads)
      .build()?;

    let options = Arc::new(options);
    let request_tracker = RequestTracker::new(
      cache,
      fs.clone(),
      options.clone(),
      package_manager.clone(),
    );

    Ok(Self {
      fs,
      options,
      package_manager,
      project_root,
      request_tracker: Mutex::new(request_tracker),
      runtime,
    })
  }

  /// Build `requests` and report the outcome of each one
  pub fn build(&self, requests: Vec<Arc<dyn Request>>) -> anyhow::Result<BuildReport> {
    let mut request_tracker = self.request_tracker.lock();
    self
      .runtime
      .block_on(request_tracker.run_requests(requests))
  }

  pub fn run_request(&self, request: impl Request) -> anyhow::Result<Arc<RequestResult>> {
    let mut request_tracker = self.request_tracker.lock();
    self.runtime.block_on(request_tracker.run_request(request))
  }

  /// A handle for reporting changes, including while a build is running
  pub fn watcher(&self) -> WatchEventSender {
    self.request_tracker.lock().watcher()
  }

  /// Apply changes between builds. Returns whether anything was invalidated.
  pub fn respond_to_fs_events(&self, events: WatchEvents) -> bool {
    self.request_tracker.lock().respond_to_fs_events(events)
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;

  use async_trait::async_trait;
  use cairn_core::types::Invalidation;
  use cairn_filesystem::in_memory_file_system::InMemoryFileSystem;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use serde_json::Value;

  use crate::request_tracker::ResultAndInvalidations;
  use crate::request_tracker::RunRequestContext;
  use crate::request_tracker::RunRequestError;
  use crate::requests::PluginHandler;
  use crate::requests::PluginRequest;
  use crate::WatchEvent;

  use super::*;

  #[derive(Debug, Default)]
  struct LineCount {
    runs: AtomicUsize,
  }

  #[async_trait]
  impl PluginHandler for LineCount {
    async fn run(
      &self,
      params: &Value,
      request_context: RunRequestContext,
    ) -> Result<ResultAndInvalidations, RunRequestError> {
      self.runs.fetch_add(1, Ordering::SeqCst);

      let path = PathBuf::from(params["path"].as_str().unwrap_or_default());
      let contents = request_context.file_system().read_to_string(&path)?;

      Ok(ResultAndInvalidations::new(
        RequestResult::Plugin(json!(contents.lines().count())),
        vec![Invalidation::FileChange(path)],
      ))
    }
  }

  fn cairn(fs: Arc<InMemoryFileSystem>) -> anyhow::Result<Cairn> {
    Cairn::new(
      Some(fs),
      CairnOptions {
        workers: Some(2),
        ..CairnOptions::new(PathBuf::from("/project"))
      },
      None,
      None,
    )
  }

  fn line_count(handler: &Arc<LineCount>) -> PluginRequest {
    PluginRequest {
      kind: String::from("line_count"),
      params: json!({ "path": "/project/notes.txt" }),
      handler: handler.clone(),
    }
  }

  #[test]
  fn rebuilds_only_after_a_reported_change() -> anyhow::Result<()> {
    let fs = Arc::new(InMemoryFileSystem::default());
    fs.write_file(Path::new("/project/notes.txt"), String::from("a\nb"));

    let cairn = cairn(fs.clone())?;
    let handler = Arc::new(LineCount::default());

    let result = cairn.run_request(line_count(&handler))?;
    assert_eq!(result.as_plugin(), Some(&json!(2)));

    let report = cairn.build(vec![Arc::new(line_count(&handler))])?;
    assert!(report.is_success());
    assert_eq!(report.executed, 0);

    fs.write_file(Path::new("/project/notes.txt"), String::from("a\nb\nc"));
    assert!(cairn.respond_to_fs_events(vec![WatchEvent::Update(PathBuf::from(
      "/project/notes.txt"
    ))]));

    let result = cairn.run_request(line_count(&handler))?;
    assert_eq!(result.as_plugin(), Some(&json!(3)));
    assert_eq!(handler.runs.load(Ordering::SeqCst), 2);

    Ok(())
  }

  #[test]
  fn changes_sent_through_the_watcher_apply_to_the_next_build() -> anyhow::Result<()> {
    let fs = Arc::new(InMemoryFileSystem::default());
    fs.write_file(Path::new("/project/notes.txt"), String::from("a"));

    let cairn = cairn(fs.clone())?;
    let handler = Arc::new(LineCount::default());

    cairn.run_request(line_count(&handler))?;

    fs.write_file(Path::new("/project/notes.txt"), String::from("a\nb"));
    cairn
      .watcher()
      .send(vec![WatchEvent::Update(PathBuf::from("/project/notes.txt"))])?;

    let result = cairn.run_request(line_count(&handler))?;
    assert_eq!(result.as_plugin(), Some(&json!(2)));

    Ok(())
  }
}
