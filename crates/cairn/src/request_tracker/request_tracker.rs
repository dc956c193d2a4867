use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use cairn_core::cache::CacheRef;
use cairn_core::config_loader::ConfigLoader;
use cairn_core::hash::content_hash;
use cairn_core::types::EnvMap;
use cairn_core::types::Invalidation;
use cairn_filesystem::FileSystemRef;
use cairn_package_manager::PackageManagerRef;
use glob_match::glob_match;
use nodejs_semver::Range;
use nodejs_semver::Version;
use parking_lot::RwLock;
use petgraph::graph::NodeIndex;
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::cache_store::format_request_id;
use crate::cache_store::parse_request_id;
use crate::cache_store::CacheEntry;
use crate::cache_store::CacheStore;
use crate::cache_store::InputSnapshot;
use crate::requests::RequestResult;
use crate::CairnError;
use crate::CairnOptions;
use crate::RequestError;
use crate::WatchEventSender;
use crate::WatchEvents;

use super::FileReads;
use super::Request;
use super::RequestFailure;
use super::RequestGraph;
use super::RequestId;
use super::RequestQueueMessage;
use super::RequestResponse;
use super::RequestStatus;
use super::ResultAndInvalidations;
use super::TrackedFileSystem;
use super::RunRequestContext;
use super::WorkerOutcome;
use super::WorkerPool;
use super::MAX_EXECUTION_ATTEMPTS;

/// Someone waiting for a request to reach a terminal state
#[derive(Debug)]
enum Waiter {
  /// One of the requests a build was started with
  Root(usize),
  /// A running handler that asked for a sub-request
  Request {
    parent: NodeIndex,
    response_tx: oneshot::Sender<RequestResponse>,
  },
  /// A request waiting for its known sub-requests before it runs again
  Parent(NodeIndex),
}

#[derive(Debug)]
struct Prefetch {
  remaining: usize,
  blocked_by: Option<String>,
}

/// The outcome of one call to [`RequestTracker::run_requests`]
#[derive(Debug)]
pub struct BuildReport {
  /// One entry per requested root, in order
  pub results: Vec<RequestResponse>,
  /// How many handler executions the build started
  pub executed: usize,
}

impl BuildReport {
  /// Roots whose own handler failed or crashed
  pub fn failed(&self) -> Vec<&RequestError> {
    self
      .results
      .iter()
      .filter_map(|result| result.as_ref().err())
      .filter(|error| !error.is_blocked())
      .collect()
  }

  /// Roots that could not run because a dependency failed
  pub fn blocked(&self) -> Vec<&RequestError> {
    self
      .results
      .iter()
      .filter_map(|result| result.as_ref().err())
      .filter(|error| error.is_blocked())
      .collect()
  }

  pub fn is_success(&self) -> bool {
    self.results.iter().all(|result| result.is_ok())
  }
}

/// [`RequestTracker`] runs cairn work items and constructs a graph of their dependencies.
///
/// Whenever a [`Request`] implementation needs the result of another piece of work, it calls
/// into the tracker through its [`RunRequestContext`]. The tracker checks whether that work has a
/// valid result, in memory or in the cache store, and otherwise schedules it on the worker pool.
///
/// By asking for the result of a piece of work a request creates an edge between itself and that
/// sub-request. Together with the inputs each request reports, these edges decide what a change
/// invalidates.
///
/// Only the loop in [`RequestTracker::run_requests`] mutates the graph and the cache store.
/// Handlers run on worker tasks and talk to it through [`RequestQueueMessage`]s.
pub struct RequestTracker {
  pub(super) build: u64,
  pub(super) cache_store: CacheStore,
  pub(super) changed_env: HashMap<String, u64>,
  pub(super) changed_files: HashMap<PathBuf, u64>,
  pub(super) env: Arc<RwLock<EnvMap>>,
  executed: usize,
  execution_counter: u64,
  fatal: Option<RequestError>,
  pub(super) file_system: FileSystemRef,
  pub(super) generation: u64,
  pub(super) graph: RequestGraph,
  options: Arc<CairnOptions>,
  pub(super) package_manager: PackageManagerRef,
  prefetching: HashMap<NodeIndex, Prefetch>,
  pub(super) project_root: PathBuf,
  queue_rx: UnboundedReceiver<RequestQueueMessage>,
  queue_tx: UnboundedSender<RequestQueueMessage>,
  root_results: Vec<Option<RequestResponse>>,
  running: usize,
  shared_results: HashMap<(NodeIndex, NodeIndex), Arc<RequestResult>>,
  waiters: HashMap<NodeIndex, Vec<Waiter>>,
  watch_rx: UnboundedReceiver<WatchEvents>,
  watch_tx: UnboundedSender<WatchEvents>,
  worker_pool: WorkerPool,
}

enum QueueEvent {
  Message(RequestQueueMessage),
  Watch(WatchEvents),
}

impl RequestTracker {
  pub fn new(
    cache: CacheRef,
    file_system: FileSystemRef,
    options: Arc<CairnOptions>,
    package_manager: PackageManagerRef,
  ) -> Self {
    let project_root = options.project_root.clone();
    let (queue_tx, queue_rx) = unbounded_channel();
    let (watch_tx, watch_rx) = unbounded_channel();

    RequestTracker {
      build: 0,
      cache_store: CacheStore::new(cache),
      changed_env: HashMap::new(),
      changed_files: HashMap::new(),
      env: Arc::new(RwLock::new(options.env.clone())),
      executed: 0,
      execution_counter: 0,
      fatal: None,
      file_system,
      generation: 0,
      graph: RequestGraph::new(),
      package_manager,
      prefetching: HashMap::new(),
      project_root,
      queue_rx,
      queue_tx,
      root_results: Vec::new(),
      running: 0,
      shared_results: HashMap::new(),
      waiters: HashMap::new(),
      watch_rx,
      watch_tx,
      worker_pool: WorkerPool::new(options.workers()),
      options,
    }
  }

  /// A handle that feeds watch events to this tracker, including while a build is running
  pub fn watcher(&self) -> WatchEventSender {
    WatchEventSender::new(self.watch_tx.clone())
  }

  pub fn graph(&self) -> &RequestGraph {
    &self.graph
  }

  pub fn cache_store(&self) -> &CacheStore {
    &self.cache_store
  }

  /// Run a single root request and return its result
  pub async fn run_request(&mut self, request: impl Request) -> anyhow::Result<Arc<RequestResult>> {
    let report = self.run_requests(vec![Arc::new(request)]).await?;

    report
      .results
      .into_iter()
      .next()
      .ok_or_else(|| anyhow!("Build produced no result"))?
      .map_err(anyhow::Error::new)
  }

  /// Build `requests`, reusing every result whose inputs are unchanged.
  ///
  /// Failures are reported per root in the [`BuildReport`]. Only a dependency cycle aborts the
  /// build, with [`RequestError::CycleDetected`].
  #[tracing::instrument(level = "info", skip_all)]
  pub async fn run_requests(
    &mut self,
    requests: Vec<Arc<dyn Request>>,
  ) -> anyhow::Result<BuildReport> {
    self.build += 1;
    self.executed = 0;
    self.fatal = None;
    self.root_results = vec![None; requests.len()];

    tracing::info!(build = self.build, roots = requests.len(), "Starting build");
    self.prepare_build();

    for (index, request) in requests.into_iter().enumerate() {
      self.handle_run_request(request, None, Waiter::Root(index));
    }

    while self.running > 0 {
      let event = tokio::select! {
        Some(message) = self.queue_rx.recv() => QueueEvent::Message(message),
        Some(events) = self.watch_rx.recv() => QueueEvent::Watch(events),
        else => break,
      };

      match event {
        QueueEvent::Message(message) => self.handle_message(message),
        QueueEvent::Watch(events) => {
          self.respond_to_fs_events(events);
        }
      }
    }

    self.changed_files.clear();
    self.changed_env.clear();

    if let Some(error) = self.fatal.take() {
      tracing::error!("Build aborted: {error}");
      self.root_results.clear();
      return Err(anyhow::Error::new(error));
    }

    let results = std::mem::take(&mut self.root_results)
      .into_iter()
      .collect::<Option<Vec<_>>>()
      .ok_or_else(|| anyhow!("Build finished with unresolved requests"))?;

    let report = BuildReport {
      results,
      executed: self.executed,
    };

    tracing::info!(
      executed = report.executed,
      failed = report.failed().len(),
      blocked = report.blocked().len(),
      "Build finished"
    );

    Ok(report)
  }

  /// Apply changes that happened between builds and the per-build request flags
  fn prepare_build(&mut self) {
    while let Ok(events) = self.watch_rx.try_recv() {
      self.respond_to_fs_events(events);
    }

    self.changed_files.clear();
    self.changed_env.clear();

    self.check_dev_dependencies();

    let mut reload = Vec::new();
    let mut rehydrate = Vec::new();
    for (node, state) in self.graph.requests() {
      if !state.is_valid() {
        continue;
      }

      // Reloading takes precedence over rehydrating
      if state.flags.reload {
        reload.push(node);
      } else if state.flags.rehydrate {
        rehydrate.push(node);
      }
    }

    for node in rehydrate {
      if !self.rehydrate(node) {
        reload.push(node);
      }
    }

    self.propagate_invalidations(reload);
  }

  /// Replace the in-memory result of `node` with a fresh decode of its cache entry
  fn rehydrate(&mut self, node: NodeIndex) -> bool {
    let Some(key) = self.graph.request(node).and_then(|state| state.cache_key.clone()) else {
      return false;
    };

    let result = match self.cache_store.get(&key).map(|entry| entry.decode_result()) {
      Some(Ok(result)) => result,
      Some(Err(error)) => {
        tracing::warn!(%key, "Failed to rehydrate result: {error}");
        return false;
      }
      None => return false,
    };

    if let Some(state) = self.graph.request_mut(node) {
      tracing::trace!(request = %state.describe(), "Rehydrated result");
      state.result = Some(Arc::new(result));
    }

    true
  }

  fn handle_message(&mut self, message: RequestQueueMessage) {
    match message {
      RequestQueueMessage::RunRequest {
        request,
        parent_request_id,
        response_tx,
      } => {
        let Some(parent) = parent_request_id.and_then(|id| self.graph.node_for(id)) else {
          tracing::warn!(?parent_request_id, "Sub-request from an unknown request");
          let _ = response_tx.send(Err(RequestError::HandlerFailure {
            kind: request.kind().to_string(),
            params: request.params(),
            search_path: request.search_path(),
            message: String::from("The requesting request is unknown to the tracker"),
          }));
          return;
        };

        self.handle_run_request(
          request,
          Some(parent),
          Waiter::Request {
            parent,
            response_tx,
          },
        );
      }
      RequestQueueMessage::RequestResult {
        request_id,
        execution,
        outcome,
        reads,
      } => {
        self.running = self.running.saturating_sub(1);
        self.handle_request_result(request_id, execution, outcome, reads);
      }
    }
  }

  fn handle_run_request(
    &mut self,
    request: Arc<dyn Request>,
    parent: Option<NodeIndex>,
    waiter: Waiter,
  ) {
    let node = self.graph.get_or_create(request);

    match parent {
      Some(parent) => {
        if let Err(error) = self.graph.add_subrequest_edge(parent, node) {
          tracing::error!("{error}");
          self.fatal.get_or_insert_with(|| error.clone());
          self.answer(node, waiter, Err(error));
          return;
        }
      }
      None => self.graph.add_root_edge(node),
    }

    if let Waiter::Request { parent, .. } = &waiter {
      if let Some(result) = self.shared_results.get(&(*parent, node)).cloned() {
        self.answer(node, waiter, Ok(result));
        return;
      }
    }

    self.load_from_cache(node);

    let Some(state) = self.graph.request(node) else {
      return;
    };

    match &state.status {
      RequestStatus::Valid => match state.result.clone() {
        Some(result) => {
          tracing::trace!(request = %state.describe(), "Reusing result");
          self.answer(node, waiter, Ok(result));
        }
        None => {
          self.waiters.entry(node).or_default().push(waiter);
          self.start(node);
        }
      },
      RequestStatus::Running => {
        self.waiters.entry(node).or_default().push(waiter);
      }
      RequestStatus::Pending if self.prefetching.contains_key(&node) => {
        self.waiters.entry(node).or_default().push(waiter);
      }
      RequestStatus::Failed(RequestFailure { error, build }) if *build == self.build => {
        let error = error.clone();
        self.answer(node, waiter, Err(error));
      }
      RequestStatus::Pending | RequestStatus::Invalid | RequestStatus::Failed(_) => {
        self.waiters.entry(node).or_default().push(waiter);
        self.start(node);
      }
    }
  }

  /// Run an invalid or new request.
  ///
  /// A request whose own inputs are unchanged first waits for its previously recorded
  /// sub-requests that are invalid, and is not executed when one of them fails.
  fn start(&mut self, node: NodeIndex) {
    let Some(state) = self.graph.request(node) else {
      return;
    };

    let mut children = Vec::new();
    if state.status == RequestStatus::Invalid && !state.direct_invalid && state.result.is_some() {
      for child in self.graph.subrequests(node) {
        if let Some(request) = self
          .graph
          .request(child)
          .filter(|child| !child.is_valid())
          .and_then(|child| child.request.clone())
        {
          children.push(request);
        }
      }
    }

    if children.is_empty() {
      self.execute(node, false);
      return;
    }

    tracing::debug!(
      request = %state.describe(),
      count = children.len(),
      "Waiting for invalid sub-requests"
    );

    if let Some(state) = self.graph.request_mut(node) {
      state.status = RequestStatus::Pending;
    }

    self.prefetching.insert(
      node,
      Prefetch {
        remaining: children.len(),
        blocked_by: None,
      },
    );

    for child in children {
      self.handle_run_request(child, Some(node), Waiter::Parent(node));
    }
  }

  fn on_prefetched(&mut self, parent: NodeIndex, child: NodeIndex, response: &RequestResponse) {
    let dependency = self
      .graph
      .request(child)
      .map(|state| state.describe())
      .unwrap_or_default();

    let Some(prefetch) = self.prefetching.get_mut(&parent) else {
      return;
    };

    prefetch.remaining = prefetch.remaining.saturating_sub(1);
    if response.is_err() {
      prefetch.blocked_by.get_or_insert(dependency);
    }

    if prefetch.remaining > 0 {
      return;
    }

    let blocked_by = self
      .prefetching
      .remove(&parent)
      .and_then(|prefetch| prefetch.blocked_by);

    let Some(state) = self.graph.request(parent) else {
      return;
    };

    match blocked_by {
      Some(dependency) if !state.direct_invalid => {
        let error = RequestError::Blocked {
          kind: state.kind.clone(),
          params: state.params.clone(),
          dependency,
        };
        self.fail(parent, error);
      }
      _ => self.execute(parent, false),
    }
  }

  /// Hand `node` to the worker pool
  fn execute(&mut self, node: NodeIndex, retry: bool) {
    if let Some(error) = self.fatal.clone() {
      self.fail(node, error);
      return;
    }

    self.execution_counter += 1;
    let execution = self.execution_counter;
    let generation = self.generation;

    let Some(state) = self.graph.request_mut(node) else {
      return;
    };

    let Some(request) = state.request.clone() else {
      let error = RequestError::HandlerFailure {
        kind: state.kind.clone(),
        params: state.params.clone(),
        search_path: None,
        message: String::from("The request is only known from the cache and cannot be run"),
      };
      self.fail(node, error);
      return;
    };

    if !retry {
      state.attempts = 0;
    }

    state.status = RequestStatus::Running;
    state.stale = false;
    state.direct_invalid = false;
    state.started_generation = generation;
    state.execution = execution;
    state.attempts += 1;

    let request_id = state.id;
    tracing::debug!(request = %state.describe(), attempt = state.attempts, "Running request");

    self.graph.clear_edges(node);
    self.running += 1;
    self.executed += 1;

    let slot = self.worker_pool.slot();
    let file_system = Arc::new(TrackedFileSystem::new(self.file_system.clone()));
    let context = RunRequestContext::new(
      request_id,
      Arc::new(ConfigLoader::new(
        file_system.clone(),
        self.project_root.clone(),
      )),
      self.env.clone(),
      file_system.clone(),
      self.options.clone(),
      self.project_root.clone(),
      self.queue_tx.clone(),
      slot.clone(),
    );

    let queue_tx = self.queue_tx.clone();
    self.worker_pool.spawn(
      slot,
      async move { request.run(context).await },
      move |outcome| {
        // The tracker may have finished with an error, nothing is waiting then
        let _ = queue_tx.send(RequestQueueMessage::RequestResult {
          request_id,
          execution,
          outcome,
          reads: file_system.take_reads(),
        });
      },
    );
  }

  fn handle_request_result(
    &mut self,
    request_id: RequestId,
    execution: u64,
    outcome: WorkerOutcome,
    reads: FileReads,
  ) {
    let Some(node) = self.graph.node_for(request_id) else {
      return;
    };

    let Some(state) = self.graph.request(node) else {
      return;
    };

    if state.execution != execution || state.status != RequestStatus::Running {
      tracing::trace!(request = %state.describe(), "Ignoring result of a superseded execution");
      return;
    }

    match outcome {
      WorkerOutcome::Crashed(message) => {
        if state.attempts < MAX_EXECUTION_ATTEMPTS {
          tracing::warn!(request = %state.describe(), "Worker crashed, retrying: {message}");
          self.execute(node, true);
        } else {
          let error = RequestError::WorkerCrash {
            kind: state.kind.clone(),
            params: state.params.clone(),
            attempts: state.attempts,
            message,
          };
          self.fail(node, error);
        }
      }
      WorkerOutcome::Completed(_) if state.stale => {
        tracing::debug!(request = %state.describe(), "Discarding result of a stale request");
        self.execute(node, false);
      }
      WorkerOutcome::Completed(Err(error)) => {
        let error = self.classify_failure(node, &error);
        self.fail(node, error);
      }
      WorkerOutcome::Completed(Ok(output)) => self.complete(node, output, &reads),
    }
  }

  /// A handler error caused by a failed sub-request blocks the request instead of failing it
  fn classify_failure(&self, node: NodeIndex, error: &anyhow::Error) -> RequestError {
    let (kind, params, search_path) = self
      .graph
      .request(node)
      .map(|state| {
        (
          state.kind.clone(),
          state.params.clone(),
          state.search_path.clone(),
        )
      })
      .unwrap_or_default();

    match error.downcast_ref::<RequestError>() {
      Some(error @ RequestError::CycleDetected { .. }) => error.clone(),
      Some(dependency) => RequestError::Blocked {
        kind,
        params,
        dependency: dependency.describe(),
      },
      None => RequestError::HandlerFailure {
        kind,
        params,
        search_path,
        message: CairnError::from(error).to_string(),
      },
    }
  }

  /// Publish a successful result: record its inputs, persist it and answer everyone waiting
  fn complete(&mut self, node: NodeIndex, output: ResultAndInvalidations, reads: &FileReads) {
    let ResultAndInvalidations {
      result,
      invalidations,
      mut flags,
    } = output;

    let Some(state) = self.graph.request(node) else {
      return;
    };

    let kind = state.kind.clone();
    let params = state.params.clone();
    let request_id = state.id;

    if self.inputs_changed_since(state.started_generation, &invalidations) {
      tracing::debug!(request = %state.describe(), "Inputs changed while running, rescheduling");
      self.execute(node, false);
      return;
    }

    let mut inputs = Vec::with_capacity(invalidations.len());
    for invalidation in &invalidations {
      match self.snapshot(&kind, invalidation, reads) {
        Ok(input) => inputs.push(input),
        Err(error) => {
          self.fail(node, error);
          return;
        }
      }
    }

    for child in self.graph.subrequests(node) {
      if let Some(child) = self.graph.request(child) {
        inputs.push(InputSnapshot::SubRequest {
          request_id: format_request_id(child.id),
          kind: child.kind.clone(),
          result_hash: child.result_hash.clone(),
        });
      }
    }

    if flags.reload {
      flags.rehydrate = false;
    }

    let entry = match CacheEntry::new(
      &kind,
      &params,
      request_id,
      &result,
      inputs.clone(),
      flags,
    ) {
      Ok(entry) => Some(entry),
      Err(error) => {
        tracing::warn!(%kind, "Result cannot be cached: {error}");
        None
      }
    };

    self.graph.record_edges(node, &inputs);

    let result = Arc::new(result);
    if let Some(state) = self.graph.request_mut(node) {
      state.status = RequestStatus::Valid;
      state.result = Some(result.clone());
      state.result_hash = entry.as_ref().map(|entry| entry.result_hash.clone());
      state.cache_key = entry.as_ref().map(|entry| entry.key.clone());
      state.flags = flags;
      state.direct_invalid = false;
      state.stale = false;
      state.attempts = 0;
    }

    if let Some(entry) = &entry {
      if let Err(error) = self.cache_store.put(entry) {
        tracing::warn!(%kind, "Failed to write cache entry: {error:#}");
      }
    }

    self.release_shared_results(node);
    self.resolve_waiters(node, Ok(result));
  }

  fn fail(&mut self, node: NodeIndex, error: RequestError) {
    if let Some(state) = self.graph.request_mut(node) {
      tracing::debug!(request = %state.describe(), "Request failed: {error}");
      state.status = RequestStatus::Failed(RequestFailure {
        error: error.clone(),
        build: self.build,
      });
      state.stale = false;
      state.attempts = 0;
    }

    self.release_shared_results(node);
    self.resolve_waiters(node, Err(error));
  }

  fn release_shared_results(&mut self, owner: NodeIndex) {
    self.shared_results.retain(|(parent, _), _| *parent != owner);
  }

  fn resolve_waiters(&mut self, node: NodeIndex, response: RequestResponse) {
    for waiter in self.waiters.remove(&node).unwrap_or_default() {
      self.answer(node, waiter, response.clone());
    }
  }

  fn answer(&mut self, node: NodeIndex, waiter: Waiter, response: RequestResponse) {
    match waiter {
      Waiter::Root(index) => {
        if let Some(slot) = self.root_results.get_mut(index) {
          *slot = Some(response);
        }
      }
      Waiter::Request {
        parent,
        response_tx,
      } => {
        // Every load of the same sub-request within one execution sees the same value
        let response = response.map(|result| {
          self
            .shared_results
            .entry((parent, node))
            .or_insert(result)
            .clone()
        });
        let _ = response_tx.send(response);
      }
      Waiter::Parent(parent) => self.on_prefetched(parent, node, &response),
    }
  }

  /// Whether a change reported after `generation` touches any of `invalidations`
  fn inputs_changed_since(&self, generation: u64, invalidations: &[Invalidation]) -> bool {
    invalidations.iter().any(|invalidation| match invalidation {
      Invalidation::FileChange(path) => self
        .changed_files
        .get(path)
        .is_some_and(|changed| *changed > generation),
      Invalidation::Glob(pattern) => self.changed_files.iter().any(|(path, changed)| {
        *changed > generation && glob_match(pattern, &path.to_string_lossy())
      }),
      Invalidation::Env(name) => self
        .changed_env
        .get(name)
        .is_some_and(|changed| *changed > generation),
      Invalidation::DevDependency { .. } => false,
    })
  }

  /// Capture the state of an input. Files keep the hash of what the execution read.
  fn snapshot(
    &self,
    kind: &str,
    invalidation: &Invalidation,
    reads: &FileReads,
  ) -> Result<InputSnapshot, RequestError> {
    let snapshot = match invalidation {
      Invalidation::FileChange(path) if reads.contains_key(path) => InputSnapshot::File {
        path: path.clone(),
        content_hash: reads.get(path).cloned().flatten(),
      },
      Invalidation::FileChange(path) => match self.file_system.read(path) {
        Ok(contents) => InputSnapshot::File {
          path: path.clone(),
          content_hash: Some(content_hash(&contents)),
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => InputSnapshot::File {
          path: path.clone(),
          content_hash: None,
        },
        Err(error) => {
          return Err(RequestError::InputResolutionFailure {
            kind: kind.to_string(),
            path: path.clone(),
            message: error.to_string(),
          })
        }
      },
      Invalidation::Glob(pattern) => InputSnapshot::Glob {
        pattern: pattern.clone(),
      },
      Invalidation::Env(name) => InputSnapshot::Env {
        name: name.clone(),
        value: self.env.read().get(name).cloned(),
      },
      Invalidation::DevDependency { name, constraint } => {
        let version = self.resolve_dev_dependency_version(name);
        check_constraint(name, constraint.as_deref(), version.as_deref());

        InputSnapshot::DevDependency {
          name: name.clone(),
          constraint: constraint.clone(),
          version,
        }
      }
    };

    Ok(snapshot)
  }

  pub(super) fn resolve_dev_dependency_version(&self, name: &str) -> Option<String> {
    match self
      .package_manager
      .resolve_dev_dependency(name, &self.project_root)
    {
      Ok(dev_dep) => dev_dep.version,
      Err(error) => {
        tracing::debug!(%name, "Dev dependency is not installed: {error}");
        None
      }
    }
  }

  pub(super) fn current_file_hash(&self, path: &Path) -> Option<String> {
    self
      .file_system
      .read(path)
      .ok()
      .map(|contents| content_hash(&contents))
  }

  /// Consult the cache store the first time a request is seen in this process.
  ///
  /// Every recorded input is checked against its current state and sub-requests are loaded
  /// recursively. The request becomes valid only when all of them are unchanged.
  fn load_from_cache(&mut self, node: NodeIndex) {
    let Some(state) = self.graph.request_mut(node) else {
      return;
    };

    if state.loaded {
      return;
    }
    state.loaded = true;

    if state.status != RequestStatus::Pending {
      return;
    }

    let request_id = state.id;
    let kind = state.kind.clone();

    let Some(entry) = self.cache_store.get_latest(request_id) else {
      return;
    };

    if entry.kind != kind {
      tracing::warn!(%kind, cached = %entry.kind, "Ignoring cache entry of another request kind");
      return;
    }

    let result = match entry.decode_result() {
      Ok(result) => result,
      Err(error) => {
        tracing::warn!(%kind, "Ignoring undecodable cached result: {error}");
        return;
      }
    };

    let mut inputs_valid = self.inputs_unchanged(&entry.inputs);
    self.graph.record_edges(node, &entry.inputs);

    let mut children_valid = true;
    for input in &entry.inputs {
      let InputSnapshot::SubRequest {
        request_id,
        kind,
        result_hash,
      } = input
      else {
        continue;
      };

      let Some(child_id) = parse_request_id(request_id) else {
        children_valid = false;
        continue;
      };

      let child = self.graph.get_or_create_by_id(child_id, kind);
      self.load_from_cache(child);

      if let Err(error) = self.graph.add_subrequest_edge(node, child) {
        tracing::warn!("Ignoring cached sub-request: {error}");
        children_valid = false;
        continue;
      }

      children_valid &= self
        .graph
        .request(child)
        .is_some_and(|child| child.is_valid() && child.result_hash == *result_hash);
    }

    let Some(state) = self.graph.request_mut(node) else {
      return;
    };

    if entry.flags.invalidate_on_startup {
      tracing::debug!(request = %state.describe(), "Invalidated on startup");
      inputs_valid = false;
    }

    if entry.flags.reload {
      inputs_valid = false;
    }

    state.result = Some(Arc::new(result));
    state.result_hash = Some(entry.result_hash);
    state.cache_key = Some(entry.key);
    state.flags = entry.flags;
    state.direct_invalid = !inputs_valid;
    state.status = if inputs_valid && children_valid {
      RequestStatus::Valid
    } else {
      RequestStatus::Invalid
    };

    tracing::trace!(request = %state.describe(), status = ?state.status, "Loaded from cache");
  }

  /// Whether every non sub-request input is still in its recorded state.
  ///
  /// Glob inputs cannot be checked without knowing which files were created, they rely on the
  /// watcher replaying events since the last build.
  fn inputs_unchanged(&self, inputs: &[InputSnapshot]) -> bool {
    inputs.iter().all(|input| match input {
      InputSnapshot::File { path, content_hash } => self.current_file_hash(path) == *content_hash,
      InputSnapshot::Env { name, value } => self.env.read().get(name) == value.as_ref(),
      InputSnapshot::DevDependency { name, version, .. } => {
        self.resolve_dev_dependency_version(name) == *version
      }
      InputSnapshot::Glob { .. } | InputSnapshot::SubRequest { .. } => true,
    })
  }
}

/// Warn about installed versions outside of the declared range.
///
/// Unparsable constraints are ignored, the installed version is still tracked exactly.
fn check_constraint(name: &str, constraint: Option<&str>, version: Option<&str>) {
  let Some(constraint) = constraint else {
    return;
  };

  let range = match Range::parse(constraint) {
    Ok(range) => range,
    Err(error) => {
      tracing::warn!(%name, %constraint, "Ignoring unparsable version constraint: {error}");
      return;
    }
  };

  if let Some(version) = version.and_then(|version| Version::parse(version).ok()) {
    if !range.satisfies(&version) {
      tracing::warn!(%name, %constraint, %version, "Installed version does not satisfy constraint");
    }
  }
}
