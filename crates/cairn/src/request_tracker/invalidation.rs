use std::collections::HashSet;
use std::collections::VecDeque;
use std::path::Path;

use glob_match::glob_match;
use petgraph::graph::NodeIndex;

use crate::WatchEvent;
use crate::WatchEvents;

use super::RequestEdgeType;
use super::RequestTracker;

impl RequestTracker {
  /// Invalidate every request that consumed one of the changed inputs, and transitively the
  /// requests that depend on them.
  ///
  /// Requests that are running are marked stale and rescheduled once they finish. Returns whether
  /// any request was affected.
  #[tracing::instrument(level = "debug", skip_all, fields(events = events.len()))]
  pub fn respond_to_fs_events(&mut self, events: WatchEvents) -> bool {
    self.generation += 1;
    let generation = self.generation;

    let mut invalid = Vec::new();
    for event in events {
      match event {
        WatchEvent::Create(path) | WatchEvent::Delete(path) => {
          invalid.extend(self.file_invalidations(&path));
          invalid.extend(self.glob_invalidations(&path));
          self.changed_files.insert(path, generation);
        }
        WatchEvent::Update(path) => {
          invalid.extend(self.file_invalidations(&path));
          self.changed_files.insert(path, generation);
        }
        WatchEvent::Env { name, value } => {
          {
            let mut env = self.env.write();
            match &value {
              Some(value) => env.insert(name.clone(), value.clone()),
              None => env.remove(&name),
            };
          }

          invalid.extend(self.env_invalidations(&name, value.as_deref()));
          self.changed_env.insert(name, generation);
        }
        WatchEvent::InvalidateKind(kind) => {
          invalid.extend(
            self
              .graph
              .requests()
              .filter(|(_, state)| state.kind == kind)
              .map(|(node, _)| node),
          );
        }
      }
    }

    self.propagate_invalidations(invalid)
  }

  /// Invalidate requests whose installed dev dependencies changed version
  pub(super) fn check_dev_dependencies(&mut self) -> bool {
    let packages = self
      .graph
      .dev_dependency_nodes()
      .map(|(name, node)| (name.clone(), node))
      .collect::<Vec<_>>();

    let mut invalid = Vec::new();
    for (name, node) in packages {
      let installed = self.resolve_dev_dependency_version(&name);

      for (dependent, edge) in self.graph.input_dependents(node) {
        if let RequestEdgeType::DevDependencyInvalidation { version, .. } = edge {
          if version != installed {
            tracing::debug!(%name, ?version, ?installed, "Dev dependency changed");
            invalid.push(dependent);
          }
        }
      }
    }

    self.propagate_invalidations(invalid)
  }

  fn file_invalidations(&self, path: &Path) -> Vec<NodeIndex> {
    let Some(node) = self.graph.file_node(path) else {
      return Vec::new();
    };

    let current = self.current_file_hash(path);

    self
      .graph
      .input_dependents(node)
      .into_iter()
      .filter(|(_, edge)| match edge {
        RequestEdgeType::FileChangeInvalidation { content_hash } => *content_hash != current,
        _ => true,
      })
      .map(|(dependent, _)| dependent)
      .collect()
  }

  fn glob_invalidations(&self, path: &Path) -> Vec<NodeIndex> {
    let path = path.to_string_lossy();

    self
      .graph
      .glob_nodes()
      .filter(|(pattern, _)| glob_match(pattern, &path))
      .flat_map(|(_, node)| self.graph.input_dependents(node))
      .map(|(dependent, _)| dependent)
      .collect()
  }

  fn env_invalidations(&self, name: &str, value: Option<&str>) -> Vec<NodeIndex> {
    let Some(node) = self.graph.env_node(name) else {
      return Vec::new();
    };

    self
      .graph
      .input_dependents(node)
      .into_iter()
      .filter(|(_, edge)| match edge {
        RequestEdgeType::EnvInvalidation { value: recorded } => recorded.as_deref() != value,
        _ => true,
      })
      .map(|(dependent, _)| dependent)
      .collect()
  }

  /// Mark `direct` invalid, then walk up the sub-request edges
  pub(super) fn propagate_invalidations(&mut self, direct: Vec<NodeIndex>) -> bool {
    let mut changed = false;
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();

    for node in direct {
      changed |= self.graph.invalidate(node, true);
      if visited.insert(node) {
        queue.push_back(node);
      }
    }

    while let Some(node) = queue.pop_front() {
      for dependent in self.graph.dependents(node) {
        changed |= self.graph.invalidate(dependent, false);
        if visited.insert(dependent) {
          queue.push_back(dependent);
        }
      }
    }

    if changed {
      tracing::debug!(requests = visited.len(), "Invalidated requests");
    }

    changed
  }
}
