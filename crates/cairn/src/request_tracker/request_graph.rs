use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::cache_store::InputSnapshot;
use crate::requests::RequestResult;
use crate::RequestError;

use super::Request;
use super::RequestFlags;
use super::RequestId;

#[derive(Clone, Debug, PartialEq)]
pub struct RequestFailure {
  pub error: RequestError,
  /// The build the failure happened in. Failures from earlier builds are retried.
  pub build: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestStatus {
  /// Not computed in this process, or waiting for its sub-requests before running
  Pending,
  Running,
  Valid,
  Invalid,
  Failed(RequestFailure),
}

/// Everything the tracker knows about one request
#[derive(Debug)]
pub struct RequestState {
  pub id: RequestId,
  pub kind: String,
  pub params: String,
  pub search_path: Option<PathBuf>,
  /// Missing for requests only known from a cached entry of a parent
  pub request: Option<Arc<dyn Request>>,
  pub status: RequestStatus,
  pub result: Option<Arc<RequestResult>>,
  pub result_hash: Option<String>,
  pub cache_key: Option<String>,
  pub flags: RequestFlags,
  /// One of the request's own inputs changed, as opposed to only a sub-request
  pub direct_invalid: bool,
  /// Inputs changed while the request was running. The result will be discarded.
  pub stale: bool,
  pub started_generation: u64,
  pub execution: u64,
  pub attempts: u32,
  /// The cache store has been consulted for this request in this process
  pub loaded: bool,
}

impl RequestState {
  pub fn new(id: RequestId, kind: &str) -> Self {
    Self {
      id,
      kind: kind.to_string(),
      params: String::new(),
      search_path: None,
      request: None,
      status: RequestStatus::Pending,
      result: None,
      result_hash: None,
      cache_key: None,
      flags: RequestFlags::default(),
      direct_invalid: false,
      stale: false,
      started_generation: 0,
      execution: 0,
      attempts: 0,
      loaded: false,
    }
  }

  pub fn describe(&self) -> String {
    format!("{}({})", self.kind, self.params)
  }

  pub fn is_valid(&self) -> bool {
    self.status == RequestStatus::Valid
  }
}

#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum RequestNode {
  Root,
  Request(RequestState),
  FileInvalidation(PathBuf),
  GlobInvalidation(String),
  EnvInvalidation(String),
  DevDependencyInvalidation(String),
}

/// Edges from a request to what it consulted. Input edges carry the state the input was in when
/// the request was computed.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestEdgeType {
  SubRequest,
  FileChangeInvalidation { content_hash: Option<String> },
  GlobInvalidation,
  EnvInvalidation { value: Option<String> },
  DevDependencyInvalidation {
    constraint: Option<String>,
    version: Option<String>,
  },
}

/// Requests and their inputs. Only the scheduler loop mutates it.
#[derive(Debug)]
pub struct RequestGraph {
  graph: StableDiGraph<RequestNode, RequestEdgeType>,
  root: NodeIndex,
  request_index: HashMap<RequestId, NodeIndex>,
  file_index: HashMap<PathBuf, NodeIndex>,
  glob_index: HashMap<String, NodeIndex>,
  env_index: HashMap<String, NodeIndex>,
  dev_dependency_index: HashMap<String, NodeIndex>,
}

impl Default for RequestGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl RequestGraph {
  pub fn new() -> Self {
    let mut graph = StableDiGraph::new();
    let root = graph.add_node(RequestNode::Root);

    Self {
      graph,
      root,
      request_index: HashMap::new(),
      file_index: HashMap::new(),
      glob_index: HashMap::new(),
      env_index: HashMap::new(),
      dev_dependency_index: HashMap::new(),
    }
  }

  /// Find the node of a request, adding it when it is seen for the first time
  pub fn get_or_create(&mut self, request: Arc<dyn Request>) -> NodeIndex {
    let node = self.get_or_create_by_id(request.id(), request.kind());

    if let Some(state) = self.request_mut(node) {
      if state.request.is_none() {
        state.params = request.params();
        state.search_path = request.search_path();
        state.request = Some(request);
      }
    }

    node
  }

  /// Find or add a request known only by its identity, as recorded in a cache entry
  pub fn get_or_create_by_id(&mut self, id: RequestId, kind: &str) -> NodeIndex {
    *self
      .request_index
      .entry(id)
      .or_insert_with(|| self.graph.add_node(RequestNode::Request(RequestState::new(id, kind))))
  }

  pub fn node_for(&self, id: RequestId) -> Option<NodeIndex> {
    self.request_index.get(&id).copied()
  }

  pub fn request(&self, node: NodeIndex) -> Option<&RequestState> {
    match self.graph.node_weight(node) {
      Some(RequestNode::Request(state)) => Some(state),
      _ => None,
    }
  }

  pub fn request_mut(&mut self, node: NodeIndex) -> Option<&mut RequestState> {
    match self.graph.node_weight_mut(node) {
      Some(RequestNode::Request(state)) => Some(state),
      _ => None,
    }
  }

  pub fn is_valid(&self, node: NodeIndex) -> bool {
    self.request(node).is_some_and(RequestState::is_valid)
  }

  /// Every request node
  pub fn requests(&self) -> impl Iterator<Item = (NodeIndex, &RequestState)> + '_ {
    self.request_index.values().filter_map(|node| {
      self.request(*node).map(|state| (*node, state))
    })
  }

  pub fn add_root_edge(&mut self, node: NodeIndex) {
    if self.graph.find_edge(self.root, node).is_none() {
      self.graph.add_edge(self.root, node, RequestEdgeType::SubRequest);
    }
  }

  /// Record that `parent` uses the result of `child`.
  ///
  /// Fails without adding the edge when `child` already depends on `parent`.
  pub fn add_subrequest_edge(
    &mut self,
    parent: NodeIndex,
    child: NodeIndex,
  ) -> Result<(), RequestError> {
    if self.graph.find_edge(parent, child).is_some() {
      return Ok(());
    }

    if let Some(path) = self.subrequest_path(child, parent) {
      let mut chain = vec![self.describe(parent)];
      chain.extend(path.into_iter().map(|node| self.describe(node)));
      return Err(RequestError::CycleDetected { chain });
    }

    self
      .graph
      .add_edge(parent, child, RequestEdgeType::SubRequest);
    Ok(())
  }

  /// Breadth first search over sub-request edges, returning the nodes from `from` to `to`
  fn subrequest_path(&self, from: NodeIndex, to: NodeIndex) -> Option<Vec<NodeIndex>> {
    let mut previous = HashMap::from([(from, from)]);
    let mut queue = VecDeque::from([from]);

    while let Some(node) = queue.pop_front() {
      if node == to {
        let mut path = vec![node];
        let mut current = node;
        while current != from {
          current = previous[&current];
          path.push(current);
        }
        path.reverse();
        return Some(path);
      }

      for child in self.subrequests(node) {
        if let std::collections::hash_map::Entry::Vacant(entry) = previous.entry(child) {
          entry.insert(node);
          queue.push_back(child);
        }
      }
    }

    None
  }

  fn describe(&self, node: NodeIndex) -> String {
    self
      .request(node)
      .map(RequestState::describe)
      .unwrap_or_else(|| format!("{node:?}"))
  }

  /// Remove every edge leaving `node`, before it is recomputed
  pub fn clear_edges(&mut self, node: NodeIndex) {
    let edges = self
      .graph
      .edges_directed(node, Direction::Outgoing)
      .map(|edge| edge.id())
      .collect::<Vec<_>>();

    for edge in edges {
      self.graph.remove_edge(edge);
    }
  }

  /// Add an input edge for each snapshot. Sub-request snapshots are skipped, those edges are
  /// added as sub-requests are made.
  pub fn record_edges(&mut self, node: NodeIndex, inputs: &[InputSnapshot]) {
    for input in inputs {
      let (target, weight) = match input {
        InputSnapshot::File { path, content_hash } => (
          Self::index_node(&mut self.graph, &mut self.file_index, path.clone(), || {
            RequestNode::FileInvalidation(path.clone())
          }),
          RequestEdgeType::FileChangeInvalidation {
            content_hash: content_hash.clone(),
          },
        ),
        InputSnapshot::Glob { pattern } => (
          Self::index_node(&mut self.graph, &mut self.glob_index, pattern.clone(), || {
            RequestNode::GlobInvalidation(pattern.clone())
          }),
          RequestEdgeType::GlobInvalidation,
        ),
        InputSnapshot::Env { name, value } => (
          Self::index_node(&mut self.graph, &mut self.env_index, name.clone(), || {
            RequestNode::EnvInvalidation(name.clone())
          }),
          RequestEdgeType::EnvInvalidation {
            value: value.clone(),
          },
        ),
        InputSnapshot::DevDependency {
          name,
          constraint,
          version,
        } => (
          Self::index_node(
            &mut self.graph,
            &mut self.dev_dependency_index,
            name.clone(),
            || RequestNode::DevDependencyInvalidation(name.clone()),
          ),
          RequestEdgeType::DevDependencyInvalidation {
            constraint: constraint.clone(),
            version: version.clone(),
          },
        ),
        InputSnapshot::SubRequest { .. } => continue,
      };

      self.graph.add_edge(node, target, weight);
    }
  }

  fn index_node<K: std::hash::Hash + Eq>(
    graph: &mut StableDiGraph<RequestNode, RequestEdgeType>,
    index: &mut HashMap<K, NodeIndex>,
    key: K,
    create: impl FnOnce() -> RequestNode,
  ) -> NodeIndex {
    *index.entry(key).or_insert_with(|| graph.add_node(create()))
  }

  /// Requests that use the result of `node`
  pub fn dependents(&self, node: NodeIndex) -> Vec<NodeIndex> {
    self
      .graph
      .edges_directed(node, Direction::Incoming)
      .filter(|edge| *edge.weight() == RequestEdgeType::SubRequest && edge.source() != self.root)
      .map(|edge| edge.source())
      .collect()
  }

  /// Sub-requests `node` recorded during its last computation
  pub fn subrequests(&self, node: NodeIndex) -> Vec<NodeIndex> {
    self
      .graph
      .edges_directed(node, Direction::Outgoing)
      .filter(|edge| *edge.weight() == RequestEdgeType::SubRequest)
      .map(|edge| edge.target())
      .collect()
  }

  /// Requests with an input edge into `input`, along with the edge
  pub fn input_dependents(&self, input: NodeIndex) -> Vec<(NodeIndex, RequestEdgeType)> {
    self
      .graph
      .edges_directed(input, Direction::Incoming)
      .map(|edge| (edge.source(), edge.weight().clone()))
      .collect()
  }

  pub fn file_node(&self, path: &Path) -> Option<NodeIndex> {
    self.file_index.get(path).copied()
  }

  pub fn env_node(&self, name: &str) -> Option<NodeIndex> {
    self.env_index.get(name).copied()
  }

  pub fn glob_nodes(&self) -> impl Iterator<Item = (&String, NodeIndex)> + '_ {
    self.glob_index.iter().map(|(pattern, node)| (pattern, *node))
  }

  pub fn dev_dependency_nodes(&self) -> impl Iterator<Item = (&String, NodeIndex)> + '_ {
    self
      .dev_dependency_index
      .iter()
      .map(|(name, node)| (name, *node))
  }

  /// Mark a request invalid. Running requests are flagged stale instead.
  ///
  /// Returns whether the request was affected.
  pub fn invalidate(&mut self, node: NodeIndex, direct: bool) -> bool {
    let Some(state) = self.request_mut(node) else {
      return false;
    };

    match state.status {
      RequestStatus::Running => {
        state.stale = true;
        state.direct_invalid |= direct;
        true
      }
      RequestStatus::Valid => {
        state.status = RequestStatus::Invalid;
        state.direct_invalid |= direct;
        true
      }
      RequestStatus::Invalid | RequestStatus::Pending => {
        state.direct_invalid |= direct;
        false
      }
      RequestStatus::Failed(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use async_trait::async_trait;
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::request_tracker::ResultAndInvalidations;
  use crate::request_tracker::RunRequestContext;
  use crate::request_tracker::RunRequestError;

  #[derive(Debug, Hash)]
  struct NamedRequest(&'static str);

  #[async_trait]
  impl Request for NamedRequest {
    fn kind(&self) -> &str {
      "named"
    }

    fn params(&self) -> String {
      self.0.to_string()
    }

    async fn run(
      &self,
      _request_context: RunRequestContext,
    ) -> Result<ResultAndInvalidations, RunRequestError> {
      Ok(ResultAndInvalidations::new(
        RequestResult::TestSub(self.0.to_string()),
        vec![],
      ))
    }
  }

  fn node(graph: &mut RequestGraph, name: &'static str) -> NodeIndex {
    graph.get_or_create(Arc::new(NamedRequest(name)))
  }

  #[test]
  fn creates_one_node_per_request_identity() {
    let mut graph = RequestGraph::new();

    let a = node(&mut graph, "a");
    let b = node(&mut graph, "b");

    assert_eq!(node(&mut graph, "a"), a);
    assert_ne!(a, b);
    assert_eq!(graph.request(a).map(RequestState::describe), Some(String::from("named(a)")));
  }

  #[test]
  fn rejects_edges_that_close_a_cycle() {
    let mut graph = RequestGraph::new();
    let a = node(&mut graph, "a");
    let b = node(&mut graph, "b");
    let c = node(&mut graph, "c");

    graph.add_subrequest_edge(a, b).unwrap();
    graph.add_subrequest_edge(b, c).unwrap();

    assert_eq!(
      graph.add_subrequest_edge(c, a),
      Err(RequestError::CycleDetected {
        chain: vec![
          String::from("named(c)"),
          String::from("named(a)"),
          String::from("named(b)"),
          String::from("named(c)"),
        ]
      })
    );
    assert_eq!(graph.subrequests(c), vec![]);
  }

  #[test]
  fn rejects_self_edges() {
    let mut graph = RequestGraph::new();
    let a = node(&mut graph, "a");

    assert!(matches!(
      graph.add_subrequest_edge(a, a),
      Err(RequestError::CycleDetected { .. })
    ));
  }

  #[test]
  fn tracks_dependents_and_inputs() {
    let mut graph = RequestGraph::new();
    let a = node(&mut graph, "a");
    let b = node(&mut graph, "b");
    graph.add_root_edge(a);
    graph.add_subrequest_edge(a, b).unwrap();
    graph.record_edges(
      b,
      &[InputSnapshot::File {
        path: PathBuf::from("/b.js"),
        content_hash: Some(String::from("hash")),
      }],
    );

    let file = graph.file_node(Path::new("/b.js")).unwrap();

    assert_eq!(graph.dependents(b), vec![a]);
    assert_eq!(graph.dependents(a), vec![]);
    assert_eq!(
      graph.input_dependents(file),
      vec![(
        b,
        RequestEdgeType::FileChangeInvalidation {
          content_hash: Some(String::from("hash"))
        }
      )]
    );

    graph.clear_edges(b);
    assert_eq!(graph.input_dependents(file), vec![]);
  }

  #[test]
  fn invalidating_running_requests_marks_them_stale() {
    let mut graph = RequestGraph::new();
    let a = node(&mut graph, "a");
    let b = node(&mut graph, "b");
    graph.request_mut(a).unwrap().status = RequestStatus::Running;
    graph.request_mut(b).unwrap().status = RequestStatus::Valid;

    assert!(graph.invalidate(a, true));
    assert!(graph.invalidate(b, false));
    assert!(!graph.invalidate(b, false));

    let a = graph.request(a).unwrap();
    assert_eq!(a.status, RequestStatus::Running);
    assert!(a.stale && a.direct_invalid);

    let b = graph.request(b).unwrap();
    assert_eq!(b.status, RequestStatus::Invalid);
    assert!(!b.direct_invalid);
  }
}
