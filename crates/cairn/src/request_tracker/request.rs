use std::fmt::Debug;
use std::hash::Hash;
use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use cairn_core::config_loader::ConfigLoaderRef;
use cairn_core::hash::IdentifierHasher;
use cairn_core::types::EnvMap;
use cairn_core::types::Invalidation;
use cairn_filesystem::FileSystemRef;
use dyn_hash::DynHash;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::requests::RequestResult;
use crate::CairnOptions;
use crate::RequestError;

use super::FileReads;
use super::WorkerOutcome;
use super::WorkerSlot;

pub type RunRequestError = anyhow::Error;
pub type RequestId = u64;

pub type RequestResponse = Result<Arc<RequestResult>, RequestError>;

/// Internally, [`super::RequestTracker`] ticks a queue of work for the build that is running.
///
/// This enum represents messages that request handlers and workers send to the scheduler loop.
#[derive(Debug)]
pub(crate) enum RequestQueueMessage {
  RunRequest {
    request: Arc<dyn Request>,
    parent_request_id: Option<RequestId>,
    response_tx: oneshot::Sender<RequestResponse>,
  },
  RequestResult {
    request_id: RequestId,
    execution: u64,
    outcome: WorkerOutcome,
    reads: FileReads,
  },
}

/// This is the API for requests to call back onto the `RequestTracker`.
///
/// Requests never touch the request graph. Every sub-request goes through the scheduler as a
/// message, which records the dependency and answers once the sub-request has a result.
#[derive(Clone)]
pub struct RunRequestContext {
  request_id: RequestId,
  config_loader: ConfigLoaderRef,
  env: Arc<RwLock<EnvMap>>,
  file_system: FileSystemRef,
  pub options: Arc<CairnOptions>,
  pub project_root: PathBuf,
  queue_tx: UnboundedSender<RequestQueueMessage>,
  slot: Arc<WorkerSlot>,
}

impl RunRequestContext {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    request_id: RequestId,
    config_loader: ConfigLoaderRef,
    env: Arc<RwLock<EnvMap>>,
    file_system: FileSystemRef,
    options: Arc<CairnOptions>,
    project_root: PathBuf,
    queue_tx: UnboundedSender<RequestQueueMessage>,
    slot: Arc<WorkerSlot>,
  ) -> Self {
    Self {
      request_id,
      config_loader,
      env,
      file_system,
      options,
      project_root,
      queue_tx,
      slot,
    }
  }

  /// Run a child request to the current request
  pub async fn run_request(&self, request: impl Request) -> anyhow::Result<Arc<RequestResult>> {
    let mut results = self.run_requests(vec![Arc::new(request)]).await?;
    results
      .pop()
      .ok_or_else(|| anyhow!("Sub-request produced no result"))
  }

  /// Run several child requests concurrently, returning their results in order.
  ///
  /// The worker slot of the current request is given up while waiting, so that sub-requests can
  /// run even when every slot is taken by a parent.
  pub async fn run_requests(
    &self,
    requests: Vec<Arc<dyn Request>>,
  ) -> anyhow::Result<Vec<Arc<RequestResult>>> {
    let mut receivers = Vec::with_capacity(requests.len());

    for request in requests {
      let (response_tx, response_rx) = oneshot::channel();
      self
        .queue_tx
        .send(RequestQueueMessage::RunRequest {
          request,
          parent_request_id: Some(self.request_id),
          response_tx,
        })
        .map_err(|_| anyhow!("The request tracker is no longer running"))?;
      receivers.push(response_rx);
    }

    self.slot.suspend().await;

    let mut responses = Vec::with_capacity(receivers.len());
    for response_rx in receivers {
      responses.push(response_rx.await);
    }

    self.slot.resume().await;

    let mut results = Vec::with_capacity(responses.len());
    for response in responses {
      match response {
        Ok(Ok(result)) => results.push(result),
        Ok(Err(error)) => return Err(anyhow::Error::new(error)),
        Err(_) => return Err(anyhow!("The request tracker dropped a sub-request")),
      }
    }

    Ok(results)
  }

  pub fn file_system(&self) -> &FileSystemRef {
    &self.file_system
  }

  pub fn config(&self) -> &ConfigLoaderRef {
    &self.config_loader
  }

  /// The current value of an environment variable. Report [`Invalidation::Env`] when using it.
  pub fn env_var(&self, name: &str) -> Option<String> {
    self.env.read().get(name).cloned()
  }

  pub fn request_id(&self) -> RequestId {
    self.request_id
  }
}

/// A cacheable unit of work, identified by its kind and its hashed parameters
#[async_trait]
pub trait Request: DynHash + Send + Sync + Debug + 'static {
  /// Stable tag naming what the request does. Part of the identity and the cache key.
  fn kind(&self) -> &str;

  /// Human readable parameters, used in error reports
  fn params(&self) -> String {
    format!("{self:?}")
  }

  /// Where the request looked for its inputs, used in error reports
  fn search_path(&self) -> Option<PathBuf> {
    None
  }

  fn id(&self) -> RequestId {
    let mut hasher = IdentifierHasher::default();
    self.kind().hash(&mut hasher);
    self.dyn_hash(&mut hasher);
    hasher.finish()
  }

  async fn run(
    &self,
    request_context: RunRequestContext,
  ) -> Result<ResultAndInvalidations, RunRequestError>;
}

dyn_hash::hash_trait_object!(Request);

/// How the tracker treats a cached result in later builds
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFlags {
  /// Re-decode the result from the cache store the first time it is used in each build
  pub rehydrate: bool,
  /// Recompute on every build
  pub reload: bool,
  /// Recompute on the first use in every process
  pub invalidate_on_startup: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultAndInvalidations {
  pub result: RequestResult,
  pub invalidations: Vec<Invalidation>,
  pub flags: RequestFlags,
}

impl ResultAndInvalidations {
  pub fn new(result: RequestResult, invalidations: Vec<Invalidation>) -> Self {
    Self {
      result,
      invalidations,
      flags: RequestFlags::default(),
    }
  }

  pub fn with_flags(mut self, flags: RequestFlags) -> Self {
    self.flags = flags;
    self
  }
}
