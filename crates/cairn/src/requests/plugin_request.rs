use std::fmt::Debug;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::hash::canonical_json;
use serde_json::Value;

use crate::request_tracker::Request;
use crate::request_tracker::ResultAndInvalidations;
use crate::request_tracker::RunRequestContext;
use crate::request_tracker::RunRequestError;

/// An opaque transformation step supplied by a plugin.
///
/// Handlers must report every input they read in the returned invalidations. Results are
/// usually [`super::RequestResult::Plugin`].
#[async_trait]
pub trait PluginHandler: Debug + Send + Sync {
  async fn run(
    &self,
    params: &Value,
    request_context: RunRequestContext,
  ) -> Result<ResultAndInvalidations, RunRequestError>;
}

/// A request whose work is done by a [`PluginHandler`].
///
/// Identified by its kind and the canonical form of its parameters, so parameters that only
/// differ in key order are the same request.
#[derive(Debug)]
pub struct PluginRequest {
  pub kind: String,
  pub params: Value,
  pub handler: Arc<dyn PluginHandler>,
}

impl Hash for PluginRequest {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.kind.hash(state);
    canonical_json(&self.params).hash(state);
  }
}

#[async_trait]
impl Request for PluginRequest {
  fn kind(&self) -> &str {
    &self.kind
  }

  fn params(&self) -> String {
    canonical_json(&self.params)
  }

  #[tracing::instrument(level = "debug", skip_all, fields(kind = %self.kind))]
  async fn run(
    &self,
    request_context: RunRequestContext,
  ) -> Result<ResultAndInvalidations, RunRequestError> {
    self.handler.run(&self.params, request_context).await
  }
}
