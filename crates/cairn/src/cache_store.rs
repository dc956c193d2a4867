//! Content addressed persistence of request results.
//!
//! Entries live under `entry/<key>` where the key is a sha-256 digest of the request identity (kind,
//! params and id) and the snapshot of every input it consulted. `request/<id>` points at the latest entry of a
//! request so that a new process can find it before knowing the state of its inputs.
use std::path::PathBuf;

use cairn_core::cache::CacheRef;
use cairn_core::hash::canonical_json;
use cairn_core::hash::content_hash;
use cairn_core::hash::ContentKeyHasher;
use serde::Deserialize;
use serde::Serialize;

use crate::request_tracker::RequestFlags;
use crate::request_tracker::RequestId;
use crate::requests::RequestResult;

/// The state of one input at the time a request was computed
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum InputSnapshot {
  /// `content_hash` is `None` when the file did not exist
  #[serde(rename_all = "camelCase")]
  File {
    path: PathBuf,
    content_hash: Option<String>,
  },
  Glob { pattern: String },
  /// `value` is `None` when the variable was unset
  Env { name: String, value: Option<String> },
  DevDependency {
    name: String,
    constraint: Option<String>,
    version: Option<String>,
  },
  #[serde(rename_all = "camelCase")]
  SubRequest {
    request_id: String,
    kind: String,
    result_hash: Option<String>,
  },
}

impl InputSnapshot {
  fn write_to(&self, hasher: &mut ContentKeyHasher) {
    match self {
      InputSnapshot::File { path, content_hash } => {
        hasher.write_str("file");
        hasher.write_str(&path.to_string_lossy());
        hasher.write_optional(content_hash.as_deref());
      }
      InputSnapshot::Glob { pattern } => {
        hasher.write_str("glob");
        hasher.write_str(pattern);
      }
      InputSnapshot::Env { name, value } => {
        hasher.write_str("env");
        hasher.write_str(name);
        hasher.write_optional(value.as_deref());
      }
      InputSnapshot::DevDependency {
        name,
        constraint,
        version,
      } => {
        hasher.write_str("devDependency");
        hasher.write_str(name);
        hasher.write_optional(constraint.as_deref());
        hasher.write_optional(version.as_deref());
      }
      InputSnapshot::SubRequest {
        request_id,
        kind,
        result_hash,
      } => {
        hasher.write_str("subRequest");
        hasher.write_str(request_id);
        hasher.write_str(kind);
        hasher.write_optional(result_hash.as_deref());
      }
    }
  }
}

pub fn format_request_id(request_id: RequestId) -> String {
  format!("{request_id:016x}")
}

pub fn parse_request_id(request_id: &str) -> Option<RequestId> {
  RequestId::from_str_radix(request_id, 16).ok()
}

/// A persisted request result. Entries are immutable once written.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  pub key: String,
  pub kind: String,
  pub params: String,
  pub request_id: String,
  /// Canonical JSON of the [`RequestResult`]
  pub result: String,
  pub result_hash: String,
  /// Sorted snapshot of every input
  pub inputs: Vec<InputSnapshot>,
  pub flags: RequestFlags,
}

impl CacheEntry {
  pub fn new(
    kind: &str,
    params: &str,
    request_id: RequestId,
    result: &RequestResult,
    mut inputs: Vec<InputSnapshot>,
    flags: RequestFlags,
  ) -> anyhow::Result<Self> {
    inputs.sort();
    inputs.dedup();

    let result = canonical_json(&serde_json::to_value(result)?);
    let mut entry = Self {
      key: String::new(),
      kind: kind.to_string(),
      params: params.to_string(),
      request_id: format_request_id(request_id),
      result_hash: content_hash(result.as_bytes()),
      result,
      inputs,
      flags,
    };

    entry.key = entry.derive_key();
    Ok(entry)
  }

  /// The content key of this entry, computed from its identity and input snapshot
  pub fn derive_key(&self) -> String {
    let mut hasher = ContentKeyHasher::default();
    hasher.write_str(&self.kind);
    hasher.write_str(&self.params);
    hasher.write_str(&self.request_id);
    for input in &self.inputs {
      input.write_to(&mut hasher);
    }
    hasher.finish()
  }

  pub fn decode_result(&self) -> anyhow::Result<RequestResult> {
    Ok(serde_json::from_str(&self.result)?)
  }

  fn verify(&self, key: &str) -> Result<(), String> {
    if self.key != key {
      return Err(format!("entry is stored under {key} but names {}", self.key));
    }

    let derived = self.derive_key();
    if derived != key {
      return Err(format!("key derivation produced {derived}"));
    }

    let result_hash = content_hash(self.result.as_bytes());
    if result_hash != self.result_hash {
      return Err(format!("result hash is {result_hash}, expected {}", self.result_hash));
    }

    Ok(())
  }
}

fn entry_key(key: &str) -> String {
  format!("entry/{key}")
}

fn request_key(request_id: RequestId) -> String {
  format!("request/{}", format_request_id(request_id))
}

/// Reads and writes [`CacheEntry`] values on top of a blob [`cairn_core::cache::Cache`].
///
/// Reads never fail: an entry that is missing, undecodable or does not match its key is a miss.
#[derive(Clone)]
pub struct CacheStore {
  cache: CacheRef,
}

impl std::fmt::Debug for CacheStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheStore").finish_non_exhaustive()
  }
}

impl CacheStore {
  pub fn new(cache: CacheRef) -> Self {
    Self { cache }
  }

  #[tracing::instrument(level = "trace", skip_all, fields(key = %entry.key, kind = %entry.kind))]
  pub fn put(&self, entry: &CacheEntry) -> anyhow::Result<()> {
    let blob = serde_json::to_vec(entry)?;
    self.cache.set_blob(&entry_key(&entry.key), &blob)?;

    // The index is written last so it never points at an unpublished entry
    self
      .cache
      .set_blob(&format!("request/{}", entry.request_id), entry.key.as_bytes())?;

    Ok(())
  }

  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    let blob = match self.cache.get_blob(&entry_key(key)) {
      Ok(Some(blob)) => blob,
      Ok(None) => return None,
      Err(error) => {
        tracing::warn!(%key, "Failed to read cache entry: {error:#}");
        return None;
      }
    };

    let entry = match serde_json::from_slice::<CacheEntry>(&blob) {
      Ok(entry) => entry,
      Err(error) => {
        tracing::warn!(%key, "Ignoring undecodable cache entry: {error}");
        return None;
      }
    };

    if let Err(reason) = entry.verify(key) {
      tracing::warn!(%key, "Ignoring corrupt cache entry: {reason}");
      return None;
    }

    Some(entry)
  }

  /// The most recently written entry of a request
  pub fn get_latest(&self, request_id: RequestId) -> Option<CacheEntry> {
    let key = match self.cache.get_blob(&request_key(request_id)) {
      Ok(Some(key)) => String::from_utf8(key).ok()?,
      Ok(None) => return None,
      Err(error) => {
        tracing::warn!(request_id, "Failed to read cache index: {error:#}");
        return None;
      }
    };

    self
      .get(&key)
      .filter(|entry| parse_request_id(&entry.request_id) == Some(request_id))
  }

  /// Remove an entry. Requests whose index points at it become cache misses.
  pub fn evict(&self, key: &str) -> anyhow::Result<()> {
    self.cache.remove_blob(&entry_key(key))
  }
}
