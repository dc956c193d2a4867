use std::path::PathBuf;

use anyhow::anyhow;
use cairn_core::diagnostic::Diagnostic;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Why a request did not produce a result
#[derive(Clone, Debug, Deserialize, Error, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RequestError {
  /// The request handler returned an error
  #[error("{kind} request failed for {params}{}: {message}", from_search_path(search_path))]
  HandlerFailure {
    kind: String,
    params: String,
    search_path: Option<PathBuf>,
    message: String,
  },

  /// The task running the handler panicked on every attempt
  #[error("{kind} request crashed after {attempts} attempts: {message}")]
  WorkerCrash {
    kind: String,
    params: String,
    attempts: u32,
    message: String,
  },

  /// A request asked for a sub-request that already depends on it. This aborts the build.
  #[error("Cycle detected: {}", chain.join(" -> "))]
  CycleDetected { chain: Vec<String> },

  /// A reported input exists but could not be read
  #[error("{kind} request could not read {}: {message}", path.display())]
  InputResolutionFailure {
    kind: String,
    path: PathBuf,
    message: String,
  },

  /// A dependency of the request failed, so the request has no result of its own
  #[error("{kind} request was blocked by {dependency}")]
  Blocked {
    kind: String,
    params: String,
    dependency: String,
  },
}

impl RequestError {
  /// Whether this failure was caused by another request
  pub fn is_blocked(&self) -> bool {
    matches!(self, RequestError::Blocked { .. })
  }

  /// A short description of the request this error belongs to
  pub fn describe(&self) -> String {
    match self {
      RequestError::HandlerFailure { kind, params, .. }
      | RequestError::WorkerCrash { kind, params, .. }
      | RequestError::Blocked { kind, params, .. } => format!("{kind}({params})"),
      RequestError::InputResolutionFailure { kind, path, .. } => {
        format!("{kind}({})", path.display())
      }
      RequestError::CycleDetected { chain } => chain.join(" -> "),
    }
  }
}

fn from_search_path(search_path: &Option<PathBuf>) -> String {
  search_path
    .as_ref()
    .map(|search_path| format!(" from {}", search_path.display()))
    .unwrap_or_default()
}

/// Flattened form of the errors handlers return
#[derive(Debug, PartialEq)]
pub enum CairnError {
  Diagnostic(Diagnostic),
  Request(RequestError),
  Unknown(String),
}

impl std::fmt::Display for CairnError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CairnError::Diagnostic(diagnostic) => write!(f, "{diagnostic}"),
      CairnError::Request(error) => write!(f, "{error}"),
      CairnError::Unknown(message) => f.write_str(message),
    }
  }
}

impl Serialize for CairnError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    match self {
      CairnError::Diagnostic(diagnostic) => diagnostic.serialize(serializer),
      CairnError::Request(error) => error.serialize(serializer),
      CairnError::Unknown(message) => message.serialize(serializer),
    }
  }
}

impl From<&anyhow::Error> for CairnError {
  fn from(error: &anyhow::Error) -> Self {
    if let Some(diagnostic) = error.downcast_ref::<Diagnostic>() {
      Self::Diagnostic(diagnostic.clone())
    } else if let Some(request_error) = error.downcast_ref::<RequestError>() {
      Self::Request(request_error.clone())
    } else if let Some(message) = error.downcast_ref::<String>() {
      Self::Unknown(message.clone())
    } else {
      Self::Unknown(format!("{error:#}"))
    }
  }
}

impl From<CairnError> for anyhow::Error {
  fn from(value: CairnError) -> Self {
    match value {
      CairnError::Diagnostic(diagnostic) => anyhow!(diagnostic),
      CairnError::Request(error) => anyhow!(error),
      CairnError::Unknown(message) => anyhow!(message),
    }
  }
}

#[cfg(test)]
mod tests {
  use cairn_core::diagnostic_error;
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn flattens_diagnostics() {
    let error = diagnostic_error!("Unable to parse {}", "a.json");

    assert_eq!(
      CairnError::from(&error),
      CairnError::Diagnostic(Diagnostic::new("Unable to parse a.json"))
    );
  }

  #[test]
  fn flattens_request_errors_through_context() {
    let error = anyhow::Error::new(RequestError::CycleDetected {
      chain: vec![String::from("a"), String::from("b"), String::from("a")],
    });

    let flattened = CairnError::from(&error);

    assert_eq!(flattened.to_string(), "Cycle detected: a -> b -> a");
    assert!(matches!(flattened, CairnError::Request(_)));
  }

  #[test]
  fn keeps_context_for_unknown_errors() {
    let error = anyhow!("root cause").context("while loading");

    assert_eq!(
      CairnError::from(&error),
      CairnError::Unknown(String::from("while loading: root cause"))
    );
  }

  #[test]
  fn handler_failures_name_the_params_and_search_path() {
    let error = RequestError::HandlerFailure {
      kind: String::from("config_request"),
      params: String::from("tool"),
      search_path: Some(PathBuf::from("/project/src")),
      message: String::from("Error parsing /project/tool.json"),
    };

    assert_eq!(
      error.to_string(),
      "config_request request failed for tool from /project/src: Error parsing /project/tool.json"
    );

    let RequestError::HandlerFailure {
      kind,
      params,
      message,
      ..
    } = error
    else {
      unreachable!()
    };
    let error = RequestError::HandlerFailure {
      kind,
      params,
      search_path: None,
      message,
    };

    assert_eq!(
      error.to_string(),
      "config_request request failed for tool: Error parsing /project/tool.json"
    );
  }

  #[test]
  fn describes_the_failing_request() {
    let error = RequestError::Blocked {
      kind: String::from("config"),
      params: String::from("babel"),
      dependency: String::from("package(foo)"),
    };

    assert!(error.is_blocked());
    assert_eq!(error.describe(), "config(babel)");
    assert_eq!(
      error.to_string(),
      "config request was blocked by package(foo)"
    );
  }
}
