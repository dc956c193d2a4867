use std::fmt::Display;
use std::fmt::Formatter;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Create an [`anyhow::Error`] wrapping a [`Diagnostic`].
///
/// Accepts either a format string or an already built diagnostic.
#[macro_export]
macro_rules! diagnostic_error {
  ($fmt:literal $(, $arg:expr)* $(,)?) => {
    ::anyhow::Error::new($crate::diagnostic::Diagnostic::new(format!($fmt $(, $arg)*)))
  };
  ($diagnostic:expr) => {
    ::anyhow::Error::new($diagnostic)
  };
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
  #[default]
  Unknown,
  NotFound,
  ParseError,
}

/// Location of a diagnostic within a source file
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLocation {
  pub path: PathBuf,
  pub line: usize,
  pub column: usize,
}

/// This is a user facing error.
///
/// Usually but not always this is linked to a source-code location.
#[derive(Error, Debug, Deserialize, PartialEq, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
  /// A summary user-facing message
  pub message: String,

  pub kind: ErrorKind,

  /// Indicates where this diagnostic was emitted from
  pub origin: Option<String>,

  pub location: Option<CodeLocation>,

  /// Hints for the user
  pub hints: Vec<String>,
}

impl Display for Diagnostic {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.message)
  }
}

impl Diagnostic {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      ..Default::default()
    }
  }

  pub fn kind(mut self, kind: ErrorKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn origin(mut self, origin: impl Into<String>) -> Self {
    self.origin = Some(origin.into());
    self
  }

  pub fn location(mut self, path: PathBuf, line: usize, column: usize) -> Self {
    self.location = Some(CodeLocation { path, line, column });
    self
  }

  pub fn hint(mut self, hint: impl Into<String>) -> Self {
    self.hints.push(hint.into());
    self
  }
}
