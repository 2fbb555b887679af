use std::fmt::Display;

use crate::protocol::{Action, FaultCode};

/// Canonical error type used by the host, the worker and the resolver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
  #[error("Version {version} not supported. Available versions: {}", .available.join(", "))]
  UnsupportedVersion {
    version: String,
    available: Vec<String>,
  },
  #[error("Failed to load compiler {version}: Compiler loading timeout")]
  LoadTimeout { version: String },
  #[error("Worker timeout for action: {action}")]
  Timeout { action: Action },
  #[error("Worker crashed: {0}")]
  ContextCrashed(String),
  #[error("Compiler destroyed")]
  HostDestroyed,
  #[error("No compatible compile function found in the compiler module")]
  NoCompatibleEntryPoint,
  #[error("{message}")]
  Worker {
    code: Option<FaultCode>,
    message: String,
  },
  #[error("Compiler context unavailable: {0}")]
  ContextUnavailable(String),
  #[error("Protocol error: {0}")]
  Protocol(String),
  #[error("Invalid configuration: {0}")]
  Config(String),
}

impl Error {
  pub fn worker(message: impl Into<String>) -> Self {
    Error::Worker {
      code: None,
      message: message.into(),
    }
  }

  pub fn with_context(context: impl AsRef<str>, cause: impl Display) -> Self {
    let mut message = context.as_ref().to_owned();
    if !message.ends_with(':') {
      message.push(':');
    }
    message.push(' ');
    message.push_str(&cause.to_string());
    Error::worker(message)
  }

  /// Rebuild an error from a failed worker response.
  pub fn from_fault(code: Option<FaultCode>, message: Option<String>) -> Self {
    Error::Worker {
      code,
      message: message.unwrap_or_else(|| "Unknown error".to_string()),
    }
  }

  /// Machine-readable code carried across the message boundary, if any.
  pub fn fault_code(&self) -> Option<FaultCode> {
    match self {
      Error::UnsupportedVersion { .. } => Some(FaultCode::UnsupportedVersion),
      Error::LoadTimeout { .. } => Some(FaultCode::LoadTimeout),
      Error::NoCompatibleEntryPoint => Some(FaultCode::NoCompatibleEntryPoint),
      Error::Worker { code, .. } => *code,
      _ => None,
    }
  }
}

/// Result alias bound to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Annotate an error from `result` with `context`, returning the shared [`Result`] type.
pub fn map_err_with_context<T, E>(
  result: std::result::Result<T, E>,
  context: impl AsRef<str>,
) -> Result<T>
where
  E: Display,
{
  result.map_err(|err| Error::with_context(context, err))
}

#[cfg(feature = "node")]
impl From<Error> for napi::Error {
  fn from(err: Error) -> Self {
    napi::Error::new(napi::Status::GenericFailure, err.to_string())
  }
}

/// Convert a [`Result`] into a `napi::Result`.
#[cfg(feature = "node")]
pub fn to_napi_result<T>(result: Result<T>) -> napi::Result<T> {
  result.map_err(Into::into)
}
