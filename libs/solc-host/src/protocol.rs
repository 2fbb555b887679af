//! Message shapes exchanged across the worker boundary.
//!
//! Every request carries `{id, action, data?}` and every response carries
//! `{id, success, result?, error?}`. The host correlates the two through `id`
//! alone; responses may arrive in any order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::internal::errors::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
  LoadCompiler,
  Compile,
  GetVersions,
}

impl Action {
  pub fn as_str(&self) -> &'static str {
    match self {
      Action::LoadCompiler => "loadCompiler",
      Action::Compile => "compile",
      Action::GetVersions => "getVersions",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub input: Option<String>,
}

impl RequestData {
  pub fn version(version: impl Into<String>) -> Self {
    Self {
      version: Some(version.into()),
      input: None,
    }
  }

  pub fn input(input: impl Into<String>) -> Self {
    Self {
      version: None,
      input: Some(input.into()),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMessage {
  pub id: u64,
  pub action: Action,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<RequestData>,
}

/// Payload of a successful response: the raw compiler output or the version list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
  Text(String),
  List(Vec<String>),
}

impl ResponsePayload {
  pub fn into_text(self) -> Result<String, Error> {
    match self {
      ResponsePayload::Text(text) => Ok(text),
      ResponsePayload::List(_) => Err(Error::Protocol(
        "expected compiler output, received a list".into(),
      )),
    }
  }

  pub fn into_list(self) -> Result<Vec<String>, Error> {
    match self {
      ResponsePayload::List(list) => Ok(list),
      ResponsePayload::Text(_) => Err(Error::Protocol(
        "expected a version list, received text".into(),
      )),
    }
  }
}

/// Machine-readable failure classes that survive the trip across the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultCode {
  UnsupportedVersion,
  LoadTimeout,
  NoCompatibleEntryPoint,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
  pub id: u64,
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<ResponsePayload>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub code: Option<FaultCode>,
}

impl WorkerResponse {
  pub fn ok(id: u64, result: Option<ResponsePayload>) -> Self {
    Self {
      id,
      success: true,
      result,
      error: None,
      code: None,
    }
  }

  pub fn failed(id: u64, error: &Error) -> Self {
    Self {
      id,
      success: false,
      result: None,
      error: Some(error.to_string()),
      code: error.fault_code(),
    }
  }

  /// Convert the response into the outcome handed to the waiting caller.
  pub fn into_result(self) -> Result<Option<ResponsePayload>, Error> {
    if self.success {
      Ok(self.result)
    } else {
      Err(Error::from_fault(self.code, self.error))
    }
  }
}
