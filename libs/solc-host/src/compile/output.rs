use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::internal::errors::{map_err_with_context, Result};

const ERROR_SEVERITY: &str = "error";
const PLACEHOLDER_BYTECODE: &str = "0x";

// -----------------------------------------------------------------------------
// Normalised result handed back to callers
// -----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
  pub file: String,
  pub start: i64,
  pub end: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
  pub formatted_message: String,
  pub severity: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_location: Option<SourceLocation>,
}

impl Diagnostic {
  pub fn error(message: impl Into<String>) -> Self {
    Self {
      formatted_message: message.into(),
      severity: ERROR_SEVERITY.to_string(),
      source_location: None,
    }
  }

  /// Only the exact, lower-case `error` severity blocks success.
  pub fn is_error(&self) -> bool {
    self.severity == ERROR_SEVERITY
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
  pub abi: Value,
  pub bytecode: String,
  pub deployed_bytecode: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompileResult {
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contracts: Option<BTreeMap<String, ContractArtifact>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub errors: Option<Vec<Diagnostic>>,
}

impl CompileResult {
  /// Synthetic failure used when the pipeline itself breaks down.
  pub fn failed(reason: impl std::fmt::Display) -> Self {
    Self {
      success: false,
      contracts: None,
      errors: Some(vec![Diagnostic::error(format!(
        "Compilation failed: {reason}"
      ))]),
    }
  }

  pub fn has_compiler_errors(&self) -> bool {
    self
      .errors
      .as_ref()
      .is_some_and(|errors| errors.iter().any(Diagnostic::is_error))
  }

  pub fn diagnostics(&self) -> &[Diagnostic] {
    self.errors.as_deref().unwrap_or_default()
  }

  pub fn contract(&self, name: &str) -> Option<&ContractArtifact> {
    self.contracts.as_ref().and_then(|contracts| contracts.get(name))
  }
}

// -----------------------------------------------------------------------------
// Raw standard-JSON output
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawOutput {
  #[serde(default)]
  errors: Vec<RawDiagnostic>,
  #[serde(default)]
  contracts: BTreeMap<String, BTreeMap<String, RawContract>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDiagnostic {
  formatted_message: Option<String>,
  message: Option<String>,
  #[serde(default)]
  severity: String,
  source_location: Option<SourceLocation>,
}

#[derive(Debug, Default, Deserialize)]
struct RawContract {
  #[serde(default)]
  abi: Value,
  #[serde(default)]
  evm: RawEvm,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvm {
  bytecode: Option<RawBytecode>,
  deployed_bytecode: Option<RawBytecode>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBytecode {
  object: Option<String>,
}

impl RawContract {
  fn bytecode(&self) -> Option<&str> {
    self
      .evm
      .bytecode
      .as_ref()
      .and_then(|bytecode| bytecode.object.as_deref())
  }

  fn deployed_bytecode(&self) -> Option<&str> {
    self
      .evm
      .deployed_bytecode
      .as_ref()
      .and_then(|bytecode| bytecode.object.as_deref())
  }
}

fn to_diagnostic(raw: RawDiagnostic) -> Diagnostic {
  let formatted_message = raw
    .formatted_message
    .filter(|message| !message.is_empty())
    .or(raw.message.filter(|message| !message.is_empty()))
    .unwrap_or_else(|| "Unknown error".to_string());

  Diagnostic {
    formatted_message,
    severity: raw.severity,
    source_location: raw.source_location,
  }
}

fn is_deployable(bytecode: Option<&str>) -> bool {
  matches!(bytecode, Some(object) if !object.is_empty() && object != PLACEHOLDER_BYTECODE)
}

/// Parse raw compiler output and apply the all-or-nothing artifact policy.
pub fn normalize(raw: &str) -> Result<CompileResult> {
  let output: RawOutput = map_err_with_context(
    serde_json::from_str(raw),
    "Failed to parse compiler output",
  )?;

  let errors: Vec<Diagnostic> = output.errors.into_iter().map(to_diagnostic).collect();
  let has_errors = errors.iter().any(Diagnostic::is_error);

  let contracts = if has_errors {
    None
  } else {
    let mut contracts = BTreeMap::new();
    for (_file, file_contracts) in output.contracts {
      for (name, contract) in file_contracts {
        if !is_deployable(contract.bytecode()) {
          continue;
        }
        let artifact = ContractArtifact {
          bytecode: contract.bytecode().unwrap_or_default().to_string(),
          deployed_bytecode: contract.deployed_bytecode().unwrap_or_default().to_string(),
          abi: contract.abi,
        };
        contracts.insert(name, artifact);
      }
    }
    Some(contracts)
  };

  Ok(CompileResult {
    success: !has_errors,
    contracts,
    errors: Some(errors),
  })
}
