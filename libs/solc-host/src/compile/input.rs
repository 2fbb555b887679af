use std::collections::BTreeMap;

use serde::Serialize;

use crate::internal::errors::{map_err_with_context, Result};

const OUTPUT_SELECTION: [&str; 4] = [
  "abi",
  "evm.bytecode",
  "evm.deployedBytecode",
  "evm.methodIdentifiers",
];

/// Standard-JSON compiler input. The settings are fixed policy and are not
/// exposed for per-call overrides.
#[derive(Clone, Debug, Serialize)]
pub struct StandardInput {
  language: &'static str,
  sources: BTreeMap<String, SourceContent>,
  settings: Settings,
}

#[derive(Clone, Debug, Serialize)]
struct SourceContent {
  content: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
  output_selection: BTreeMap<String, BTreeMap<String, Vec<String>>>,
  optimizer: OptimizerSettings,
  evm_version: &'static str,
}

#[derive(Clone, Debug, Serialize)]
struct OptimizerSettings {
  enabled: bool,
  runs: u32,
}

impl StandardInput {
  pub fn new(sources: BTreeMap<String, String>) -> Self {
    let sources = sources
      .into_iter()
      .map(|(path, content)| (path, SourceContent { content }))
      .collect();

    let selection: Vec<String> = OUTPUT_SELECTION.iter().map(|s| s.to_string()).collect();
    let mut per_contract = BTreeMap::new();
    per_contract.insert("*".to_string(), selection);
    let mut output_selection = BTreeMap::new();
    output_selection.insert("*".to_string(), per_contract);

    Self {
      language: "Solidity",
      sources,
      settings: Settings {
        output_selection,
        optimizer: OptimizerSettings {
          enabled: true,
          runs: 200,
        },
        evm_version: "paris",
      },
    }
  }

  pub fn source_paths(&self) -> impl Iterator<Item = &str> {
    self.sources.keys().map(String::as_str)
  }

  pub fn to_json(&self) -> Result<String> {
    map_err_with_context(
      serde_json::to_string(self),
      "Failed to serialise compiler input",
    )
  }
}
