//! Engine binding backed by native solc releases from the SVM cache.

use std::sync::{Arc, OnceLock};
use std::thread;

use foundry_compilers::solc::Solc;
use serde_json::Value;

use super::engine::{EngineLoader, EngineModule, ModuleStatus, VERSION_SYMBOL};
use crate::internal::errors::{map_err_with_context, Result};
use crate::internal::solc::{locate, parse_version, RegistryEntry};

const COMPILE_SYMBOL: &str = "solidity_compile";

type LoadSlot = Arc<OnceLock<std::result::Result<Solc, String>>>;

/// Resolves registry entries to installed solc binaries. Lookup (and the
/// optional download) runs on a loader thread so the module reports
/// [`ModuleStatus::Loading`] until it finishes.
#[derive(Clone, Debug, Default)]
pub struct SvmLoader {
  auto_install: bool,
}

impl SvmLoader {
  pub fn new(auto_install: bool) -> Self {
    Self { auto_install }
  }
}

impl EngineLoader for SvmLoader {
  fn import_script(&self, entry: &RegistryEntry) -> Result<Box<dyn EngineModule>> {
    let version = parse_version(&entry.version)?;
    let slot: LoadSlot = Arc::new(OnceLock::new());
    let auto_install = self.auto_install;

    let loaded = slot.clone();
    map_err_with_context(
      thread::Builder::new()
        .name(format!("solc-load-{}", entry.version))
        .spawn(move || {
          let _ = loaded.set(locate(&version, auto_install).map_err(|err| err.to_string()));
        }),
      "Failed to start compiler loader",
    )?;

    Ok(Box::new(SvmModule { slot }))
  }
}

struct SvmModule {
  slot: LoadSlot,
}

impl SvmModule {
  fn solc(&self) -> Option<&Solc> {
    self.slot.get().and_then(|loaded| loaded.as_ref().ok())
  }

  fn compile_standard_json(solc: &Solc, input: &str) -> std::result::Result<String, String> {
    let document: Value = serde_json::from_str(input).map_err(|err| err.to_string())?;
    let output = solc.compile_output(&document).map_err(|err| err.to_string())?;
    String::from_utf8(output).map_err(|err| err.to_string())
  }
}

impl EngineModule for SvmModule {
  fn status(&self) -> ModuleStatus {
    match self.slot.get() {
      None => ModuleStatus::Loading,
      Some(Ok(_)) => ModuleStatus::Ready,
      Some(Err(reason)) => ModuleStatus::Failed(reason.clone()),
    }
  }

  fn invoke(&self, symbol: &str, input: &str, _flag: i32) -> Option<std::result::Result<String, String>> {
    let solc = self.solc()?;
    match symbol {
      COMPILE_SYMBOL => Some(Self::compile_standard_json(solc, input)),
      VERSION_SYMBOL => Some(Ok(solc.version.to_string())),
      _ => None,
    }
  }
}
