//! Seam between the worker and the compiler engine it drives.
//!
//! An engine is imported from a registry resource, becomes ready some time
//! later, and then exposes one or more compile entry points. Which entry point
//! a given release provides differs, so the worker walks a fixed fallback
//! chain until one produces output.

use crate::internal::errors::{Error, Result};
use crate::internal::solc::RegistryEntry;

pub const VERSION_SYMBOL: &str = "solidity_version";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleStatus {
  Loading,
  Ready,
  Failed(String),
}

/// A loaded compiler engine.
pub trait EngineModule: Send {
  fn status(&self) -> ModuleStatus;

  /// Call an exported function with a string argument and integer flag.
  /// `None` means the symbol is not exported by this engine.
  fn invoke(&self, symbol: &str, input: &str, flag: i32) -> Option<std::result::Result<String, String>>;

  /// Method-style compile entry point on the module object itself.
  fn compile_method(&self, _input: &str) -> Option<std::result::Result<String, String>> {
    None
  }

  fn version(&self) -> Option<String> {
    self.invoke(VERSION_SYMBOL, "", 0).and_then(|result| result.ok())
  }
}

/// Imports the engine behind a registry entry. The returned module may still
/// be [`ModuleStatus::Loading`].
pub trait EngineLoader: Send + Sync {
  fn import_script(&self, entry: &RegistryEntry) -> Result<Box<dyn EngineModule>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryPoint {
  SolidityCompile,
  CompileJson,
  CompileJsonMulti,
  ModuleCompile,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Invocation {
  Output(String),
  NotExported,
  Empty,
  Failed(String),
}

impl EntryPoint {
  pub const CHAIN: [EntryPoint; 4] = [
    EntryPoint::SolidityCompile,
    EntryPoint::CompileJson,
    EntryPoint::CompileJsonMulti,
    EntryPoint::ModuleCompile,
  ];

  pub fn symbol(&self) -> &'static str {
    match self {
      EntryPoint::SolidityCompile => "solidity_compile",
      EntryPoint::CompileJson => "compileJSON",
      EntryPoint::CompileJsonMulti => "compileJSONMulti",
      EntryPoint::ModuleCompile => "compile",
    }
  }

  fn flag(&self) -> i32 {
    match self {
      EntryPoint::SolidityCompile => 0,
      EntryPoint::CompileJson | EntryPoint::CompileJsonMulti => 1,
      EntryPoint::ModuleCompile => 0,
    }
  }

  pub fn invoke(&self, module: &dyn EngineModule, input: &str) -> Invocation {
    let outcome = match self {
      EntryPoint::ModuleCompile => module.compile_method(input),
      _ => module.invoke(self.symbol(), input, self.flag()),
    };
    match outcome {
      None => Invocation::NotExported,
      Some(Ok(output)) if output.is_empty() => Invocation::Empty,
      Some(Ok(output)) => Invocation::Output(output),
      Some(Err(err)) => Invocation::Failed(err),
    }
  }
}

/// Run `input` through the first entry point that yields output.
pub fn compile_with_fallback(module: &dyn EngineModule, input: &str) -> Result<String> {
  for entry in EntryPoint::CHAIN {
    match entry.invoke(module, input) {
      Invocation::Output(output) => return Ok(output),
      Invocation::NotExported | Invocation::Empty => {}
      Invocation::Failed(reason) => {
        log::debug!("entry point {} failed: {reason}", entry.symbol());
      }
    }
  }
  Err(Error::NoCompatibleEntryPoint)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  struct Exports {
    symbols: Vec<(&'static str, std::result::Result<&'static str, &'static str>)>,
    method: Option<&'static str>,
    calls: Mutex<Vec<(String, i32)>>,
  }

  impl Exports {
    fn new(symbols: Vec<(&'static str, std::result::Result<&'static str, &'static str>)>) -> Self {
      Self {
        symbols,
        method: None,
        calls: Mutex::new(Vec::new()),
      }
    }
  }

  impl EngineModule for Exports {
    fn status(&self) -> ModuleStatus {
      ModuleStatus::Ready
    }

    fn invoke(&self, symbol: &str, _input: &str, flag: i32) -> Option<std::result::Result<String, String>> {
      self.calls.lock().unwrap().push((symbol.to_string(), flag));
      self
        .symbols
        .iter()
        .find(|(name, _)| *name == symbol)
        .map(|(_, outcome)| (*outcome).map(str::to_string).map_err(str::to_string))
    }

    fn compile_method(&self, _input: &str) -> Option<std::result::Result<String, String>> {
      self.method.map(|output| Ok(output.to_string()))
    }
  }

  #[test]
  fn first_entry_point_wins() {
    let module = Exports::new(vec![("solidity_compile", Ok("{}")), ("compileJSON", Ok("legacy"))]);
    assert_eq!(compile_with_fallback(&module, "{}").unwrap(), "{}");
    assert_eq!(*module.calls.lock().unwrap(), vec![("solidity_compile".to_string(), 0)]);
  }

  #[test]
  fn throwing_and_empty_entry_points_fall_through() {
    let module = Exports::new(vec![
      ("solidity_compile", Err("abort")),
      ("compileJSON", Ok("")),
      ("compileJSONMulti", Ok("multi")),
    ]);
    assert_eq!(compile_with_fallback(&module, "{}").unwrap(), "multi");
    assert_eq!(
      *module.calls.lock().unwrap(),
      vec![
        ("solidity_compile".to_string(), 0),
        ("compileJSON".to_string(), 1),
        ("compileJSONMulti".to_string(), 1),
      ]
    );
  }

  #[test]
  fn module_method_is_last_resort() {
    let mut module = Exports::new(Vec::new());
    module.method = Some("from method");
    assert_eq!(compile_with_fallback(&module, "{}").unwrap(), "from method");
  }

  #[test]
  fn nothing_exported_is_an_error() {
    let module = Exports::new(vec![("solidity_version", Ok("0.8.26+commit"))]);
    assert_eq!(
      compile_with_fallback(&module, "{}").unwrap_err(),
      Error::NoCompatibleEntryPoint
    );
    assert_eq!(module.version().as_deref(), Some("0.8.26+commit"));
  }
}
