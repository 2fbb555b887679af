use std::sync::{Mutex, OnceLock};

use foundry_compilers::solc::Solc;
use semver::Version;

use super::errors::{map_err_with_context, Error, Result};

pub(crate) const DEFAULT_SOLC_VERSION: &str = "0.8.26";

const BUILTIN_VERSIONS: [&str; 5] = ["0.8.26", "0.8.25", "0.8.24", "0.8.20", "0.8.19"];

pub fn parse_version(version: &str) -> Result<Version> {
  let trimmed = version.trim().trim_start_matches('v');
  map_err_with_context(Version::parse(trimmed), "Failed to parse solc version")
}

/// A compiler release the worker knows how to load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
  pub version: String,
  /// Resource identifier handed to the engine loader.
  pub resource: String,
}

/// Static mapping from version string to loadable compiler resource. Order is
/// preserved so the newest release is listed first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionRegistry {
  entries: Vec<RegistryEntry>,
}

impl Default for VersionRegistry {
  fn default() -> Self {
    Self::new(
      BUILTIN_VERSIONS
        .iter()
        .map(|version| RegistryEntry {
          version: (*version).to_string(),
          resource: format!("soljson-v{version}"),
        })
        .collect(),
    )
  }
}

impl VersionRegistry {
  pub fn new(entries: Vec<RegistryEntry>) -> Self {
    Self { entries }
  }

  pub fn versions(&self) -> Vec<String> {
    self
      .entries
      .iter()
      .map(|entry| entry.version.clone())
      .collect()
  }

  /// Look up a version, tolerating surrounding whitespace and a leading `v`.
  pub fn resolve(&self, version: &str) -> Option<&RegistryEntry> {
    let wanted = version.trim().trim_start_matches('v');
    self.entries.iter().find(|entry| entry.version == wanted)
  }

  pub fn contains(&self, version: &str) -> bool {
    self.resolve(version).is_some()
  }

  pub fn unsupported(&self, version: &str) -> Error {
    Error::UnsupportedVersion {
      version: version.to_string(),
      available: self.versions(),
    }
  }
}

pub(crate) fn find_installed_version(version: &Version) -> Result<Option<Solc>> {
  map_err_with_context(
    Solc::find_svm_installed_version(version),
    "Failed to inspect solc versions",
  )
}

fn install_mutex() -> &'static Mutex<()> {
  static INSTALL_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
  INSTALL_MUTEX.get_or_init(|| Mutex::new(()))
}

/// Locate the release in the SVM cache, downloading it when `auto_install` is set.
pub(crate) fn locate(version: &Version, auto_install: bool) -> Result<Solc> {
  if let Some(solc) = find_installed_version(version)? {
    return Ok(solc);
  }
  if !auto_install {
    return Err(Error::worker(format!(
      "Solc {version} is not installed and automatic installation is disabled"
    )));
  }

  let _guard = install_mutex()
    .lock()
    .map_err(|err| Error::worker(format!("Solc install mutex poisoned: {err}")))?;
  if let Some(solc) = find_installed_version(version)? {
    return Ok(solc);
  }
  log::info!("installing solc {version}");
  map_err_with_context(
    Solc::blocking_install(version),
    "Failed to install solc version",
  )
}
