use std::env;
use std::time::Duration;

use super::errors::{map_err_with_context, Error, Result};
use super::solc::{VersionRegistry, DEFAULT_SOLC_VERSION};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_POLL_ATTEMPTS: u32 = 200;
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const OPENZEPPELIN_NAMESPACE: &str = "@openzeppelin/";

const EDITOR_TITLE: &str = "Build & Deploy Contract";

/// Bounded wait for a freshly imported engine to report readiness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadinessPolicy {
  pub interval: Duration,
  pub max_attempts: u32,
}

impl Default for ReadinessPolicy {
  fn default() -> Self {
    Self {
      interval: DEFAULT_POLL_INTERVAL,
      max_attempts: DEFAULT_POLL_ATTEMPTS,
    }
  }
}

/// Linear backoff applied to remote import fetches: after failed attempt `n`
/// the resolver waits `n * backoff_unit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: DEFAULT_FETCH_ATTEMPTS,
      backoff_unit: DEFAULT_FETCH_BACKOFF,
    }
  }
}

impl RetryPolicy {
  pub fn delay_after(&self, attempt: u32) -> Duration {
    self.backoff_unit * attempt
  }
}

/// A package namespace whose files are served from a raw-content host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageSource {
  pub prefix: String,
  pub base_url: String,
}

impl PackageSource {
  pub fn new(prefix: impl Into<String>, base_url: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      base_url: base_url.into(),
    }
  }

  pub fn url_for(&self, path: &str) -> Option<String> {
    let relative = path.strip_prefix(&self.prefix)?;
    Some(format!(
      "{}/{}",
      self.base_url.trim_end_matches('/'),
      relative
    ))
  }
}

pub fn default_package_sources() -> Vec<PackageSource> {
  vec![
    PackageSource::new(
      "@openzeppelin/contracts-upgradeable/",
      "https://raw.githubusercontent.com/OpenZeppelin/openzeppelin-contracts-upgradeable/v5.0.0/contracts",
    ),
    PackageSource::new(
      "@openzeppelin/contracts/",
      "https://raw.githubusercontent.com/OpenZeppelin/openzeppelin-contracts/v5.0.0/contracts",
    ),
  ]
}

/// Finalised host configuration consumed by the controller, the worker and the resolver.
#[derive(Clone, Debug)]
pub struct HostConfig {
  pub default_version: String,
  pub request_timeout: Duration,
  pub readiness: ReadinessPolicy,
  pub fetch: RetryPolicy,
  /// Upper bound on a single import fetch attempt.
  pub fetch_timeout: Duration,
  pub import_namespace: String,
  pub packages: Vec<PackageSource>,
  /// Download missing releases into the SVM cache instead of failing the load.
  pub auto_install: bool,
  pub registry: VersionRegistry,
}

impl Default for HostConfig {
  fn default() -> Self {
    HostConfig {
      default_version: DEFAULT_SOLC_VERSION.to_string(),
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
      readiness: ReadinessPolicy::default(),
      fetch: RetryPolicy::default(),
      fetch_timeout: DEFAULT_FETCH_TIMEOUT,
      import_namespace: OPENZEPPELIN_NAMESPACE.to_string(),
      packages: default_package_sources(),
      auto_install: false,
      registry: VersionRegistry::default(),
    }
  }
}

impl HostConfig {
  pub fn from_options(options: Option<HostConfigOptions>) -> Result<Self> {
    HostConfig::default().merge_options(options.as_ref())
  }

  pub fn merge_options(&self, options: Option<&HostConfigOptions>) -> Result<Self> {
    let mut config = self.clone();
    if let Some(overrides) = options {
      overrides.apply(&mut config);
    }
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if !self.registry.contains(&self.default_version) {
      return Err(self.registry.unsupported(&self.default_version));
    }
    if self.request_timeout.is_zero() {
      return Err(Error::Config("request timeout must be non-zero".into()));
    }
    if self.readiness.max_attempts == 0 {
      return Err(Error::Config("readiness polling needs at least one attempt".into()));
    }
    if self.fetch.attempts == 0 {
      return Err(Error::Config("import fetching needs at least one attempt".into()));
    }
    if self.fetch_timeout.is_zero() {
      return Err(Error::Config("fetch timeout must be non-zero".into()));
    }
    Ok(())
  }
}

/// Optional overrides that can be merged into a [`HostConfig`].
#[derive(Clone, Debug, Default)]
pub struct HostConfigOptions {
  pub default_version: Option<String>,
  pub request_timeout: Option<Duration>,
  pub readiness: Option<ReadinessPolicy>,
  pub fetch: Option<RetryPolicy>,
  pub fetch_timeout: Option<Duration>,
  pub import_namespace: Option<String>,
  pub packages: Option<Vec<PackageSource>>,
  pub auto_install: Option<bool>,
  pub registry: Option<VersionRegistry>,
}

impl HostConfigOptions {
  /// Read overrides from `SOLC_HOST_*` environment variables.
  pub fn from_env() -> Result<Self> {
    let mut options = HostConfigOptions {
      default_version: env_var("SOLC_HOST_DEFAULT_VERSION"),
      ..Default::default()
    };

    if let Some(raw) = env_var("SOLC_HOST_REQUEST_TIMEOUT_MS") {
      let millis = map_err_with_context(
        raw.parse::<u64>(),
        "Invalid SOLC_HOST_REQUEST_TIMEOUT_MS",
      )?;
      options.request_timeout = Some(Duration::from_millis(millis));
    }

    if let Some(raw) = env_var("SOLC_HOST_FETCH_BACKOFF_MS") {
      let millis = map_err_with_context(
        raw.parse::<u64>(),
        "Invalid SOLC_HOST_FETCH_BACKOFF_MS",
      )?;
      options.fetch = Some(RetryPolicy {
        backoff_unit: Duration::from_millis(millis),
        ..RetryPolicy::default()
      });
    }

    if let Some(raw) = env_var("SOLC_HOST_FETCH_TIMEOUT_MS") {
      let millis = map_err_with_context(
        raw.parse::<u64>(),
        "Invalid SOLC_HOST_FETCH_TIMEOUT_MS",
      )?;
      options.fetch_timeout = Some(Duration::from_millis(millis));
    }

    if let Some(raw) = env_var("SOLC_HOST_AUTO_INSTALL") {
      options.auto_install = Some(matches!(raw.as_str(), "1" | "true" | "yes"));
    }

    Ok(options)
  }

  fn apply(&self, config: &mut HostConfig) {
    if let Some(registry) = &self.registry {
      config.registry = registry.clone();
    }
    if let Some(version) = &self.default_version {
      config.default_version = version.trim().trim_start_matches('v').to_string();
    }
    if let Some(timeout) = self.request_timeout {
      config.request_timeout = timeout;
    }
    if let Some(readiness) = self.readiness {
      config.readiness = readiness;
    }
    if let Some(fetch) = self.fetch {
      config.fetch = fetch;
    }
    if let Some(timeout) = self.fetch_timeout {
      config.fetch_timeout = timeout;
    }
    if let Some(namespace) = &self.import_namespace {
      config.import_namespace = namespace.clone();
    }
    if let Some(packages) = &self.packages {
      config.packages = packages.clone();
    }
    if let Some(auto_install) = self.auto_install {
      config.auto_install = auto_install;
    }
  }
}

/// Feature toggle for the contract editor surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EditorFeature {
  pub title: &'static str,
  pub is_enabled: bool,
}

impl EditorFeature {
  pub fn from_env() -> Self {
    Self::from_flag(env_var("CONTRACT_EDITOR_ENABLED").as_deref())
  }

  fn from_flag(flag: Option<&str>) -> Self {
    EditorFeature {
      title: EDITOR_TITLE,
      is_enabled: flag == Some("true"),
    }
  }
}

fn env_var(name: &str) -> Option<String> {
  env::var(name)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}
