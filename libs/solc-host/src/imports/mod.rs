//! Transitive resolution of third-party library imports.
//!
//! User sources are scanned for imports under a known package namespace, the
//! referenced files are fetched from their raw-content host (with caching and
//! bounded retry), and the fetched files are scanned in turn until the work
//! queue is exhausted. Failed fetches are recorded and skipped; the compiler
//! reports the resulting missing files itself.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::internal::config::{HostConfig, PackageSource, RetryPolicy};

pub mod extract;
pub mod fetch;

pub use extract::extract_imports;
pub use fetch::{FetchError, HttpFetcher, ImportCache, SourceFetcher};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportFailure {
  pub path: String,
  pub error: String,
}

/// Closed set of sources ready for compilation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
  pub sources: BTreeMap<String, String>,
  pub failures: Vec<ImportFailure>,
}

#[derive(Clone)]
pub struct ImportResolver {
  fetcher: Arc<dyn SourceFetcher>,
  cache: Arc<ImportCache>,
  namespace: String,
  packages: Vec<PackageSource>,
  retry: RetryPolicy,
  fetch_timeout: Duration,
}

impl ImportResolver {
  pub fn new(config: &HostConfig, fetcher: Arc<dyn SourceFetcher>) -> Self {
    let mut packages = config.packages.clone();
    packages.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
    Self {
      fetcher,
      cache: Arc::new(ImportCache::new()),
      namespace: config.import_namespace.clone(),
      packages,
      retry: config.fetch,
      fetch_timeout: config.fetch_timeout,
    }
  }

  pub fn cache(&self) -> &ImportCache {
    &self.cache
  }

  /// Raw-content URL for a canonical import path, longest package prefix first.
  pub fn url_for(&self, path: &str) -> Option<String> {
    self.packages.iter().find_map(|package| package.url_for(path))
  }

  pub async fn resolve(&self, sources: BTreeMap<String, String>) -> Resolution {
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut visited: HashSet<String> = HashSet::new();
    let epoch = self.cache.epoch();

    for content in sources.values() {
      queue.extend(extract_imports(content, &self.namespace));
    }
    let mut resolution = Resolution {
      sources,
      failures: Vec::new(),
    };

    while let Some(path) = queue.pop_front() {
      if self.cache.epoch() != epoch {
        log::debug!("import cache cleared; abandoning resolution");
        break;
      }
      if !visited.insert(path.clone()) {
        continue;
      }
      // A file supplied by the caller under a canonical path shadows the remote copy.
      if resolution.sources.contains_key(&path) {
        continue;
      }

      match self.resolve_import(epoch, &path).await {
        Ok(content) => {
          queue.extend(extract_imports(&content, &self.namespace));
          resolution.sources.insert(path, content);
        }
        Err(error) => {
          log::warn!("could not resolve import {path}: {error}");
          resolution.failures.push(ImportFailure { path, error });
        }
      }
    }

    resolution
  }

  async fn resolve_import(&self, epoch: u64, path: &str) -> Result<String, String> {
    if let Some(content) = self.cache.get(path) {
      log::debug!("import cache hit for {path}");
      return Ok(content);
    }

    let url = self
      .url_for(path)
      .ok_or_else(|| format!("Unsupported import: {path}"))?;
    let content = self.fetch_with_retry(path, &url).await?;
    Ok(self.cache.store(epoch, path, content))
  }

  async fn fetch_with_retry(&self, path: &str, url: &str) -> Result<String, String> {
    let mut last_error = String::new();

    for attempt in 1..=self.retry.attempts {
      let fetched = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url))
        .await
        .unwrap_or_else(|_| {
          Err(FetchError::Network(format!(
            "request timed out after {}ms",
            self.fetch_timeout.as_millis()
          )))
        });
      match fetched {
        Ok(content) => {
          log::debug!("fetched {path} from {url} (attempt {attempt})");
          return Ok(content);
        }
        Err(err) => {
          log::debug!("attempt {attempt} to fetch {url} failed: {err}");
          last_error = err.to_string();
          tokio::time::sleep(self.retry.delay_after(attempt)).await;
        }
      }
    }

    Err(format!("Failed to fetch {path}: {last_error}"))
  }
}
