use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::internal::errors::{map_err_with_context, Result};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  #[error("HTTP {status}: {reason}")]
  Status { status: u16, reason: String },
  #[error("Network error: {0}")]
  Network(String),
}

/// Retrieves the raw text served at `url`.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
  async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError>;
}

/// Plain GET against raw-content hosts. Each attempt is bounded by `timeout`.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = map_err_with_context(
      reqwest::Client::builder()
        .user_agent(concat!("solc-host/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(timeout)
        .timeout(timeout)
        .build(),
      "Failed to build HTTP client",
    )?;
    Ok(Self { client })
  }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
  async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(network_error)?;

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
      });
    }

    response
      .text()
      .await
      .map_err(network_error)
  }
}

fn network_error(err: reqwest::Error) -> FetchError {
  if err.is_timeout() {
    FetchError::Network(format!("request timed out: {err}"))
  } else {
    FetchError::Network(err.to_string())
  }
}

/// Canonical import path -> fetched source text. Content for a canonical path
/// never changes, so the first stored copy wins.
///
/// Every `clear` starts a new epoch; stores tagged with an older epoch are
/// discarded.
#[derive(Debug, Default)]
pub struct ImportCache {
  entries: DashMap<String, String>,
  epoch: AtomicU64,
}

impl ImportCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, path: &str) -> Option<String> {
    self.entries.get(path).map(|entry| entry.value().clone())
  }

  /// Store `content` unless the path is already cached; returns the cached copy.
  pub fn insert_if_absent(&self, path: &str, content: String) -> String {
    self
      .entries
      .entry(path.to_string())
      .or_insert(content)
      .value()
      .clone()
  }

  pub fn epoch(&self) -> u64 {
    self.epoch.load(Ordering::SeqCst)
  }

  /// Like [`ImportCache::insert_if_absent`], but only while `epoch` is current.
  /// Returns the content either way.
  pub fn store(&self, epoch: u64, path: &str, content: String) -> String {
    if self.epoch() != epoch {
      return content;
    }
    let stored = self.insert_if_absent(path, content);
    if self.epoch() != epoch {
      self.entries.remove(path);
    }
    stored
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn clear(&self) {
    self.epoch.fetch_add(1, Ordering::SeqCst);
    self.entries.clear();
  }
}
