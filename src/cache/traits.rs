//! Core traits and types for the durable store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

use super::key::RequestKey;
use crate::http::{Response, ResponseKind};

/// A response captured at write time.
///
/// Entries are immutable: a newer write for the same key replaces the whole
/// entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub status: u16,
  pub kind: ResponseKind,
  /// Final URL the response was served from, if known
  pub url: Option<String>,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  /// When the response was written to the store
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  /// Capture a response view for persistence, consuming it.
  pub fn capture(response: Response) -> Self {
    let (status, kind, url, headers, body) = response.into_parts();
    Self {
      status,
      kind,
      url: url.map(String::from),
      headers,
      body: body.into_bytes(),
      cached_at: Utc::now(),
    }
  }

  /// Rebuild a live response from the stored entry.
  pub fn into_response(self) -> Response {
    let response = Response::new(self.status, self.kind)
      .with_headers(self.headers)
      .with_body(self.body);
    match self.url.as_deref().and_then(|u| Url::parse(u).ok()) {
      Some(url) => response.with_url(url),
      None => response,
    }
  }
}

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("failed to encode entry: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("store i/o error: {0}")]
  Io(#[from] std::io::Error),
  #[error("store lock poisoned")]
  LockPoisoned,
  #[error("corrupt entry in store '{store}': {reason}")]
  Corrupt { store: String, reason: String },
  #[error("could not determine data directory")]
  NoDataDir,
}

/// Durable store manager.
///
/// Each method is atomic on its own. Writes for the same key from concurrent
/// tasks resolve as last-write-wins.
#[async_trait]
pub trait StoreManager: Send + Sync {
  /// Create the named store if it does not exist yet.
  async fn open(&self, name: &str) -> Result<(), StoreError>;

  /// Remove a store and all its entries. Returns false if it did not exist.
  async fn delete(&self, name: &str) -> Result<bool, StoreError>;

  /// Names of all existing stores.
  async fn list(&self) -> Result<Vec<String>, StoreError>;

  /// Insert or overwrite one entry, opening the store if needed.
  async fn put(
    &self,
    store: &str,
    key: &RequestKey,
    response: &CachedResponse,
  ) -> Result<(), StoreError>;

  /// Write every entry, or none of them.
  async fn put_all(
    &self,
    store: &str,
    entries: &[(RequestKey, CachedResponse)],
  ) -> Result<(), StoreError>;

  /// Look the key up across all stores, oldest store first.
  async fn get(&self, key: &RequestKey) -> Result<Option<CachedResponse>, StoreError>;

  /// Look the key up in a single store.
  async fn get_in(
    &self,
    store: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedResponse>, StoreError>;

  /// Keys held by a single store.
  async fn keys(&self, store: &str) -> Result<Vec<RequestKey>, StoreError>;
}
