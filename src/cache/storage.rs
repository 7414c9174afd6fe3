//! SQLite implementation of the durable store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::key::RequestKey;
use super::traits::{CachedResponse, StoreError, StoreManager};
use crate::http::{Method, ResponseKind};

/// SQLite-based store manager.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the store database at the default location.
  pub fn open() -> Result<Self, StoreError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the store database at `path`.
  pub fn open_at(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Open a throwaway database that lives as long as the value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let storage = Self {
      conn: Mutex::new(Connection::open_in_memory()?),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = crate::config::data_dir().ok_or(StoreError::NoDataDir)?;
    Ok(data_dir.join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }

  /// Run database migrations for store tables.
  fn run_migrations(&self) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }
}

/// Schema for store tables.
const STORE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named stores; rowid gives creation order for cross-store lookups
CREATE TABLE IF NOT EXISTS stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Request -> response entries
CREATE TABLE IF NOT EXISTS entries (
    store_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    response_url TEXT,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (store_name, request_hash),
    FOREIGN KEY (store_name) REFERENCES stores(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_hash ON entries(request_hash);
"#;

const SELECT_ENTRY: &str = "SELECT e.store_name, e.status, e.kind, e.response_url, e.headers, e.body, e.cached_at
   FROM entries e
   INNER JOIN stores s ON s.name = e.store_name";

/// Columns as read from SQLite, before decoding.
struct RawEntry {
  store: String,
  status: u16,
  kind: String,
  url: Option<String>,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl RawEntry {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      store: row.get(0)?,
      status: row.get(1)?,
      kind: row.get(2)?,
      url: row.get(3)?,
      headers: row.get(4)?,
      body: row.get(5)?,
      cached_at: row.get(6)?,
    })
  }

  fn decode(self) -> Result<CachedResponse, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
      store: self.store.clone(),
      reason,
    };
    let kind = ResponseKind::parse(&self.kind)
      .ok_or_else(|| corrupt(format!("unknown response kind '{}'", self.kind)))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&self.headers)?;
    let cached_at = parse_datetime(&self.cached_at).map_err(corrupt)?;

    Ok(CachedResponse {
      status: self.status,
      kind,
      url: self.url,
      headers,
      body: self.body.into(),
      cached_at,
    })
  }
}

fn insert_store(conn: &Connection, name: &str) -> Result<(), StoreError> {
  conn.execute(
    "INSERT OR IGNORE INTO stores (name, created_at) VALUES (?, ?)",
    params![name, Utc::now().to_rfc3339()],
  )?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  store: &str,
  key: &RequestKey,
  response: &CachedResponse,
) -> Result<(), StoreError> {
  let headers = serde_json::to_string(&response.headers)?;
  conn.execute(
    "INSERT OR REPLACE INTO entries
       (store_name, request_hash, method, url, status, kind, response_url, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    params![
      store,
      key.hash(),
      key.method().as_str(),
      key.url(),
      response.status,
      response.kind.as_str(),
      response.url,
      headers,
      response.body.as_ref(),
      response.cached_at.to_rfc3339(),
    ],
  )?;
  Ok(())
}

#[async_trait]
impl StoreManager for SqliteStorage {
  async fn open(&self, name: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    insert_store(&conn, name)
  }

  async fn delete(&self, name: &str) -> Result<bool, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM entries WHERE store_name = ?", params![name])?;
    let removed = tx.execute("DELETE FROM stores WHERE name = ?", params![name])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  async fn list(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM stores ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  async fn put(
    &self,
    store: &str,
    key: &RequestKey,
    response: &CachedResponse,
  ) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    insert_store(&tx, store)?;
    insert_entry(&tx, store, key, response)?;
    tx.commit()?;
    Ok(())
  }

  async fn put_all(
    &self,
    store: &str,
    entries: &[(RequestKey, CachedResponse)],
  ) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    // Dropping the transaction on an early return rolls it back
    let tx = conn.transaction()?;
    insert_store(&tx, store)?;
    for (key, response) in entries {
      insert_entry(&tx, store, key, response)?;
    }
    tx.commit()?;
    Ok(())
  }

  async fn get(&self, key: &RequestKey) -> Result<Option<CachedResponse>, StoreError> {
    let conn = self.lock()?;
    let sql = format!("{SELECT_ENTRY} WHERE e.request_hash = ? ORDER BY s.rowid LIMIT 1");
    let raw = conn
      .query_row(&sql, params![key.hash()], RawEntry::from_row)
      .optional()?;
    raw.map(RawEntry::decode).transpose()
  }

  async fn get_in(
    &self,
    store: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedResponse>, StoreError> {
    let conn = self.lock()?;
    let sql = format!("{SELECT_ENTRY} WHERE e.store_name = ? AND e.request_hash = ?");
    let raw = conn
      .query_row(&sql, params![store, key.hash()], RawEntry::from_row)
      .optional()?;
    raw.map(RawEntry::decode).transpose()
  }

  async fn keys(&self, store: &str) -> Result<Vec<RequestKey>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT request_hash, method, url FROM entries
       WHERE store_name = ?
       ORDER BY url, method",
    )?;
    let rows = stmt
      .query_map(params![store], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(hash, method, url)| {
        let method = Method::parse(&method).ok_or_else(|| StoreError::Corrupt {
          store: store.to_string(),
          reason: format!("unknown method '{}'", method),
        })?;
        Ok(RequestKey::from_parts(hash, method, url))
      })
      .collect()
  }
}

/// Parse an RFC 3339 timestamp written by this module.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("failed to parse datetime '{}': {}", s, e))
}
