//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::traits::{CachedResponse, RequestKey};
use crate::network::{Response, ResponseType};

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores, each mapping request
/// identity to a response.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  fn has_store(&self, name: &str) -> Result<bool>;

  /// Store names in creation order.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and all of its entries. Returns false if it did not exist.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Insert or replace an entry, creating the store if needed.
  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Insert or replace an entry only if the store still exists.
  ///
  /// The existence check and the write happen atomically, so an entry can
  /// never resurrect a store deleted concurrently.
  fn put_existing(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Look up an entry in one store.
  fn match_in(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Look up an entry across all stores, oldest store first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>>;

  fn entry_count(&self, store: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) a storage database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Storage that lives only as long as the process.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn write_entry(
    &self,
    store: &str,
    key: &RequestKey,
    response: &Response,
    create_store: bool,
  ) -> Result<()> {
    let mut conn = self.lock()?;
    let headers = serde_json::to_vec(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    if create_store {
      tx.execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", store, e))?;
    } else {
      let exists: Option<i64> = tx
        .query_row(
          "SELECT 1 FROM cache_stores WHERE name = ?",
          params![store],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| eyre!("Failed to look up cache store {}: {}", store, e))?;
      if exists.is_none() {
        return Err(eyre!("Cache store {} does not exist", store));
      }
    }

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (store_name, request_key, method, url, response_url, status, response_type, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        store,
        key.cache_hash(),
        key.method().as_str(),
        key.url().as_str(),
        response.url.as_str(),
        response.status,
        response.response_type.as_str(),
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named cache store (generation)
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses keyed by request hash
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(request_key);
"#;

const ENTRY_COLUMNS: &str =
  "e.store_name, e.response_url, e.status, e.response_type, e.headers, e.body, e.cached_at";

/// Raw entry row before decoding.
type EntryRow = (String, String, u16, String, Vec<u8>, Vec<u8>, String);

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
    row.get(6)?,
  ))
}

fn decode_entry(row: EntryRow) -> Result<CachedResponse> {
  let (store, response_url, status, response_type, headers, body, cached_at) = row;

  let url = Url::parse(&response_url)
    .map_err(|e| eyre!("Failed to parse cached URL '{}': {}", response_url, e))?;
  let response_type = ResponseType::parse(&response_type)
    .ok_or_else(|| eyre!("Unknown cached response type '{}'", response_type))?;
  let headers: Vec<(String, String)> = serde_json::from_slice(&headers)
    .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;

  Ok(CachedResponse {
    response: Response {
      url,
      status,
      headers,
      body,
      response_type,
    },
    store,
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;

    Ok(())
  }

  fn has_store(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache store {}: {}", name, e))?;

    Ok(found.is_some())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.write_entry(store, key, response, true)
  }

  fn put_existing(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.write_entry(store, key, response, false)
  }

  fn match_in(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries e WHERE e.store_name = ? AND e.request_key = ?",
          ENTRY_COLUMNS
        ),
        params![store, key.cache_hash()],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, store, e))?;

    row.map(decode_entry).transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries e
           INNER JOIN cache_stores s ON s.name = e.store_name
           WHERE e.request_key = ?
           ORDER BY s.rowid
           LIMIT 1",
          ENTRY_COLUMNS
        ),
        params![key.cache_hash()],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(decode_entry).transpose()
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store_name = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", store, e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
