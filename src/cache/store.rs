//! Cache store trait and its in-memory and SQLite backends.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use super::key::RequestKey;
use super::response::StoredResponse;

/// Trait for cache storage backends.
///
/// A store is partitioned into named generations; every operation is an
/// atomic single-key access within one generation. Reads against a deleted
/// generation are misses, not errors.
pub trait CacheStore: Send + Sync {
  /// Ensure a generation exists, creating it empty if absent.
  fn open(&self, generation: &str) -> Result<()>;

  /// Look up an entry. `None` both for unknown keys and unknown generations.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<StoredResponse>>;

  /// Insert or replace an entry, creating the generation if needed.
  fn put(&self, generation: &str, key: &RequestKey, response: &StoredResponse) -> Result<()>;

  /// Remove a single entry. Returns whether anything was removed.
  fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool>;

  /// URLs of every entry in a generation, for enumeration-style refreshes.
  fn urls(&self, generation: &str) -> Result<Vec<String>>;

  /// Names of all existing generations.
  fn generations(&self) -> Result<Vec<String>>;

  /// Number of entries in a generation (0 if it does not exist).
  fn entry_count(&self, generation: &str) -> Result<usize>;

  /// Drop a whole generation and its entries. Returns whether it existed.
  fn delete_generation(&self, generation: &str) -> Result<bool>;
}

/// In-memory store, used in tests and as the unit-testing fake.
#[derive(Default)]
pub struct MemoryStore {
  caches: RwLock<HashMap<String, HashMap<String, StoredResponse>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock_err<T>(_: T) -> color_eyre::Report {
    eyre!("memory store lock poisoned")
  }
}

impl CacheStore for MemoryStore {
  fn open(&self, generation: &str) -> Result<()> {
    let mut caches = self.caches.write().map_err(Self::lock_err)?;
    caches.entry(generation.to_string()).or_default();
    Ok(())
  }

  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let caches = self.caches.read().map_err(Self::lock_err)?;
    Ok(
      caches
        .get(generation)
        .and_then(|entries| entries.get(&key.canonical()))
        .cloned(),
    )
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let mut caches = self.caches.write().map_err(Self::lock_err)?;
    caches
      .entry(generation.to_string())
      .or_default()
      .insert(key.canonical(), response.clone());
    Ok(())
  }

  fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool> {
    let mut caches = self.caches.write().map_err(Self::lock_err)?;
    Ok(
      caches
        .get_mut(generation)
        .map(|entries| entries.remove(&key.canonical()).is_some())
        .unwrap_or(false),
    )
  }

  fn urls(&self, generation: &str) -> Result<Vec<String>> {
    let caches = self.caches.read().map_err(Self::lock_err)?;
    let mut urls: Vec<String> = caches
      .get(generation)
      .map(|entries| {
        entries
          .keys()
          .filter_map(|canonical| canonical.split_once(' ').map(|(_, url)| url.to_string()))
          .collect()
      })
      .unwrap_or_default();
    urls.sort();
    Ok(urls)
  }

  fn generations(&self) -> Result<Vec<String>> {
    let caches = self.caches.read().map_err(Self::lock_err)?;
    let mut names: Vec<String> = caches.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let caches = self.caches.read().map_err(Self::lock_err)?;
    Ok(caches.get(generation).map(HashMap::len).unwrap_or(0))
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut caches = self.caches.write().map_err(Self::lock_err)?;
    Ok(caches.remove(generation).is_some())
  }
}

/// SQLite-based cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Generation registry (kept separate so empty generations survive)
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- URL -> response snapshots, partitioned by generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation
    ON cache_entries(generation);
"#;

impl SqliteStore {
  /// Open the store at the default location under the user data dir.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the store at an explicit path, creating parent directories.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("mtsw").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheStore for SqliteStore {
  fn open(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to open generation {}: {}", generation, e))?;

    Ok(())
  }

  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT data FROM cache_entries
         WHERE generation = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare lookup: {}", e))?;

    let data: Option<Vec<u8>> = stmt
      .query_row(params![generation, key.storage_hash()], |row| row.get(0))
      .ok();

    match data {
      Some(data) => {
        let response: StoredResponse = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached response: {}", e))?;
        Ok(Some(response))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data = serde_json::to_vec(response)
      .map_err(|e| eyre!("Failed to serialize response: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to register generation {}: {}", generation, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (generation, request_key, url, data, stored_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![generation, key.storage_hash(), key.url(), data],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", key.url(), e))?;

    Ok(())
  }

  fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE generation = ? AND request_key = ?",
        params![generation, key.storage_hash()],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;

    Ok(removed > 0)
  }

  fn urls(&self, generation: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE generation = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare url listing: {}", e))?;

    let urls = stmt
      .query_map(params![generation], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list urls: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(urls)
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare generation listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as usize)
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;

    let removed = conn
      .execute("DELETE FROM generations WHERE name = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    Ok(removed > 0)
  }
}
