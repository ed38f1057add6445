//! Durable FIFO queue of submissions awaiting retry.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// A submission parked in the queue.
#[derive(Debug, Clone)]
pub struct QueuedSubmission {
  pub id: i64,
  pub payload: Vec<u8>,
  pub enqueued_at: DateTime<Utc>,
}

/// Trait for queue storage backends.
///
/// Ordering is FIFO by id. `remove` is idempotent: removing an id that is
/// already gone reports `false` rather than failing.
pub trait QueueStore: Send + Sync {
  /// Append a payload, returning its id.
  fn enqueue(&self, payload: &[u8]) -> Result<i64>;

  /// All queued submissions in enqueue order.
  fn pending(&self) -> Result<Vec<QueuedSubmission>>;

  /// Remove one submission. Returns whether it was still queued.
  fn remove(&self, id: i64) -> Result<bool>;

  fn len(&self) -> Result<usize>;

  fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

/// In-memory queue for tests.
#[derive(Default)]
pub struct MemoryQueue {
  entries: Mutex<Vec<QueuedSubmission>>,
  next_id: Mutex<i64>,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }
}

impl QueueStore for MemoryQueue {
  fn enqueue(&self, payload: &[u8]) -> Result<i64> {
    let mut next_id = self.next_id.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *next_id += 1;
    let id = *next_id;

    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push(QueuedSubmission {
        id,
        payload: payload.to_vec(),
        enqueued_at: Utc::now(),
      });

    Ok(id)
  }

  fn pending(&self) -> Result<Vec<QueuedSubmission>> {
    Ok(
      self
        .entries
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .clone(),
    )
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = entries.len();
    entries.retain(|entry| entry.id != id);
    Ok(entries.len() < before)
  }

  fn len(&self) -> Result<usize> {
    Ok(
      self
        .entries
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .len(),
    )
  }
}

/// SQLite-backed queue.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

/// Schema for the queue table.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload BLOB NOT NULL,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteQueue {
  /// Open the queue in the given database file, creating parents.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }
}

impl QueueStore for SqliteQueue {
  fn enqueue(&self, payload: &[u8]) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT INTO sync_queue (payload) VALUES (?)", params![payload])
      .map_err(|e| eyre!("Failed to enqueue submission: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn pending(&self) -> Result<Vec<QueuedSubmission>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT id, payload, enqueued_at FROM sync_queue ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare queue listing: {}", e))?;

    let entries = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, Vec<u8>>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list queue: {}", e))?
      .filter_map(|r| r.ok())
      .map(|(id, payload, enqueued_at)| {
        Ok(QueuedSubmission {
          id,
          payload,
          enqueued_at: parse_datetime(&enqueued_at)?,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(entries)
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove submission {}: {}", id, e))?;

    Ok(removed > 0)
  }

  fn len(&self) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
