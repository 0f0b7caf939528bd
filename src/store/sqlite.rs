//! SQLite implementation of [`LocalStore`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{LocalStore, Mutation, QueueId, QueuedMutation};
use crate::entity::EntityKind;

/// Schema for the cache and queue tables.
const SCHEMA: &str = r#"
-- Cached collection snapshots (serialized JSON, one row per record)
CREATE TABLE IF NOT EXISTS cached_records (
    entity_kind TEXT NOT NULL,
    position INTEGER NOT NULL,
    record_id TEXT,
    data BLOB NOT NULL,
    PRIMARY KEY (entity_kind, position)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_cached_records_id
    ON cached_records(entity_kind, record_id) WHERE record_id IS NOT NULL;

-- Last replacement time per collection
CREATE TABLE IF NOT EXISTS collection_meta (
    entity_kind TEXT PRIMARY KEY,
    refreshed_at TEXT NOT NULL
);

-- Pending writes, replayed in id order
CREATE TABLE IF NOT EXISTS offline_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    method TEXT NOT NULL,
    body TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL
);
"#;

/// SQLite-backed local store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at `path`, creating parent directories.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a throwaway in-memory store.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  /// Default database location under the user's data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("crm-offline").join("offline.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl LocalStore for SqliteStore {
  fn replace_collection(&self, kind: EntityKind, records: &[Value]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cached_records WHERE entity_kind = ?",
      params![kind.as_str()],
    )
    .map_err(|e| eyre!("Failed to clear cached {}: {}", kind, e))?;

    for (position, record) in records.iter().enumerate() {
      let data =
        serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

      // Same id twice in one payload: the later record wins
      tx.execute(
        "INSERT OR REPLACE INTO cached_records (entity_kind, position, record_id, data)
         VALUES (?, ?, ?, ?)",
        params![kind.as_str(), position as i64, record_id(record), data],
      )
      .map_err(|e| eyre!("Failed to store cached {} record: {}", kind, e))?;
    }

    tx.execute(
      "INSERT OR REPLACE INTO collection_meta (entity_kind, refreshed_at) VALUES (?, ?)",
      params![kind.as_str(), Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to update collection metadata: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn read_collection(&self, kind: EntityKind) -> Result<Vec<Value>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT data FROM cached_records WHERE entity_kind = ? ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<Vec<u8>> = stmt
      .query_map(params![kind.as_str()], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query cached {}: {}", kind, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read cached {}: {}", kind, e))?;

    rows
      .iter()
      .map(|data| {
        serde_json::from_slice(data)
          .map_err(|e| eyre!("Failed to deserialize cached {} record: {}", kind, e))
      })
      .collect()
  }

  fn refreshed_at(&self, kind: EntityKind) -> Result<Option<DateTime<Utc>>> {
    let conn = self.lock()?;

    let refreshed: Option<String> = conn
      .query_row(
        "SELECT refreshed_at FROM collection_meta WHERE entity_kind = ?",
        params![kind.as_str()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query collection metadata: {}", e))?;

    refreshed
      .map(|s| {
        DateTime::parse_from_rfc3339(&s)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
      })
      .transpose()
  }

  fn enqueue(&self, mutation: &Mutation) -> Result<QueueId> {
    let conn = self.lock()?;
    let body = serde_json::to_string(&mutation.body)
      .map_err(|e| eyre!("Failed to serialize queued body: {}", e))?;

    conn
      .execute(
        "INSERT INTO offline_queue (path, method, body, enqueued_at) VALUES (?, ?, ?, ?)",
        params![
          mutation.path,
          mutation.method.as_str(),
          body,
          mutation.enqueued_at.timestamp_millis()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue {} {}: {}", mutation.method, mutation.path, e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list_queue(&self) -> Result<Vec<QueuedMutation>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT id, path, method, body, enqueued_at FROM offline_queue ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(QueueId, String, String, String, i64)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(|e| eyre!("Failed to query offline queue: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read offline queue: {}", e))?;

    rows
      .into_iter()
      .map(|(id, path, method, body, enqueued_at)| -> Result<QueuedMutation> {
        let body = serde_json::from_str(&body)
          .map_err(|e| eyre!("Failed to deserialize queued body {}: {}", id, e))?;
        let enqueued_at = DateTime::from_timestamp_millis(enqueued_at)
          .ok_or_else(|| eyre!("Invalid enqueue time on queued entry {}", id))?;

        Ok(QueuedMutation {
          id,
          mutation: Mutation {
            path,
            method: method.parse()?,
            body,
            enqueued_at,
          },
        })
      })
      .collect()
  }

  fn queue_len(&self) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM offline_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count offline queue: {}", e))?;

    Ok(count as usize)
  }

  fn remove_queued(&self, id: QueueId) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("DELETE FROM offline_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued entry {}: {}", id, e))?;

    Ok(())
  }
}

/// The record's `id` as JSON text, so `5` and `"5"` stay distinct.
fn record_id(record: &Value) -> Option<String> {
  match record.get("id")? {
    id @ (Value::Number(_) | Value::String(_)) => Some(id.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MutationMethod;
  use serde_json::json;

  fn store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
  }

  #[test]
  fn test_read_never_populated_is_empty() {
    let store = store();
    assert!(store.read_collection(EntityKind::Lead).unwrap().is_empty());
    assert!(store.refreshed_at(EntityKind::Lead).unwrap().is_none());
  }

  #[test]
  fn test_replace_is_total() {
    let store = store();
    store
      .replace_collection(
        EntityKind::Lead,
        &[
          json!({"id": 1, "name": "Acme"}),
          json!({"id": 2, "name": "Globex"}),
          json!({"id": 3, "name": "Initech"}),
        ],
      )
      .unwrap();

    store
      .replace_collection(EntityKind::Lead, &[json!({"id": 9, "name": "Hooli"})])
      .unwrap();

    assert_eq!(
      store.read_collection(EntityKind::Lead).unwrap(),
      vec![json!({"id": 9, "name": "Hooli"})]
    );
    assert!(store.refreshed_at(EntityKind::Lead).unwrap().is_some());
  }

  #[test]
  fn test_replace_with_empty_clears() {
    let store = store();
    store
      .replace_collection(EntityKind::Client, &[json!({"id": 1})])
      .unwrap();
    store.replace_collection(EntityKind::Client, &[]).unwrap();

    assert!(store.read_collection(EntityKind::Client).unwrap().is_empty());
    assert!(store.refreshed_at(EntityKind::Client).unwrap().is_some());
  }

  #[test]
  fn test_collections_are_isolated_by_kind() {
    let store = store();
    store
      .replace_collection(EntityKind::Lead, &[json!({"id": 1, "name": "lead"})])
      .unwrap();
    store
      .replace_collection(EntityKind::Project, &[json!({"id": 1, "project_name": "p"})])
      .unwrap();
    store.replace_collection(EntityKind::Project, &[]).unwrap();

    assert_eq!(store.read_collection(EntityKind::Lead).unwrap().len(), 1);
    assert!(store.read_collection(EntityKind::Project).unwrap().is_empty());
  }

  #[test]
  fn test_replace_keeps_payload_order_and_dedupes_ids() {
    let store = store();
    store
      .replace_collection(
        EntityKind::Interaction,
        &[
          json!({"id": 5, "summary": "first"}),
          json!({"summary": "no id"}),
          json!({"id": 5, "summary": "second"}),
          json!({"id": "x-1", "summary": "string id"}),
        ],
      )
      .unwrap();

    let records = store.read_collection(EntityKind::Interaction).unwrap();
    let summaries: Vec<&str> = records
      .iter()
      .map(|r| r["summary"].as_str().unwrap())
      .collect();
    assert_eq!(summaries, vec!["no id", "second", "string id"]);
  }

  #[test]
  fn test_numeric_and_string_ids_are_distinct() {
    let store = store();
    store
      .replace_collection(
        EntityKind::Client,
        &[json!({"id": 5, "name": "number"}), json!({"id": "5", "name": "string"})],
      )
      .unwrap();

    assert_eq!(
      store.read_collection(EntityKind::Client).unwrap(),
      vec![
        json!({"id": 5, "name": "number"}),
        json!({"id": "5", "name": "string"})
      ]
    );
  }

  #[test]
  fn test_queue_preserves_insertion_order() {
    let store = store();
    let a = store
      .enqueue(&Mutation::new("/leads/", MutationMethod::Post, json!({"name": "A"})))
      .unwrap();
    let b = store
      .enqueue(&Mutation::new("/leads/1", MutationMethod::Put, json!({"name": "B"})))
      .unwrap();
    let c = store
      .enqueue(&Mutation::new("/leads/1", MutationMethod::Delete, json!({})))
      .unwrap();

    assert!(a < b && b < c);

    let queue = store.list_queue().unwrap();
    let ids: Vec<QueueId> = queue.iter().map(|q| q.id).collect();
    assert_eq!(ids, vec![a, b, c]);
    assert_eq!(queue[1].mutation.method, MutationMethod::Put);
    assert_eq!(queue[1].mutation.body, json!({"name": "B"}));
    assert_eq!(store.queue_len().unwrap(), 3);
  }

  #[test]
  fn test_remove_queued() {
    let store = store();
    let a = store
      .enqueue(&Mutation::new("/leads/", MutationMethod::Post, json!({})))
      .unwrap();
    let b = store
      .enqueue(&Mutation::new("/clients/", MutationMethod::Post, json!({})))
      .unwrap();

    store.remove_queued(a).unwrap();
    // Unknown ids are ignored
    store.remove_queued(a).unwrap();

    let queue = store.list_queue().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, b);
  }

  #[test]
  fn test_queue_ids_are_not_reused() {
    let store = store();
    let a = store
      .enqueue(&Mutation::new("/leads/", MutationMethod::Post, json!({})))
      .unwrap();
    store.remove_queued(a).unwrap();

    let b = store
      .enqueue(&Mutation::new("/leads/", MutationMethod::Post, json!({})))
      .unwrap();
    assert!(b > a);
  }

  #[test]
  fn test_enqueue_time_survives_storage() {
    let store = store();
    let mutation = Mutation::new("/projects/", MutationMethod::Post, json!({"x": 1}));
    store.enqueue(&mutation).unwrap();

    let stored = &store.list_queue().unwrap()[0].mutation;
    assert_eq!(
      stored.enqueued_at.timestamp_millis(),
      mutation.enqueued_at.timestamp_millis()
    );
  }

  #[test]
  fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("offline.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      store
        .replace_collection(EntityKind::Lead, &[json!({"id": 1, "name": "Acme"})])
        .unwrap();
      store
        .enqueue(&Mutation::new("/leads/", MutationMethod::Post, json!({"name": "Acme"})))
        .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(
      store.read_collection(EntityKind::Lead).unwrap(),
      vec![json!({"id": 1, "name": "Acme"})]
    );
    let queue = store.list_queue().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].mutation.path, "/leads/");
  }
}
