//! Cache storage trait and SQLite implementation.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::traits::CacheKey;
use crate::db::{parse_datetime, Database};
use crate::net::{Headers, Response};

/// A single stored response.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create a partition if it does not exist yet.
  fn create_partition(&self, name: &str) -> Result<()>;

  /// All partition names, oldest first.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Store a response, replacing any previous entry for the key.
  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Create the partition and store every entry, or nothing at all.
  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  /// Look a key up in one partition.
  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<StoredEntry>>;

  /// Look a key up across all partitions, oldest partition first.
  fn find(&self, key: &CacheKey) -> Result<Option<(String, StoredEntry)>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

const INSERT_PARTITION: &str = "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)";

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO cache_entries
     (partition, key_hash, request_key, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, datetime('now'))";

fn encode_headers(headers: &Headers) -> Result<String> {
  serde_json::to_string(headers).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

fn decode_entry(status: u16, headers: &str, body: Vec<u8>, cached_at: &str) -> Result<StoredEntry> {
  let headers: Headers =
    serde_json::from_str(headers).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  Ok(StoredEntry {
    response: Response {
      status,
      headers,
      body: Bytes::from(body),
    },
    cached_at: parse_datetime(cached_at)?,
  })
}

type EntryRow = (u16, String, Vec<u8>, String);

impl CacheStorage for SqliteStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(INSERT_PARTITION, params![name])
      .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;
    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let deleted = self
      .db
      .conn()?
      .execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;
    Ok(deleted > 0)
  }

  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let headers = encode_headers(&response.headers)?;
    let conn = self.db.conn()?;

    conn
      .execute(INSERT_PARTITION, params![partition])
      .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

    conn
      .execute(
        UPSERT_ENTRY,
        params![
          partition,
          key.cache_hash(),
          key.to_string(),
          response.status,
          headers,
          response.body.as_ref()
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_PARTITION, params![partition])
      .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

    for (key, response) in entries {
      let headers = encode_headers(&response.headers)?;
      tx.execute(
        UPSERT_ENTRY,
        params![
          partition,
          key.cache_hash(),
          key.to_string(),
          response.status,
          headers,
          response.body.as_ref()
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;
    }

    // Dropping the transaction without commit rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<StoredEntry>> {
    let conn = self.db.conn()?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE partition = ? AND key_hash = ?",
        params![partition, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        decode_entry(status, &headers, body, &cached_at).map(Some)
      }
      None => Ok(None),
    }
  }

  fn find(&self, key: &CacheKey) -> Result<Option<(String, StoredEntry)>> {
    let conn = self.db.conn()?;

    let row: Option<(String, EntryRow)> = conn
      .query_row(
        "SELECT e.partition, e.status, e.headers, e.body, e.cached_at
         FROM cache_entries e
         INNER JOIN cache_partitions p ON p.name = e.partition
         WHERE e.key_hash = ?
         ORDER BY p.id
         LIMIT 1",
        params![key.cache_hash()],
        |row| {
          Ok((
            row.get(0)?,
            (row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?),
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some((partition, (status, headers, body, cached_at))) => {
        let entry = decode_entry(status, &headers, body, &cached_at)?;
        Ok(Some((partition, entry)))
      }
      None => Ok(None),
    }
  }
}
