//! Background sync: client actions queued while offline and replayed later.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::db::{parse_datetime, Database};
use crate::net::{Network, Request};

/// A client action waiting to be delivered.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSyncItem {
  pub id: i64,
  /// Absolute URL the payload is POSTed to
  pub endpoint: String,
  pub payload: serde_json::Value,
  pub synced: bool,
  pub attempts: u32,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Persistent store for pending items. Items are never deleted.
pub trait SyncStore: Send + Sync + 'static {
  fn enqueue(&self, endpoint: &Url, payload: &serde_json::Value) -> Result<i64>;

  /// Unsynced items in enqueue order.
  fn unsynced(&self) -> Result<Vec<PendingSyncItem>>;

  #[cfg(test)]
  fn get(&self, id: i64) -> Result<Option<PendingSyncItem>>;

  fn mark_synced(&self, id: i64) -> Result<()>;

  /// Record a failed replay. Returns the new attempt count.
  fn record_failure(&self, id: i64, error: &str) -> Result<u32>;

  fn pending_count(&self) -> Result<usize>;
}

/// SQLite-based sync store.
pub struct SqliteSyncStore {
  db: Database,
}

impl SqliteSyncStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

const SELECT_ITEM: &str =
  "SELECT id, endpoint, payload, synced, attempts, last_error, created_at FROM pending_sync";

type ItemRow = (i64, String, String, bool, u32, Option<String>, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
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

fn into_item(row: ItemRow) -> Result<PendingSyncItem> {
  let (id, endpoint, payload, synced, attempts, last_error, created_at) = row;
  Ok(PendingSyncItem {
    id,
    endpoint,
    payload: serde_json::from_str(&payload)
      .map_err(|e| eyre!("Failed to deserialize sync item {}: {}", id, e))?,
    synced,
    attempts,
    last_error,
    created_at: parse_datetime(&created_at)?,
  })
}

impl SyncStore for SqliteSyncStore {
  fn enqueue(&self, endpoint: &Url, payload: &serde_json::Value) -> Result<i64> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT INTO pending_sync (endpoint, payload) VALUES (?, ?)",
        params![endpoint.as_str(), payload.to_string()],
      )
      .map_err(|e| eyre!("Failed to queue sync item: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn unsynced(&self) -> Result<Vec<PendingSyncItem>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(&format!("{} WHERE synced = 0 ORDER BY id", SELECT_ITEM))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], read_row)
      .map_err(|e| eyre!("Failed to query sync items: {}", e))?
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read sync item: {}", e))?;

    rows.into_iter().map(into_item).collect()
  }

  #[cfg(test)]
  fn get(&self, id: i64) -> Result<Option<PendingSyncItem>> {
    use rusqlite::OptionalExtension;

    let conn = self.db.conn()?;
    let row = conn
      .query_row(&format!("{} WHERE id = ?", SELECT_ITEM), params![id], read_row)
      .optional()
      .map_err(|e| eyre!("Failed to look up sync item {}: {}", id, e))?;

    row.map(into_item).transpose()
  }

  fn mark_synced(&self, id: i64) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "UPDATE pending_sync SET synced = 1, last_error = NULL WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to mark sync item {} as synced: {}", id, e))?;
    Ok(())
  }

  fn record_failure(&self, id: i64, error: &str) -> Result<u32> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "UPDATE pending_sync SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![error, id],
      )
      .map_err(|e| eyre!("Failed to record failure for sync item {}: {}", id, e))?;

    conn
      .query_row(
        "SELECT attempts FROM pending_sync WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read attempts for sync item {}: {}", id, e))
  }

  fn pending_count(&self) -> Result<usize> {
    let count: i64 = self
      .db
      .conn()?
      .query_row(
        "SELECT COUNT(*) FROM pending_sync WHERE synced = 0",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count sync items: {}", e))?;
    Ok(count as usize)
  }
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub synced: usize,
  pub failed: usize,
}

/// Queue of pending client actions and their replay.
pub struct SyncQueue<Q: SyncStore> {
  store: Arc<Q>,
  network: Arc<dyn Network>,
  /// Failures from this attempt count on are logged as warnings
  warn_after_attempts: u32,
  /// Held for a whole replay pass so no item is delivered twice
  replay_lock: Arc<Mutex<()>>,
}

impl<Q: SyncStore> SyncQueue<Q> {
  pub fn new(store: Q, network: Arc<dyn Network>, warn_after_attempts: u32) -> Self {
    Self {
      store: Arc::new(store),
      network,
      warn_after_attempts,
      replay_lock: Arc::new(Mutex::new(())),
    }
  }

  pub fn store(&self) -> &Q {
    &self.store
  }

  pub fn enqueue(&self, endpoint: &Url, payload: &serde_json::Value) -> Result<i64> {
    let id = self.store.enqueue(endpoint, payload)?;
    info!("Queued message {} for {} until back online", id, endpoint);
    Ok(id)
  }

  /// POST every unsynced item in enqueue order.
  ///
  /// A 2xx marks the item synced; anything else leaves it for the next trigger.
  pub async fn replay(&self) -> Result<SyncReport> {
    let _pass = self.replay_lock.lock().await;
    let items = self.store.unsynced()?;
    let mut report = SyncReport::default();

    for item in items {
      match self.deliver(&item).await {
        Ok(()) => {
          self.store.mark_synced(item.id)?;
          report.synced += 1;
          debug!("Synced message {}", item.id);
        }
        Err(e) => {
          let attempts = self.store.record_failure(item.id, &e.to_string())?;
          report.failed += 1;
          if attempts >= self.warn_after_attempts {
            warn!(
              "Message {} still unsynced after {} attempts: {}",
              item.id, attempts, e
            );
          } else {
            debug!("Failed to sync message {}: {}", item.id, e);
          }
        }
      }
    }

    Ok(report)
  }

  async fn deliver(&self, item: &PendingSyncItem) -> Result<()> {
    let url = Url::parse(&item.endpoint)
      .map_err(|e| eyre!("Invalid sync endpoint {}: {}", item.endpoint, e))?;
    let request = Request::post_json(url, item.payload.to_string());

    let response = self.network.fetch(&request).await?;
    if !response.is_ok() {
      return Err(eyre!("Server answered {}", response.status));
    }
    Ok(())
  }
}

impl<Q: SyncStore> Clone for SyncQueue<Q> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      network: Arc::clone(&self.network),
      warn_after_attempts: self.warn_after_attempts,
      replay_lock: Arc::clone(&self.replay_lock),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::ScriptedNetwork;
  use serde_json::json;

  const ENDPOINT: &str = "http://localhost:8080/api/chat/messages";

  fn queue(network: Arc<ScriptedNetwork>) -> SyncQueue<SqliteSyncStore> {
    SyncQueue::new(
      SqliteSyncStore::new(Database::open_in_memory().unwrap()),
      network,
      3,
    )
  }

  #[tokio::test]
  async fn test_replay_in_enqueue_order() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond(ENDPOINT, 201, "{}");
    let queue = queue(network.clone());
    let endpoint = Url::parse(ENDPOINT).unwrap();

    let first = queue.enqueue(&endpoint, &json!({"text": "first"})).unwrap();
    let second = queue.enqueue(&endpoint, &json!({"text": "second"})).unwrap();

    let report = queue.replay().await.unwrap();

    assert_eq!(report, SyncReport { synced: 2, failed: 0 });
    let bodies: Vec<serde_json::Value> = network
      .bodies()
      .iter()
      .map(|b| serde_json::from_slice(b).unwrap())
      .collect();
    assert_eq!(bodies, vec![json!({"text": "first"}), json!({"text": "second"})]);
    assert!(queue.store().get(first).unwrap().unwrap().synced);
    assert!(queue.store().get(second).unwrap().unwrap().synced);
    assert_eq!(queue.store().pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_non_2xx_stays_pending() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond(ENDPOINT, 500, "oops");
    let queue = queue(network);

    let id = queue
      .enqueue(&Url::parse(ENDPOINT).unwrap(), &json!({"text": "hi"}))
      .unwrap();
    let report = queue.replay().await.unwrap();

    assert_eq!(report, SyncReport { synced: 0, failed: 1 });
    let item = queue.store().get(id).unwrap().unwrap();
    assert!(!item.synced);
    assert_eq!(item.attempts, 1);
    assert_eq!(item.last_error.as_deref(), Some("Server answered 500"));
  }

  #[tokio::test]
  async fn test_failed_item_retried_on_next_trigger() {
    let network = Arc::new(ScriptedNetwork::new());
    let queue = queue(network.clone());
    let id = queue
      .enqueue(&Url::parse(ENDPOINT).unwrap(), &json!({"text": "later"}))
      .unwrap();

    // Offline: nothing scripted for the endpoint
    for _ in 0..4 {
      queue.replay().await.unwrap();
    }
    assert_eq!(queue.store().get(id).unwrap().unwrap().attempts, 4);

    network.respond(ENDPOINT, 200, "{}");
    let report = queue.replay().await.unwrap();

    assert_eq!(report.synced, 1);
    let item = queue.store().get(id).unwrap().unwrap();
    assert!(item.synced);
    assert!(item.last_error.is_none());
  }

  #[tokio::test]
  async fn test_overlapping_replays_deliver_once() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond(ENDPOINT, 200, "{}");
    let queue = queue(network.clone());
    let endpoint = Url::parse(ENDPOINT).unwrap();
    queue.enqueue(&endpoint, &json!({"n": 1})).unwrap();
    queue.enqueue(&endpoint, &json!({"n": 2})).unwrap();

    let (a, b) = tokio::join!(queue.replay(), queue.replay());

    assert_eq!(a.unwrap().synced + b.unwrap().synced, 2);
    assert_eq!(network.calls().len(), 2);
  }

  #[tokio::test]
  async fn test_synced_items_are_kept_but_not_replayed() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond(ENDPOINT, 200, "{}");
    let queue = queue(network.clone());
    queue
      .enqueue(&Url::parse(ENDPOINT).unwrap(), &json!({"n": 1}))
      .unwrap();

    queue.replay().await.unwrap();
    let report = queue.replay().await.unwrap();

    assert_eq!(report, SyncReport::default());
    assert_eq!(network.calls().len(), 1);
    assert!(queue.store().get(1).unwrap().is_some());
  }
}
