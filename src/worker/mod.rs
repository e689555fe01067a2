//! The worker: lifecycle, request routing and the background event handlers.

mod clients;
mod lifecycle;
mod message;
mod periodic;
mod push;
mod router;
mod sync;

pub use clients::{Clients, WindowClients};
pub use lifecycle::LifecycleState;
pub use message::{ClientMessage, WorkerReply};
pub use push::{ClickOutcome, LogSurface, NotificationClick, NotificationIntent, NotificationSurface};
pub use router::{RequestClass, Route, RoutePolicy, Strategy};
pub use sync::{SqliteSyncStore, SyncQueue, SyncReport, SyncStore};

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{
  CacheKey, CacheLayer, CacheRegistry, Partition, ResponseSource, Served, SqliteStorage,
};
use crate::config::{Config, PushConfig};
use crate::db::Database;
use crate::event::{EventOutcome, WorkerEvent};
use crate::net::{Network, Request, Response};

/// Values resolved from the config once, at construction.
struct Settings {
  origin: Url,
  manifest: Vec<Url>,
  chat_endpoint: Url,
  sync_tag: String,
  periodic_tag: String,
  resource_url: Url,
  push: PushConfig,
}

struct WorkerState {
  lifecycle: LifecycleState,
  /// Activate as soon as install completes
  skip_waiting: bool,
}

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
  pub lifecycle: String,
  pub caches: Vec<String>,
  pub pending_sync: usize,
}

#[derive(Clone)]
pub struct Worker {
  layer: CacheLayer<SqliteStorage>,
  policy: RoutePolicy,
  sync: SyncQueue<SqliteSyncStore>,
  surface: Arc<dyn NotificationSurface>,
  clients: Arc<dyn Clients>,
  settings: Arc<Settings>,
  state: Arc<Mutex<WorkerState>>,
}

impl Worker {
  pub fn new(
    config: &Config,
    db: Database,
    network: Arc<dyn Network>,
    surface: Arc<dyn NotificationSurface>,
    clients: Arc<dyn Clients>,
  ) -> Result<Self> {
    let settings = Settings {
      origin: config.origin_url()?,
      manifest: config.manifest_urls()?,
      chat_endpoint: config.resolve(&config.sync.chat_endpoint)?,
      sync_tag: config.sync.tag.clone(),
      periodic_tag: config.periodic.tag.clone(),
      resource_url: config.resolve(&config.periodic.resource_path)?,
      push: config.push.clone(),
    };

    let registry = CacheRegistry::new(SqliteStorage::new(db.clone()), config.partition_names());
    let offline_page = CacheKey::get(&config.resolve(&config.cache.offline_page)?);
    let layer = CacheLayer::new(registry, Arc::clone(&network), offline_page);

    let policy = RoutePolicy::new(
      config.cache.api_prefixes.clone(),
      config.cache.static_extensions.clone(),
    );
    let sync = SyncQueue::new(
      SqliteSyncStore::new(db),
      network,
      config.sync.warn_after_attempts,
    );

    Ok(Self {
      layer,
      policy,
      sync,
      surface,
      clients,
      settings: Arc::new(settings),
      state: Arc::new(Mutex::new(WorkerState {
        lifecycle: LifecycleState::Parsed,
        skip_waiting: config.skip_waiting,
      })),
    })
  }

  pub fn origin(&self) -> &Url {
    &self.settings.origin
  }

  pub fn lifecycle(&self) -> LifecycleState {
    self.state().lifecycle
  }

  fn state(&self) -> MutexGuard<'_, WorkerState> {
    // State is plain data, a panic elsewhere cannot leave it half-written
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_lifecycle(&self, lifecycle: LifecycleState) {
    info!("Worker {}", lifecycle);
    self.state().lifecycle = lifecycle;
  }

  /// Handle one event. Never fails: errors come back as `EventOutcome::Failed`.
  pub async fn dispatch(&self, event: WorkerEvent) -> EventOutcome {
    match event {
      WorkerEvent::Install => self.install().await,
      WorkerEvent::Activate => self.activate(),
      WorkerEvent::Fetch(request) => self.fetch(request).await,
      WorkerEvent::Sync { tag } => self.sync(&tag).await,
      WorkerEvent::PeriodicSync { tag } => self.periodic_sync(&tag).await,
      WorkerEvent::Push(data) => self.push(data),
      WorkerEvent::NotificationClick(click) => self.notification_click(click),
      WorkerEvent::Message(message) => self.message(message).await,
    }
  }

  async fn install(&self) -> EventOutcome {
    self.set_lifecycle(LifecycleState::Installing);

    match lifecycle::install(&self.layer, &self.settings.manifest).await {
      Ok(count) => {
        info!("Precached {} assets", count);
        self.set_lifecycle(LifecycleState::Installed);
        if self.state().skip_waiting {
          self.activate()
        } else {
          info!("Waiting for SKIP_WAITING before activating");
          EventOutcome::Completed
        }
      }
      Err(e) if self.has_current_precache() => {
        // Same version already installed by an earlier run: keep serving it
        warn!("Install failed, serving the existing precache: {}", e);
        self.set_lifecycle(LifecycleState::Installed);
        self.activate()
      }
      Err(e) => {
        error!("Install failed: {}", e);
        self.set_lifecycle(LifecycleState::Redundant);
        EventOutcome::Failed(e.to_string())
      }
    }
  }

  fn has_current_precache(&self) -> bool {
    let name = &self.layer.registry().names_of_current().static_name;
    match self.layer.registry().names() {
      Ok(names) => names.contains(name),
      Err(e) => {
        warn!("Failed to list caches: {}", e);
        false
      }
    }
  }

  fn activate(&self) -> EventOutcome {
    let current = self.lifecycle();
    if !matches!(current, LifecycleState::Installed | LifecycleState::Activated) {
      warn!("Cannot activate a worker that is {}", current);
      return EventOutcome::Failed(format!("Worker is {}", current));
    }

    self.set_lifecycle(LifecycleState::Activating);
    match lifecycle::activate(&self.layer) {
      Ok(deleted) => {
        debug!("Collected {} old partitions", deleted.len());
        self.set_lifecycle(LifecycleState::Activated);
        EventOutcome::Completed
      }
      Err(e) => {
        // Old partitions only waste space; keep serving
        warn!("Cache cleanup failed: {}", e);
        self.set_lifecycle(LifecycleState::Activated);
        EventOutcome::Failed(e.to_string())
      }
    }
  }

  async fn fetch(&self, request: Request) -> EventOutcome {
    if !self.lifecycle().can_intercept_fetch() {
      return EventOutcome::PassThrough(request);
    }

    match self.policy.route(&request) {
      Route::PassThrough => EventOutcome::PassThrough(request),
      Route::Intercept { class, strategy } => {
        if class == RequestClass::Navigation {
          self.clients.track(request.url.as_str());
        }

        let served = match strategy {
          Strategy::CacheFirst => self.layer.cache_first(&request).await,
          Strategy::NetworkFirst => self.layer.network_first(&request).await,
        };
        match served.source {
          ResponseSource::OfflinePage | ResponseSource::Synthetic => info!(
            "{} {} unavailable, served {}",
            request.method,
            request.url,
            served.source.as_str()
          ),
          ResponseSource::Network | ResponseSource::Cache => debug!(
            "{} {} served from {}",
            request.method,
            request.url,
            served.source.as_str()
          ),
        }
        EventOutcome::Respond(served)
      }
    }
  }

  /// Send a request the worker does not intercept straight to the network.
  ///
  /// A chat message that cannot be delivered is queued for background sync
  /// and answered with 202.
  pub async fn forward(&self, request: Request) -> Served {
    let e = match self.layer.network().fetch(&request).await {
      Ok(response) => return Served::from_network(response),
      Err(e) => e,
    };

    if let Some(payload) = self.queueable_payload(&request) {
      match self.sync.enqueue(&request.url, &payload) {
        Ok(id) => {
          let body = serde_json::json!({ "queued": true, "id": id });
          return Served::synthetic(
            Response::new(202, body.to_string()).with_header("content-type", "application/json"),
          );
        }
        Err(e) => error!("Failed to queue message: {}", e),
      }
    }

    debug!("Pass-through failed for {}: {}", request.url, e);
    Served::synthetic(
      Response::new(502, "Upstream unreachable").with_header("content-type", "text/plain"),
    )
  }

  fn queueable_payload(&self, request: &Request) -> Option<serde_json::Value> {
    if request.method != Method::POST || request.url != self.settings.chat_endpoint {
      return None;
    }
    let body = request.body.as_ref()?;
    serde_json::from_slice(body).ok()
  }

  async fn sync(&self, tag: &str) -> EventOutcome {
    if tag != self.settings.sync_tag {
      debug!("Ignoring sync tag {}", tag);
      return EventOutcome::Ignored;
    }

    match self.sync.replay().await {
      Ok(report) => {
        info!("Sync: {} delivered, {} pending", report.synced, report.failed);
        EventOutcome::Synced(report)
      }
      Err(e) => {
        error!("Sync failed: {}", e);
        EventOutcome::Failed(e.to_string())
      }
    }
  }

  async fn periodic_sync(&self, tag: &str) -> EventOutcome {
    if tag != self.settings.periodic_tag {
      debug!("Ignoring periodic sync tag {}", tag);
      return EventOutcome::Ignored;
    }

    match periodic::refresh_resources(
      &self.layer,
      self.surface.as_ref(),
      &self.settings.resource_url,
      &self.settings.push,
    )
    .await
    {
      Ok(_) => EventOutcome::Completed,
      Err(e) => {
        warn!("Failed to update resources: {}", e);
        EventOutcome::Failed(e.to_string())
      }
    }
  }

  fn push(&self, data: Option<Bytes>) -> EventOutcome {
    let mut intent = NotificationIntent::from_push(data.as_deref(), &self.settings.push);
    intent.target_url = self.absolute(&intent.target_url);

    match self.surface.show(&intent) {
      Ok(()) => EventOutcome::Notified(intent),
      Err(e) => {
        error!("Failed to show notification: {}", e);
        EventOutcome::Failed(e.to_string())
      }
    }
  }

  fn notification_click(&self, mut click: NotificationClick) -> EventOutcome {
    click.url = click.url.map(|url| self.absolute(&url));
    let default_url = self.absolute(&self.settings.push.url);

    match push::handle_click(self.clients.as_ref(), &click, &default_url) {
      Ok(outcome) => EventOutcome::Clicked(outcome),
      Err(e) => {
        error!("Notification click failed: {}", e);
        EventOutcome::Failed(e.to_string())
      }
    }
  }

  async fn message(&self, message: ClientMessage) -> EventOutcome {
    match message {
      ClientMessage::SkipWaiting => {
        let installed = {
          let mut state = self.state();
          state.skip_waiting = true;
          state.lifecycle == LifecycleState::Installed
        };
        if installed {
          self.activate();
        }
        EventOutcome::Reply(None)
      }
      ClientMessage::GetCacheInfo => match self.layer.registry().names() {
        Ok(cache_names) => EventOutcome::Reply(Some(WorkerReply::CacheInfo { cache_names })),
        Err(e) => EventOutcome::Failed(e.to_string()),
      },
      ClientMessage::ClearCache => {
        let name = self.layer.registry().names_of_current().static_name.clone();
        match self.layer.registry().delete(&name) {
          Ok(true) => info!("Cleared cache {}", name),
          Ok(false) => debug!("Cache {} already empty", name),
          Err(e) => error!("Failed to clear cache {}: {}", name, e),
        }
        EventOutcome::Reply(Some(WorkerReply::CacheCleared))
      }
      ClientMessage::UpdateAssets { urls } => {
        for url in urls {
          if let Err(e) = self.update_asset(&url).await {
            warn!("Failed to update asset {}: {}", url, e);
          }
        }
        EventOutcome::Reply(None)
      }
    }
  }

  async fn update_asset(&self, url: &str) -> Result<()> {
    let url = self
      .settings
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL: {}", e))?;

    let stored = self
      .layer
      .refresh(Partition::Static, &Request::get(url))
      .await?;
    if !stored {
      return Err(eyre!("Server did not answer with a 2xx"));
    }
    Ok(())
  }

  fn absolute(&self, url: &str) -> String {
    self
      .settings
      .origin
      .join(url)
      .map(String::from)
      .unwrap_or_else(|_| url.to_string())
  }

  pub fn status(&self) -> Result<WorkerStatus> {
    Ok(WorkerStatus {
      lifecycle: self.lifecycle().to_string(),
      caches: self.layer.registry().names()?,
      pending_sync: self.sync.store().pending_count()?,
    })
  }
}
