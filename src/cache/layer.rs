//! Cache layer that orchestrates caching strategies with network fetching.

use chrono::{SecondsFormat, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::registry::CacheRegistry;
use super::storage::CacheStorage;
use super::traits::{CacheKey, Partition, Served};
use crate::net::{Network, Request, Response};

const OFFLINE_DOCUMENT: &str = "<!DOCTYPE html>
<html lang=\"en\">
<head><meta charset=\"utf-8\"><title>Offline</title></head>
<body><h1>You are offline</h1><p>Please check your internet connection and try again.</p></body>
</html>
";

/// Cache layer that manages caching strategies and network fetching.
///
/// This layer sits between the pages and the network, serving from the
/// registry's partitions and turning network failures into fallbacks.
pub struct CacheLayer<S: CacheStorage> {
  registry: CacheRegistry<S>,
  network: Arc<dyn Network>,
  /// Key of the offline fallback document
  offline_page: CacheKey,
}

impl<S: CacheStorage> CacheLayer<S> {
  pub fn new(registry: CacheRegistry<S>, network: Arc<dyn Network>, offline_page: CacheKey) -> Self {
    Self {
      registry,
      network,
      offline_page,
    }
  }

  pub fn registry(&self) -> &CacheRegistry<S> {
    &self.registry
  }

  pub fn network(&self) -> &Arc<dyn Network> {
    &self.network
  }

  /// Serve from the static partition, falling back to the network.
  ///
  /// 1. Hit - return it now and revalidate in the background
  /// 2. Miss - fetch, store 2xx responses in the static partition
  /// 3. Network failure - offline page for navigations, 408 otherwise
  pub async fn cache_first(&self, request: &Request) -> Served {
    let key = CacheKey::for_request(request);

    match self.registry.match_in(Partition::Static, &key) {
      Ok(Some(cached)) => {
        self.revalidate_in_background(request.clone());
        return Served::from_cache(cached);
      }
      Ok(None) => {}
      Err(e) => warn!("Cache lookup for {} failed: {}", key, e),
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(Partition::Static, &key, &response);
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!("Network failed for {}: {}", key, e);
        if request.accepts_html() {
          self.offline_page()
        } else {
          Served::synthetic(
            Response::new(408, "Network error occurred").with_header("content-type", "text/plain"),
          )
        }
      }
    }
  }

  /// Serve from the network, falling back to any cached copy.
  ///
  /// 1. Success - store 2xx responses in the dynamic partition (best-effort)
  /// 2. Network failure - cached copy from any partition
  /// 3. Nothing cached - offline page for navigations, JSON 503 otherwise
  pub async fn network_first(&self, request: &Request) -> Served {
    let key = CacheKey::for_request(request);

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(Partition::Dynamic, &key, &response);
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!("Network failed, serving from cache: {}", e);

        match self.registry.match_any(&key) {
          Ok(Some(cached)) => return Served::from_cache(cached),
          Ok(None) => {}
          Err(e) => warn!("Cache lookup for {} failed: {}", key, e),
        }

        if request.accepts_html() {
          return self.offline_page();
        }

        Served::synthetic(offline_json())
      }
    }
  }

  /// The cached offline document, or the built-in one.
  pub fn offline_page(&self) -> Served {
    match self.registry.match_any(&self.offline_page) {
      Ok(Some(page)) => Served::offline_page(page),
      Ok(None) => Served::offline_page(builtin_offline_page()),
      Err(e) => {
        warn!("Offline page lookup failed: {}", e);
        Served::offline_page(builtin_offline_page())
      }
    }
  }

  /// Fetch `request` and store the response in `partition` if it is a 2xx.
  ///
  /// Returns whether the entry was written.
  pub async fn refresh(&self, partition: Partition, request: &Request) -> Result<bool> {
    let response = self.network.fetch(request).await?;
    if !response.is_ok() {
      debug!("Not caching {}: status {}", request.url, response.status);
      return Ok(false);
    }

    let handle = self.registry.open_partition(partition)?;
    self
      .registry
      .put(&handle, &CacheKey::for_request(request), &response)?;
    Ok(true)
  }

  /// Spawn an unawaited refetch of a cache-first hit.
  ///
  /// Errors stay inside the task.
  pub fn revalidate_in_background(&self, request: Request) -> JoinHandle<()> {
    let layer = self.clone();
    tokio::spawn(async move {
      if let Err(e) = layer.refresh(Partition::Static, &request).await {
        debug!("Background update failed for {}: {}", request.url, e);
      }
    })
  }

  /// Best-effort cache write; failures are logged only.
  fn store(&self, partition: Partition, key: &CacheKey, response: &Response) {
    let result = self
      .registry
      .open_partition(partition)
      .and_then(|handle| self.registry.put(&handle, key, response));

    if let Err(e) = result {
      warn!("Failed to cache {}: {}", key, e);
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      registry: self.registry.clone(),
      network: Arc::clone(&self.network),
      offline_page: self.offline_page.clone(),
    }
  }
}

fn builtin_offline_page() -> Response {
  Response::new(503, OFFLINE_DOCUMENT).with_header("content-type", "text/html; charset=utf-8")
}

fn offline_json() -> Response {
  let body = serde_json::json!({
    "error": "You are offline",
    "message": "Please check your internet connection",
    "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
  });

  Response::new(503, body.to_string()).with_header("content-type", "application/json")
}
