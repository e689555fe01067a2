use color_eyre::{eyre::eyre, Result};
use tracing::info;
use url::Url;

use super::push::{NotificationIntent, NotificationSurface};
use crate::cache::{CacheKey, CacheLayer, CacheStorage, Partition};
use crate::config::PushConfig;
use crate::net::Request;

/// Refresh the latest career resources into the dynamic partition.
///
/// Shows a notification when the server lists any. Returns how many it listed.
pub async fn refresh_resources<S: CacheStorage>(
  layer: &CacheLayer<S>,
  surface: &dyn NotificationSurface,
  resource_url: &Url,
  push: &PushConfig,
) -> Result<usize> {
  let request = Request::get(resource_url.clone());
  let response = layer.network().fetch(&request).await?;
  if !response.is_ok() {
    return Err(eyre!("Resource refresh answered {}", response.status));
  }

  let resources: serde_json::Value = serde_json::from_slice(&response.body)
    .map_err(|e| eyre!("Failed to parse resources: {}", e))?;
  let count = resources.as_array().map(Vec::len).unwrap_or(0);

  let handle = layer.registry().open_partition(Partition::Dynamic)?;
  layer
    .registry()
    .put(&handle, &CacheKey::for_request(&request), &response)?;

  if count > 0 {
    info!("{} new career resources", count);
    let intent = NotificationIntent {
      title: "New Career Resources".to_string(),
      body: format!("{} new resources available", count),
      tag: Some("resources-update".to_string()),
      actions: Vec::new(),
      ..NotificationIntent::from_push(None, push)
    };
    surface.show(&intent)?;
  }

  Ok(count)
}
