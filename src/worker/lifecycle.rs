//! Install and activate: precaching and partition garbage collection.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::collections::HashSet;
use std::fmt;
use tracing::info;
use url::Url;

use crate::cache::{CacheKey, CacheLayer, CacheStorage, Partition};
use crate::net::Request;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Created, install not attempted yet
  Parsed,
  Installing,
  /// Precache committed, waiting to activate
  Installed,
  Activating,
  /// Old partitions collected, intercepting fetches
  Activated,
  /// Install failed; this worker never intercepts
  Redundant,
}

impl LifecycleState {
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, LifecycleState::Activated)
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      LifecycleState::Parsed => "parsed",
      LifecycleState::Installing => "installing",
      LifecycleState::Installed => "installed",
      LifecycleState::Activating => "activating",
      LifecycleState::Activated => "activated",
      LifecycleState::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Fetch every manifest URL and commit them to the static partition.
///
/// All-or-nothing: any failed fetch or non-2xx status aborts before the
/// partition is created.
pub async fn install<S: CacheStorage>(layer: &CacheLayer<S>, manifest: &[Url]) -> Result<usize> {
  info!("Caching {} static assets", manifest.len());

  let network = layer.network();
  let fetches = manifest.iter().map(|url| async move {
    let request = Request::get(url.clone());
    let response = network
      .fetch(&request)
      .await
      .map_err(|e| eyre!("Precache of {} failed: {}", url, e))?;

    if !response.is_ok() {
      return Err(eyre!(
        "Precache of {} returned status {}",
        url,
        response.status
      ));
    }

    Ok::<_, color_eyre::Report>((CacheKey::for_request(&request), response))
  });

  let entries = try_join_all(fetches).await?;
  layer.registry().precache(Partition::Static, &entries)?;

  Ok(entries.len())
}

/// Delete every partition other than the current static and dynamic ones.
pub fn activate<S: CacheStorage>(layer: &CacheLayer<S>) -> Result<Vec<String>> {
  let names = layer.registry().names_of_current().clone();
  let keep: HashSet<&str> = [names.static_name.as_str(), names.dynamic_name.as_str()]
    .into_iter()
    .collect();

  layer.registry().delete_all_except(&keep)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheRegistry, PartitionNames, SqliteStorage};
  use crate::db::Database;
  use crate::net::testing::ScriptedNetwork;
  use std::sync::Arc;

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:8080").unwrap().join(path).unwrap()
  }

  fn layer(network: Arc<ScriptedNetwork>) -> CacheLayer<SqliteStorage> {
    let registry = CacheRegistry::new(
      SqliteStorage::new(Database::open_in_memory().unwrap()),
      PartitionNames {
        static_name: "static-v2".to_string(),
        dynamic_name: "dynamic-v1".to_string(),
      },
    );
    CacheLayer::new(registry, network, CacheKey::get(&url("/offline.html")))
  }

  #[tokio::test]
  async fn test_install_precaches_manifest() {
    let network = Arc::new(ScriptedNetwork::new());
    let manifest = vec![
      url("/"),
      url("/css/main.css"),
      Url::parse("https://cdn.example.com/all.min.css").unwrap(),
    ];
    for u in &manifest {
      network.respond(u.as_str(), 200, "ok");
    }
    let layer = layer(network);

    assert_eq!(install(&layer, &manifest).await.unwrap(), 3);

    for u in &manifest {
      assert!(layer
        .registry()
        .match_in(Partition::Static, &CacheKey::get(u))
        .unwrap()
        .is_some());
    }
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond(url("/").as_str(), 200, "home");
    network.fail(url("/js/chat.js").as_str());
    let layer = layer(network);

    let result = install(&layer, &[url("/"), url("/js/chat.js")]).await;

    assert!(result.is_err());
    assert!(layer.registry().names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond(url("/").as_str(), 200, "home");
    network.respond(url("/profile.html").as_str(), 404, "gone");
    let layer = layer(network);

    assert!(install(&layer, &[url("/"), url("/profile.html")])
      .await
      .is_err());
    assert!(layer.registry().names().unwrap().is_empty());
  }

  #[test]
  fn test_activate_leaves_two_partitions() {
    let layer = layer(Arc::new(ScriptedNetwork::new()));
    for name in ["static-v1", "static-v2", "dynamic-v1", "dynamic-v0"] {
      layer.registry().open(name).unwrap();
    }

    let deleted = activate(&layer).unwrap();

    assert_eq!(deleted, vec!["static-v1", "dynamic-v0"]);
    let remaining = layer.registry().names().unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.contains(&"static-v2".to_string()));
    assert!(remaining.contains(&"dynamic-v1".to_string()));
  }

  #[test]
  fn test_only_activated_intercepts() {
    assert!(LifecycleState::Activated.can_intercept_fetch());
    assert!(!LifecycleState::Installed.can_intercept_fetch());
    assert!(!LifecycleState::Redundant.can_intercept_fetch());
    assert_eq!(LifecycleState::Activating.to_string(), "activating");
  }
}
