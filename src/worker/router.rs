//! Request classification. Pure: no I/O, no state.

use reqwest::Method;
use std::collections::BTreeSet;

use crate::net::Request;

/// What kind of request the page made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  Api,
  StaticAsset,
  Navigation,
  Other,
}

/// How a classified request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
}

impl RequestClass {
  pub fn strategy(self) -> Strategy {
    match self {
      RequestClass::StaticAsset => Strategy::CacheFirst,
      RequestClass::Api | RequestClass::Navigation | RequestClass::Other => Strategy::NetworkFirst,
    }
  }
}

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not ours: writes and non-http schemes go straight to the network
  PassThrough,
  Intercept {
    class: RequestClass,
    strategy: Strategy,
  },
}

/// Rules used to classify requests.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
  api_prefixes: Vec<String>,
  /// Lowercased, without the leading dot
  static_extensions: BTreeSet<String>,
}

impl RoutePolicy {
  pub fn new(api_prefixes: Vec<String>, static_extensions: BTreeSet<String>) -> Self {
    Self {
      api_prefixes,
      static_extensions,
    }
  }

  pub fn route(&self, request: &Request) -> Route {
    if request.method != Method::GET || !matches!(request.url.scheme(), "http" | "https") {
      return Route::PassThrough;
    }

    let class = self.classify(request);
    Route::Intercept {
      class,
      strategy: class.strategy(),
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    let path = request.url.path();

    if self
      .api_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
    {
      return RequestClass::Api;
    }

    if self.is_static_asset(path) {
      return RequestClass::StaticAsset;
    }

    if request.accepts_html() {
      return RequestClass::Navigation;
    }

    RequestClass::Other
  }

  fn is_static_asset(&self, path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or_default();
    match file_name.rsplit_once('.') {
      Some((_, ext)) => self.static_extensions.contains(&ext.to_ascii_lowercase()),
      None => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn policy() -> RoutePolicy {
    RoutePolicy::new(
      vec!["/api/".to_string()],
      ["css", "js", "png", "jpg", "svg", "woff", "woff2", "ttf"]
        .into_iter()
        .map(String::from)
        .collect(),
    )
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_writes_pass_through() {
    let url = Url::parse("http://localhost/api/chat/messages").unwrap();
    for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
      assert_eq!(
        policy().route(&Request::new(method, url.clone())),
        Route::PassThrough
      );
    }
  }

  #[test]
  fn test_non_http_scheme_passes_through() {
    assert_eq!(
      policy().route(&get("chrome-extension://abcdef/content.js")),
      Route::PassThrough
    );
  }

  #[test]
  fn test_api_prefix() {
    assert_eq!(
      policy().classify(&get("http://localhost/api/jobs?q=rust")),
      RequestClass::Api
    );
    // API wins over extension and Accept
    let request = get("http://localhost/api/export.js").with_header("accept", "text/html");
    assert_eq!(
      policy().route(&request),
      Route::Intercept {
        class: RequestClass::Api,
        strategy: Strategy::NetworkFirst
      }
    );
  }

  #[test]
  fn test_static_extensions() {
    for path in [
      "/css/main.css",
      "/js/chat.js",
      "/assets/icons/icon-192x192.png",
      "/photo.JPG",
      "/logo.svg",
      "/f.woff",
      "/f.woff2",
      "/f.ttf",
    ] {
      let request = get(&format!("http://localhost{}", path));
      assert_eq!(
        policy().route(&request),
        Route::Intercept {
          class: RequestClass::StaticAsset,
          strategy: Strategy::CacheFirst
        },
        "{}",
        path
      );
    }
  }

  #[test]
  fn test_extension_only_from_last_segment() {
    assert_eq!(
      policy().classify(&get("http://localhost/v1.css/readme")),
      RequestClass::Other
    );
    assert_eq!(
      policy().classify(&get("http://localhost/manifest.json")),
      RequestClass::Other
    );
  }

  #[test]
  fn test_navigation_by_accept() {
    let request = get("http://localhost/profile").with_header("accept", "text/html");
    assert_eq!(policy().classify(&request), RequestClass::Navigation);
    assert_eq!(RequestClass::Navigation.strategy(), Strategy::NetworkFirst);
  }

  #[test]
  fn test_default_is_network_first() {
    assert_eq!(
      policy().route(&get("http://localhost/")),
      Route::Intercept {
        class: RequestClass::Other,
        strategy: Strategy::NetworkFirst
      }
    );
  }
}
