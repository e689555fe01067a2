//! Core types for the cache registry.

use reqwest::Method;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::net::{Request, Response};

/// Identity of a cached request: method plus absolute URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  method: Method,
  url: String,
}

impl CacheKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.clone(),
      url: url.to_string(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  /// SHA256 hash for stable, fixed-length storage keys
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// The two partitions the worker writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
  /// Precached assets and cache-first fills
  Static,
  /// Network-first responses
  Dynamic,
}

/// Versioned names of the current partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  pub static_name: String,
  pub dynamic_name: String,
}

impl PartitionNames {
  pub fn name(&self, partition: Partition) -> &str {
    match partition {
      Partition::Static => &self.static_name,
      Partition::Dynamic => &self.dynamic_name,
    }
  }
}

/// Indicates where a response handed back to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Stored response from a cache partition
  Cache,
  /// The offline fallback document
  OfflinePage,
  /// A response built by the worker (408/503)
  Synthetic,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseSource::Network => "network",
      ResponseSource::Cache => "cache",
      ResponseSource::OfflinePage => "offline-page",
      ResponseSource::Synthetic => "synthetic",
    }
  }
}

/// A response together with its source.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  pub fn offline_page(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::OfflinePage,
    }
  }

  pub fn synthetic(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Synthetic,
    }
  }
}
