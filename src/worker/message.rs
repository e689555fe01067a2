use serde::{Deserialize, Serialize};

/// Messages a page posts to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  SkipWaiting,
  GetCacheInfo,
  ClearCache,
  UpdateAssets {
    #[serde(default)]
    urls: Vec<String>,
  },
}

/// Replies sent back to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReply {
  CacheInfo {
    #[serde(rename = "cacheNames")]
    cache_names: Vec<String>,
  },
  CacheCleared,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_messages() {
    let parse = |v: serde_json::Value| serde_json::from_value::<ClientMessage>(v).unwrap();

    assert_eq!(parse(json!({"type": "SKIP_WAITING"})), ClientMessage::SkipWaiting);
    assert_eq!(parse(json!({"type": "GET_CACHE_INFO"})), ClientMessage::GetCacheInfo);
    assert_eq!(parse(json!({"type": "CLEAR_CACHE"})), ClientMessage::ClearCache);
    assert_eq!(
      parse(json!({"type": "UPDATE_ASSETS", "urls": ["/css/main.css"]})),
      ClientMessage::UpdateAssets {
        urls: vec!["/css/main.css".to_string()]
      }
    );
  }

  #[test]
  fn test_unknown_type_is_rejected() {
    assert!(serde_json::from_value::<ClientMessage>(json!({"type": "REBOOT"})).is_err());
  }

  #[test]
  fn test_reply_shape() {
    let info = WorkerReply::CacheInfo {
      cache_names: vec!["static-v2".to_string()],
    };
    assert_eq!(
      serde_json::to_value(&info).unwrap(),
      json!({"type": "CACHE_INFO", "cacheNames": ["static-v2"]})
    );
    assert_eq!(
      serde_json::to_value(WorkerReply::CacheCleared).unwrap(),
      json!({"type": "CACHE_CLEARED"})
    );
  }
}
