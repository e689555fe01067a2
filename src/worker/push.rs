//! Push payloads, notifications and notification clicks.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::clients::{ClientWindow, Clients};
use crate::config::PushConfig;

/// Payload sent by the server with a push message. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub icon: Option<String>,
  pub badge: Option<String>,
  pub url: Option<String>,
}

impl PushPayload {
  /// Parse raw push data. Missing or malformed data yields an empty payload.
  pub fn parse(data: Option<&[u8]>) -> Self {
    match data {
      Some(bytes) if !bytes.is_empty() => serde_json::from_slice(bytes).unwrap_or_else(|e| {
        debug!("Push data parsing error: {}", e);
        Self::default()
      }),
      _ => Self::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationAction {
  Open,
  Dismiss,
}

impl NotificationAction {
  pub fn title(&self) -> &'static str {
    match self {
      NotificationAction::Open => "Open App",
      NotificationAction::Dismiss => "Dismiss",
    }
  }
}

/// A notification ready to be shown.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationIntent {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub target_url: String,
  pub timestamp: DateTime<Utc>,
  pub vibrate: Vec<u32>,
  pub actions: Vec<NotificationAction>,
  /// Replaces an earlier notification with the same tag
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tag: Option<String>,
}

impl NotificationIntent {
  /// Build the intent for a push, falling back field by field to the defaults.
  pub fn from_push(data: Option<&[u8]>, defaults: &PushConfig) -> Self {
    let payload = PushPayload::parse(data);

    Self {
      title: payload.title.unwrap_or_else(|| defaults.title.clone()),
      body: payload.body.unwrap_or_else(|| defaults.body.clone()),
      icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
      badge: payload.badge.unwrap_or_else(|| defaults.badge.clone()),
      target_url: payload.url.unwrap_or_else(|| defaults.url.clone()),
      timestamp: Utc::now(),
      vibrate: vec![200, 100, 200],
      actions: vec![NotificationAction::Open, NotificationAction::Dismiss],
      tag: None,
    }
  }
}

/// Where notifications are rendered.
pub trait NotificationSurface: Send + Sync {
  fn show(&self, intent: &NotificationIntent) -> Result<()>;
}

/// Renders notifications into the log.
pub struct LogSurface;

impl NotificationSurface for LogSurface {
  fn show(&self, intent: &NotificationIntent) -> Result<()> {
    let actions: Vec<&str> = intent.actions.iter().map(|a| a.title()).collect();
    info!(
      title = %intent.title,
      url = %intent.target_url,
      actions = ?actions,
      "Notification: {}",
      intent.body
    );
    Ok(())
  }
}

/// A click on a shown notification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationClick {
  /// `None` is a click on the notification body
  pub action: Option<String>,
  pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ClickOutcome {
  Dismissed,
  Focused { window: ClientWindow },
  Opened { window: ClientWindow },
}

/// Focus a window already showing the target URL, or open one.
pub fn handle_click(
  clients: &dyn Clients,
  click: &NotificationClick,
  default_url: &str,
) -> Result<ClickOutcome> {
  if click.action.as_deref() == Some("dismiss") {
    return Ok(ClickOutcome::Dismissed);
  }

  let target = click.url.as_deref().unwrap_or(default_url);

  if let Some(window) = clients.match_all().into_iter().find(|w| w.url == target) {
    let window = clients.focus(window.id)?;
    return Ok(ClickOutcome::Focused { window });
  }

  let window = clients.open_window(target)?;
  Ok(ClickOutcome::Opened { window })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::clients::WindowClients;

  #[test]
  fn test_payload_fields_used() {
    let intent = NotificationIntent::from_push(
      Some(br#"{"title":"Hi","body":"test"}"#.as_slice()),
      &PushConfig::default(),
    );

    assert_eq!(intent.title, "Hi");
    assert_eq!(intent.body, "test");
    assert_eq!(intent.icon, "/assets/icons/icon-192x192.png");
    assert_eq!(intent.badge, "/assets/icons/badge-72x72.png");
    assert_eq!(intent.target_url, "/");
    assert_eq!(
      intent.actions,
      vec![NotificationAction::Open, NotificationAction::Dismiss]
    );
  }

  #[test]
  fn test_malformed_payload_uses_defaults() {
    let defaults = PushConfig::default();
    let intent = NotificationIntent::from_push(Some(b"not json".as_slice()), &defaults);

    assert_eq!(intent.title, "New Message");
    assert_eq!(intent.body, defaults.body);
  }

  #[test]
  fn test_missing_payload_uses_defaults() {
    let intent = NotificationIntent::from_push(None, &PushConfig::default());
    assert_eq!(intent.title, "New Message");
    assert_eq!(intent.vibrate, vec![200, 100, 200]);
  }

  #[test]
  fn test_click_focuses_matching_window() {
    let clients = WindowClients::new();
    clients.track("http://localhost/ai-assistant.html");
    let click = NotificationClick {
      action: Some("open".to_string()),
      url: Some("http://localhost/ai-assistant.html".to_string()),
    };

    let outcome = handle_click(&clients, &click, "/").unwrap();

    assert!(matches!(outcome, ClickOutcome::Focused { ref window } if window.focused));
    assert_eq!(clients.match_all().len(), 1);
  }

  #[test]
  fn test_body_click_opens_window_when_none_matches() {
    let clients = WindowClients::new();
    clients.track("http://localhost/");
    let click = NotificationClick {
      action: None,
      url: Some("http://localhost/profile.html".to_string()),
    };

    let outcome = handle_click(&clients, &click, "/").unwrap();

    match outcome {
      ClickOutcome::Opened { window } => assert_eq!(window.url, "http://localhost/profile.html"),
      other => panic!("expected a new window, got {:?}", other),
    }
    assert_eq!(clients.match_all().len(), 2);
  }

  #[test]
  fn test_dismiss_has_no_side_effect() {
    let clients = WindowClients::new();
    let click = NotificationClick {
      action: Some("dismiss".to_string()),
      url: Some("http://localhost/".to_string()),
    };

    assert_eq!(
      handle_click(&clients, &click, "/").unwrap(),
      ClickOutcome::Dismissed
    );
    assert!(clients.match_all().is_empty());
  }
}
