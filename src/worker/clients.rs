use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

/// A window showing one of the application's pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientWindow {
  pub id: u64,
  pub url: String,
  pub focused: bool,
}

/// The windows the worker can reach.
pub trait Clients: Send + Sync {
  fn match_all(&self) -> Vec<ClientWindow>;

  fn focus(&self, id: u64) -> Result<ClientWindow>;

  fn open_window(&self, url: &str) -> Result<ClientWindow>;

  /// Note that a page at `url` is being shown.
  fn track(&self, url: &str);
}

/// Most windows remembered; the oldest unfocused one goes first.
const MAX_WINDOWS: usize = 32;

/// In-memory window registry, fed by the navigations the proxy serves.
#[derive(Debug, Default)]
pub struct WindowClients {
  windows: Mutex<Vec<ClientWindow>>,
  next_id: AtomicU64,
}

impl WindowClients {
  pub fn new() -> Self {
    Self::default()
  }

  fn insert(&self, url: &str, focused: bool) -> ClientWindow {
    let window = ClientWindow {
      id: self.next_id.fetch_add(1, Ordering::Relaxed),
      url: url.to_string(),
      focused,
    };

    if let Ok(mut windows) = self.windows.lock() {
      if focused {
        windows.iter_mut().for_each(|w| w.focused = false);
      }
      windows.push(window.clone());

      while windows.len() > MAX_WINDOWS {
        let oldest = windows.iter().position(|w| !w.focused).unwrap_or(0);
        windows.remove(oldest);
      }
    }
    window
  }
}

impl Clients for WindowClients {
  fn match_all(&self) -> Vec<ClientWindow> {
    self
      .windows
      .lock()
      .map(|windows| windows.clone())
      .unwrap_or_default()
  }

  fn focus(&self, id: u64) -> Result<ClientWindow> {
    let mut windows = self
      .windows
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut focused = None;
    for window in windows.iter_mut() {
      window.focused = window.id == id;
      if window.focused {
        focused = Some(window.clone());
      }
    }

    focused.ok_or_else(|| eyre!("No client window with id {}", id))
  }

  fn open_window(&self, url: &str) -> Result<ClientWindow> {
    let window = self.insert(url, true);
    info!("Opening window {} at {}", window.id, url);
    Ok(window)
  }

  fn track(&self, url: &str) {
    let known = self
      .windows
      .lock()
      .map(|windows| windows.iter().any(|w| w.url == url))
      .unwrap_or(true);

    if !known {
      self.insert(url, false);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_track_is_deduplicated() {
    let clients = WindowClients::new();
    clients.track("http://localhost/");
    clients.track("http://localhost/");
    clients.track("http://localhost/profile.html");

    assert_eq!(clients.match_all().len(), 2);
  }

  #[test]
  fn test_focus_moves_focus() {
    let clients = WindowClients::new();
    let opened = clients.open_window("http://localhost/a").unwrap();
    clients.track("http://localhost/b");
    let b = clients.match_all()[1].id;

    let focused = clients.focus(b).unwrap();

    assert!(focused.focused);
    let windows = clients.match_all();
    assert!(!windows.iter().find(|w| w.id == opened.id).unwrap().focused);
  }

  #[test]
  fn test_tracked_windows_are_bounded() {
    let clients = WindowClients::new();
    let focused = clients.open_window("http://localhost/ai-assistant.html").unwrap();
    for n in 0..100 {
      clients.track(&format!("http://localhost/job-listings.html?page={}", n));
    }

    let windows = clients.match_all();
    assert_eq!(windows.len(), MAX_WINDOWS);
    // The focused window survives; the oldest tracked ones are gone
    assert!(windows.iter().any(|w| w.id == focused.id));
    assert!(windows
      .iter()
      .any(|w| w.url == "http://localhost/job-listings.html?page=99"));
    assert!(!windows
      .iter()
      .any(|w| w.url == "http://localhost/job-listings.html?page=0"));
  }

  #[test]
  fn test_focus_unknown_window() {
    assert!(WindowClients::new().focus(42).is_err());
  }
}
