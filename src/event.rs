use bytes::Bytes;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::cache::Served;
use crate::net::{Network, Request};
use crate::worker::{ClickOutcome, ClientMessage, NotificationClick, NotificationIntent, SyncReport, WorkerReply};

/// Everything the worker reacts to
#[derive(Debug)]
pub enum WorkerEvent {
  /// Precache the manifest
  Install,
  /// Collect old partitions and start intercepting
  Activate,
  /// A page request
  Fetch(Request),
  /// Connectivity restored, tagged with what to replay
  Sync { tag: String },
  /// Periodic content refresh
  PeriodicSync { tag: String },
  /// Raw push data, if any
  Push(Option<Bytes>),
  NotificationClick(NotificationClick),
  Message(ClientMessage),
}

/// Result of dispatching one event. Errors never escape as `Err`.
#[derive(Debug)]
pub enum EventOutcome {
  Completed,
  Failed(String),
  /// The worker does not handle this request
  PassThrough(Request),
  Respond(Served),
  Synced(SyncReport),
  Notified(NotificationIntent),
  Clicked(ClickOutcome),
  Reply(Option<WorkerReply>),
  /// Event not meant for this worker (unknown tag)
  Ignored,
}

/// Background event sources: connectivity probes and periodic ticks.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<WorkerEvent>,
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Probe `probe_url` every `interval` and raise `Sync { tag }` each time it
  /// becomes reachable again.
  pub fn spawn_connectivity_probe(
    &self,
    network: Arc<dyn Network>,
    probe_url: Url,
    interval: Duration,
    tag: String,
  ) {
    let tx = self.tx.clone();

    tokio::spawn(async move {
      let mut online = true;
      let mut ticker = tokio::time::interval(interval);

      loop {
        ticker.tick().await;

        let request = Request::new(Method::HEAD, probe_url.clone());
        let now_online = network.fetch(&request).await.is_ok();

        if now_online != online {
          info!("Connectivity {}", if now_online { "restored" } else { "lost" });
        }

        if came_back_online(online, now_online)
          && tx.send(WorkerEvent::Sync { tag: tag.clone() }).is_err()
        {
          break;
        }
        online = now_online;
      }
    });
  }

  /// Raise `PeriodicSync { tag }` every `interval`, starting one interval from now.
  pub fn spawn_periodic(&self, interval: Duration, tag: String) {
    let tx = self.tx.clone();

    tokio::spawn(async move {
      let start = tokio::time::Instant::now() + interval;
      let mut ticker = tokio::time::interval_at(start, interval);

      loop {
        ticker.tick().await;
        debug!("Periodic sync tick: {}", tag);
        if tx.send(WorkerEvent::PeriodicSync { tag: tag.clone() }).is_err() {
          break;
        }
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<WorkerEvent> {
    self.rx.recv().await
  }
}

fn came_back_online(was_online: bool, now_online: bool) -> bool {
  !was_online && now_online
}
