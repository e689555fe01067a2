//! Scripted network for tests.

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::client::Network;
use super::types::{Request, Response};

#[derive(Clone)]
enum Script {
  Respond(Response),
  Fail,
  Hang,
}

/// Answers by exact URL. Unknown URLs fail as if offline.
#[derive(Default)]
pub struct ScriptedNetwork {
  scripts: Mutex<HashMap<String, Script>>,
  calls: Mutex<Vec<(String, String, Option<Bytes>)>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self.set(url, Script::Respond(Response::new(status, body.to_string())));
  }

  pub fn respond_with(&self, url: &str, response: Response) {
    self.set(url, Script::Respond(response));
  }

  pub fn fail(&self, url: &str) {
    self.set(url, Script::Fail);
  }

  /// The fetch never completes.
  pub fn hang(&self, url: &str) {
    self.set(url, Script::Hang);
  }

  fn set(&self, url: &str, script: Script) {
    self.scripts.lock().unwrap().insert(url.to_string(), script);
  }

  /// `"METHOD url"` for every fetch attempted, in order.
  pub fn calls(&self) -> Vec<String> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|(method, url, _)| format!("{} {}", method, url))
      .collect()
  }

  pub fn bodies(&self) -> Vec<Bytes> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter_map(|(_, _, body)| body.clone())
      .collect()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push((
      request.method.to_string(),
      url.clone(),
      request.body.clone(),
    ));

    // Give other tasks a turn, as a real round trip would
    tokio::task::yield_now().await;

    let script = self.scripts.lock().unwrap().get(&url).cloned();
    match script {
      Some(Script::Respond(response)) => Ok(response),
      Some(Script::Hang) => futures::future::pending().await,
      Some(Script::Fail) | None => Err(eyre!("Network unreachable: {}", url)),
    }
  }
}
