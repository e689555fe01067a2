use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Header list in arrival order. Names are lowercased; a name may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace every value of `name` with `value`.
  pub fn insert(&mut self, name: &str, value: &str) {
    let name = name.to_ascii_lowercase();
    self.0.retain(|(n, _)| *n != name);
    self.0.push((name, value.to_string()));
  }

  /// First value of `name`.
  pub fn get(&self, name: &str) -> Option<&str> {
    let name = name.to_ascii_lowercase();
    self
      .0
      .iter()
      .find(|(n, _)| *n == name)
      .map(|(_, v)| v.as_str())
  }

  #[cfg(test)]
  pub fn get_all<'a>(&'a self, name: &str) -> Vec<&'a str> {
    let name = name.to_ascii_lowercase();
    self
      .0
      .iter()
      .filter(|(n, _)| *n == name)
      .map(|(_, v)| v.as_str())
      .collect()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, (String, String)> {
    self.0.iter()
  }
}

impl FromIterator<(String, String)> for Headers {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    Self(
      iter
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect(),
    )
  }
}

impl<'a> IntoIterator for &'a Headers {
  type Item = &'a (String, String);
  type IntoIter = std::slice::Iter<'a, (String, String)>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

/// A request issued by a page, as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Bytes>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A JSON POST, used when replaying queued messages.
  pub fn post_json(url: Url, body: impl Into<Bytes>) -> Self {
    Self {
      body: Some(body.into()),
      ..Self::new(Method::POST, url)
    }
    .with_header("content-type", "application/json")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name)
  }

  /// Whether the Accept header asks for an HTML document.
  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .map(|accept| accept.contains("text/html"))
      .unwrap_or(false)
  }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name, value);
    self
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name)
  }

  /// 2xx status, the only responses that get cached.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
