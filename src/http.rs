//! Request and response types shared by the router, the store and the network.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// HTTP request method.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  #[default]
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
      Self::Options => "OPTIONS",
    }
  }

  /// Parse an upper- or lower-case method name.
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Some(Self::Get),
      "HEAD" => Some(Self::Head),
      "POST" => Some(Self::Post),
      "PUT" => Some(Self::Put),
      "PATCH" => Some(Self::Patch),
      "DELETE" => Some(Self::Delete),
      "OPTIONS" => Some(Self::Options),
      _ => None,
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An intercepted outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  method: Method,
  url: Url,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  /// Parse a request from a method and an absolute URL string.
  pub fn parse(method: Method, url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
    Ok(Self::new(method, url))
  }

  pub fn method(&self) -> Method {
    self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }
}

/// How a response relates to the application origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response
  Basic,
  /// Cross-origin response the remote explicitly shared
  Cors,
  /// Cross-origin response without sharing headers
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      _ => None,
    }
  }
}

/// One readable view of a response payload.
///
/// Reading a `Body` consumes it. A response that must reach both the caller
/// and the store is split with [`Response::duplicate`] first, so each reader
/// owns its own view of the same bytes.
#[derive(Debug, Default)]
pub struct Body(Bytes);

impl Body {
  pub fn new(bytes: impl Into<Bytes>) -> Self {
    Self(bytes.into())
  }

  /// Consume this view and return its bytes.
  pub fn into_bytes(self) -> Bytes {
    self.0
  }

  fn view(&self) -> Self {
    Self(self.0.clone())
  }
}

/// A response produced by the network or served from a store.
#[derive(Debug)]
pub struct Response {
  status: u16,
  kind: ResponseKind,
  url: Option<Url>,
  headers: Vec<(String, String)>,
  body: Body,
}

impl Response {
  pub fn new(status: u16, kind: ResponseKind) -> Self {
    Self {
      status,
      kind,
      url: None,
      headers: Vec::new(),
      body: Body::default(),
    }
  }

  pub fn with_url(mut self, url: Url) -> Self {
    self.url = Some(url);
    self
  }

  pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
    self.headers = headers;
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Body::new(body);
    self
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  pub fn kind(&self) -> ResponseKind {
    self.kind
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Only a plain 200 counts as success for caching.
  pub fn is_cacheable_status(&self) -> bool {
    self.status == 200
  }

  /// Produce an independent response sharing the same payload.
  pub fn duplicate(&self) -> Self {
    Self {
      status: self.status,
      kind: self.kind,
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.view(),
    }
  }

  pub fn into_bytes(self) -> Bytes {
    self.body.into_bytes()
  }

  pub(crate) fn into_parts(self) -> (u16, ResponseKind, Option<Url>, Vec<(String, String)>, Body) {
    (self.status, self.kind, self.url, self.headers, self.body)
  }
}
