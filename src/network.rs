//! Network boundary: the capability the router and installer fetch through.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use thiserror::Error;
use url::{Origin, Url};

use crate::config::Config;
use crate::http::{Method, Request, Response, ResponseKind};

/// A fetch that never produced a response (offline, DNS, timeout, reset...).
#[derive(Debug, Clone, Error)]
#[error("fetch {url} failed: {reason}")]
pub struct NetworkError {
  pub url: String,
  pub reason: String,
}

impl NetworkError {
  pub fn new(url: &Url, reason: impl Into<String>) -> Self {
    Self {
      url: url.to_string(),
      reason: reason.into(),
    }
  }
}

/// Outbound HTTP.
///
/// Any HTTP status is a successful fetch; only transport failures are errors.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Network implementation backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  app_origin: Origin,
}

impl HttpNetwork {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.network.timeout_secs))
      .user_agent(concat!("story-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      app_origin: config.app_origin.origin(),
    })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let url = request.url();
    let response = self
      .client
      .request(to_reqwest_method(request.method()), url.clone())
      .send()
      .await
      .map_err(|e| NetworkError::new(url, e.to_string()))?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let shared = headers
      .iter()
      .any(|(name, _)| name.eq_ignore_ascii_case("access-control-allow-origin"));
    let kind = response_kind(&self.app_origin, &final_url, shared);

    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::new(url, e.to_string()))?;

    Ok(
      Response::new(status, kind)
        .with_url(final_url)
        .with_headers(headers)
        .with_body(body),
    )
  }
}

/// Classify a response by where it was finally served from.
pub fn response_kind(app_origin: &Origin, final_url: &Url, shared: bool) -> ResponseKind {
  if final_url.origin() == *app_origin {
    ResponseKind::Basic
  } else if shared {
    ResponseKind::Cors
  } else {
    ResponseKind::Opaque
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
    Method::Options => reqwest::Method::OPTIONS,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_same_origin_is_basic() {
    let app = Url::parse("http://localhost:8080").unwrap().origin();
    let url = Url::parse("http://localhost:8080/index.html").unwrap();
    assert_eq!(response_kind(&app, &url, false), ResponseKind::Basic);
  }

  #[test]
  fn test_cross_origin_depends_on_sharing() {
    let app = Url::parse("http://localhost:8080").unwrap().origin();
    let cdn = Url::parse("https://unpkg.com/leaflet@1.9.4/dist/leaflet.js").unwrap();
    assert_eq!(response_kind(&app, &cdn, true), ResponseKind::Cors);
    assert_eq!(response_kind(&app, &cdn, false), ResponseKind::Opaque);
  }

  #[test]
  fn test_other_port_is_cross_origin() {
    let app = Url::parse("http://localhost:8080").unwrap().origin();
    let url = Url::parse("http://localhost:9090/index.html").unwrap();
    assert_eq!(response_kind(&app, &url, false), ResponseKind::Opaque);
  }
}
