//! Store keys derived from requests.

use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Method, Request};

/// Identity of a stored entry: request method + URL.
///
/// Two requests with the same method and URL map to the same key. The URL
/// fragment never reaches the server, so it is dropped before hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  hash: String,
  method: Method,
  url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let url = url.to_string();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { hash, method, url }
  }

  pub fn from_request(request: &Request) -> Self {
    Self::new(request.method(), request.url())
  }

  /// Rebuild a key from stored columns.
  pub(crate) fn from_parts(hash: String, method: Method, url: String) -> Self {
    Self { hash, method, url }
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  pub fn method(&self) -> Method {
    self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(method: Method, url: &str) -> RequestKey {
    RequestKey::new(method, &Url::parse(url).unwrap())
  }

  #[test]
  fn test_same_method_and_url_collide() {
    let a = key(Method::Get, "https://story-api.dicoding.dev/v1/stories");
    let b = key(Method::Get, "https://story-api.dicoding.dev/v1/stories");
    assert_eq!(a, b);
    assert_eq!(a.hash().len(), 64);
  }

  #[test]
  fn test_method_is_part_of_identity() {
    let get = key(Method::Get, "http://localhost:8080/index.html");
    let head = key(Method::Head, "http://localhost:8080/index.html");
    assert_ne!(get.hash(), head.hash());
  }

  #[test]
  fn test_fragment_is_ignored() {
    let plain = key(Method::Get, "http://localhost:8080/");
    let routed = key(Method::Get, "http://localhost:8080/#/add-story");
    assert_eq!(plain, routed);
    assert_eq!(routed.url(), "http://localhost:8080/");
  }

  #[test]
  fn test_query_string_is_part_of_identity() {
    let page1 = key(Method::Get, "https://story-api.dicoding.dev/v1/stories?page=1");
    let page2 = key(Method::Get, "https://story-api.dicoding.dev/v1/stories?page=2");
    assert_ne!(page1, page2);
  }
}
