//! Open application instances the agent controls.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Message broadcast to every open application instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
  /// A new version took control; the page may prompt for a reload
  Updated { version: String },
}

#[derive(Debug, Error)]
#[error("client operation failed: {0}")]
pub struct ClientError(pub String);

#[async_trait]
pub trait Clients: Send + Sync {
  /// Take control of every open instance. Returns how many were claimed.
  async fn claim(&self) -> Result<usize, ClientError>;

  /// Send a message to every controlled instance. Returns how many received it.
  async fn post_message(&self, message: &ClientMessage) -> Result<usize, ClientError>;

  /// Open a new window navigated to `url`, resolving once navigation settles.
  async fn open_window(&self, url: &str) -> Result<(), ClientError>;
}

/// Client surface for the command line: there are no pages, so broadcasts
/// and navigations are written to stdout.
pub struct ConsoleClients;

#[async_trait]
impl Clients for ConsoleClients {
  async fn claim(&self) -> Result<usize, ClientError> {
    Ok(0)
  }

  async fn post_message(&self, message: &ClientMessage) -> Result<usize, ClientError> {
    let json = serde_json::to_string(message).map_err(|e| ClientError(e.to_string()))?;
    println!("broadcast {}", json);
    Ok(0)
  }

  async fn open_window(&self, url: &str) -> Result<(), ClientError> {
    println!("open {}", url);
    Ok(())
  }
}
