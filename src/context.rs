//! Capabilities handed to every event handler.

use std::sync::Arc;

use crate::cache::StoreManager;
use crate::clients::Clients;
use crate::config::Config;
use crate::network::Network;
use crate::notify::NotificationSurface;

/// Everything a handler may touch. Handlers get no other global state, so
/// tests swap any capability for a fake.
#[derive(Clone)]
pub struct AgentContext {
  pub config: Arc<Config>,
  pub store: Arc<dyn StoreManager>,
  pub network: Arc<dyn Network>,
  pub notifications: Arc<dyn NotificationSurface>,
  pub clients: Arc<dyn Clients>,
}
