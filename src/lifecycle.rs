//! Install and activate: populating the shell store and retiring old versions.

use futures::future::try_join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CachedResponse, RequestKey, StoreError};
use crate::clients::ClientMessage;
use crate::context::AgentContext;
use crate::http::Request;

/// Worker lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Failed to install or activate; a new worker must take over
  Redundant,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("invalid lifecycle transition {from:?} -> {to:?}")]
  InvalidTransition { from: WorkerState, to: WorkerState },
  #[error("invalid shell asset list: {0}")]
  AssetList(String),
  #[error("shell asset {url} could not be cached: {reason}")]
  AssetFetch { url: String, reason: String },
  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub shell_store: String,
  pub api_store: String,
  /// Number of shell assets written
  pub assets: usize,
  /// Activation will not wait for clients of the previous worker to close
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  /// Stores removed because their version tag is stale
  pub deleted: Vec<String>,
  /// Stores carrying the current version tag
  pub kept: Vec<String>,
  /// Clients brought under control
  pub claimed: usize,
  /// Clients that received the "updated" broadcast
  pub notified: usize,
}

/// Version tag of a store name: the text after its last `-`.
pub fn version_tag(store: &str) -> Option<&str> {
  store.rsplit_once('-').map(|(_, tag)| tag)
}

/// Lifecycle of one worker generation.
#[derive(Debug)]
pub struct Lifecycle {
  state: WorkerState,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}

impl Lifecycle {
  pub fn new() -> Self {
    Self {
      state: WorkerState::Parsed,
    }
  }

  /// A worker whose install completed in an earlier run.
  pub fn installed() -> Self {
    Self {
      state: WorkerState::Installed,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  fn transition(&mut self, to: WorkerState) -> Result<(), LifecycleError> {
    if !is_valid_transition(self.state, to) {
      return Err(LifecycleError::InvalidTransition {
        from: self.state,
        to,
      });
    }
    info!(from = ?self.state, to = ?to, "lifecycle transition");
    self.state = to;
    Ok(())
  }

  /// Fetch the whole shell asset list and store it as one unit.
  ///
  /// If any asset fails, nothing is written and the worker becomes
  /// redundant. Re-running install overwrites the same keys.
  pub async fn install(&mut self, ctx: &AgentContext) -> Result<InstallReport, LifecycleError> {
    self.transition(WorkerState::Installing)?;

    match populate_shell(ctx).await {
      Ok(report) => {
        self.transition(WorkerState::Installed)?;
        info!(store = %report.shell_store, assets = report.assets, "install complete");
        Ok(report)
      }
      Err(e) => {
        warn!(error = %e, "install failed");
        self.transition(WorkerState::Redundant)?;
        Err(e)
      }
    }
  }

  /// Purge stale stores, claim clients and announce the new version.
  pub async fn activate(&mut self, ctx: &AgentContext) -> Result<ActivationReport, LifecycleError> {
    self.transition(WorkerState::Activating)?;

    let (deleted, kept) = match purge_stale_stores(ctx).await {
      Ok(split) => split,
      Err(e) => {
        warn!(error = %e, "activation failed");
        self.transition(WorkerState::Redundant)?;
        return Err(e);
      }
    };

    let claimed = ctx.clients.claim().await.unwrap_or_else(|e| {
      warn!(error = %e, "failed to claim clients");
      0
    });
    self.transition(WorkerState::Activated)?;

    // Nobody may be listening; delivery is best effort
    let message = ClientMessage::Updated {
      version: ctx.config.version.clone(),
    };
    let notified = ctx.clients.post_message(&message).await.unwrap_or_else(|e| {
      warn!(error = %e, "failed to broadcast update");
      0
    });

    Ok(ActivationReport {
      deleted,
      kept,
      claimed,
      notified,
    })
  }
}

fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
  use WorkerState::*;

  matches!(
    (from, to),
    (Parsed, Installing)
      | (Installing, Installed)
      | (Installing, Redundant)
      | (Installed, Activating)
      | (Activating, Activated)
      | (Activating, Redundant)
      | (Activated, Redundant)
  )
}

async fn populate_shell(ctx: &AgentContext) -> Result<InstallReport, LifecycleError> {
  let shell_store = ctx.config.shell_store();
  let api_store = ctx.config.api_store();
  ctx.store.open(&shell_store).await?;
  ctx.store.open(&api_store).await?;

  let urls = ctx
    .config
    .shell_asset_urls()
    .map_err(|e| LifecycleError::AssetList(e.to_string()))?;

  let entries = try_join_all(urls.into_iter().map(|url| async move {
    let request = Request::get(url);
    let response = ctx
      .network
      .fetch(&request)
      .await
      .map_err(|e| LifecycleError::AssetFetch {
        url: e.url,
        reason: e.reason,
      })?;

    if !response.is_cacheable_status() {
      return Err(LifecycleError::AssetFetch {
        url: request.url().to_string(),
        reason: format!("HTTP {}", response.status()),
      });
    }

    Ok((
      RequestKey::from_request(&request),
      CachedResponse::capture(response),
    ))
  }))
  .await?;

  ctx.store.put_all(&shell_store, &entries).await?;

  Ok(InstallReport {
    shell_store,
    api_store,
    assets: entries.len(),
    skip_waiting: true,
  })
}

async fn purge_stale_stores(
  ctx: &AgentContext,
) -> Result<(Vec<String>, Vec<String>), LifecycleError> {
  let current = ctx.config.version.as_str();
  let (kept, stale): (Vec<String>, Vec<String>) = ctx
    .store
    .list()
    .await?
    .into_iter()
    .partition(|name| version_tag(name) == Some(current));

  try_join_all(stale.iter().map(|name| async move {
    ctx.store.delete(name).await?;
    info!(store = %name, "deleted stale store");
    Ok::<_, LifecycleError>(())
  }))
  .await?;

  Ok((stale, kept))
}
