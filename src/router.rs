//! Fetch routing: decides between the store and the network for each request.

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CachedResponse, RequestKey};
use crate::config::Config;
use crate::context::AgentContext;
use crate::http::{Method, Request, Response, ResponseKind};
use crate::network::NetworkError;

/// Retrieval strategy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Left to the local development proxy; never intercepted
  Bypass,
  /// Story-data service: live data preferred, store as offline fallback
  NetworkFirst,
  /// Shell and third-party assets: store preferred
  CacheFirst,
  /// Non-GET requests are never stored or served from a store
  NetworkOnly,
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  /// Store hit on the cache-first path
  Cache,
  /// Network failed and the store answered instead
  Offline,
}

#[derive(Debug)]
pub enum FetchOutcome {
  /// Not intercepted: the request takes its normal network path
  Passthrough,
  Respond {
    response: Response,
    source: ResponseSource,
    /// Store write started for a copy of `response`, if any
    write: Option<PendingWrite>,
  },
}

/// A store write running behind an already delivered response.
#[derive(Debug)]
pub struct PendingWrite(JoinHandle<()>);

impl PendingWrite {
  /// Wait for the write to land. Its failures were already logged.
  pub async fn settle(self) {
    if let Err(e) = self.0.await {
      warn!(error = %e, "store write task failed");
    }
  }
}

/// Classify a request by origin and path.
pub fn classify(config: &Config, request: &Request) -> Route {
  let url = request.url();
  let origin = url.origin();

  if origin == config.app_origin.origin() && url.path().starts_with(&config.bypass_prefix) {
    return Route::Bypass;
  }
  if request.method() != Method::Get {
    return Route::NetworkOnly;
  }
  if origin == config.api_origin.origin() {
    Route::NetworkFirst
  } else {
    Route::CacheFirst
  }
}

/// Handle one intercepted request.
///
/// A network failure only reaches the caller when no stored copy exists.
pub async fn handle_fetch(ctx: &AgentContext, request: &Request) -> Result<FetchOutcome, NetworkError> {
  let route = classify(&ctx.config, request);
  debug!(method = %request.method(), url = %request.url(), route = ?route, "routing request");

  match route {
    Route::Bypass => Ok(FetchOutcome::Passthrough),
    Route::NetworkOnly => {
      let response = ctx.network.fetch(request).await?;
      Ok(respond(response, ResponseSource::Network, None))
    }
    Route::NetworkFirst => network_first(ctx, request).await,
    Route::CacheFirst => cache_first(ctx, request).await,
  }
}

async fn network_first(ctx: &AgentContext, request: &Request) -> Result<FetchOutcome, NetworkError> {
  let key = RequestKey::from_request(request);

  match ctx.network.fetch(request).await {
    Ok(response) => {
      let write = response
        .is_cacheable_status()
        .then(|| persist(ctx, ctx.config.api_store(), key, response.duplicate()));
      Ok(respond(response, ResponseSource::Network, write))
    }
    Err(e) => match lookup(ctx, &key).await {
      Some(cached) => {
        debug!(url = %request.url(), "network failed, serving stored copy");
        Ok(respond(cached.into_response(), ResponseSource::Offline, None))
      }
      None => Err(e),
    },
  }
}

async fn cache_first(ctx: &AgentContext, request: &Request) -> Result<FetchOutcome, NetworkError> {
  let key = RequestKey::from_request(request);

  if let Some(cached) = lookup(ctx, &key).await {
    debug!(url = %request.url(), "store hit");
    return Ok(respond(cached.into_response(), ResponseSource::Cache, None));
  }

  let response = ctx.network.fetch(request).await?;
  let write = (response.is_cacheable_status() && response.kind() == ResponseKind::Basic)
    .then(|| persist(ctx, ctx.config.shell_store(), key, response.duplicate()));
  Ok(respond(response, ResponseSource::Network, write))
}

fn respond(response: Response, source: ResponseSource, write: Option<PendingWrite>) -> FetchOutcome {
  FetchOutcome::Respond {
    response,
    source,
    write,
  }
}

/// Store lookup that treats a failing store as a miss.
async fn lookup(ctx: &AgentContext, key: &RequestKey) -> Option<CachedResponse> {
  ctx.store.get(key).await.unwrap_or_else(|e| {
    warn!(url = %key.url(), error = %e, "store lookup failed");
    None
  })
}

/// Start writing a response view to `store` on its own task. Failures are
/// logged and dropped.
fn persist(ctx: &AgentContext, store: String, key: RequestKey, view: Response) -> PendingWrite {
  let ctx = ctx.clone();
  let entry = CachedResponse::capture(view);
  PendingWrite(tokio::spawn(async move {
    if let Err(e) = ctx.store.put(&store, &key, &entry).await {
      warn!(store = %store, url = %key.url(), error = %e, "failed to store response");
    }
  }))
}
