//! Fakes for handler tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CachedResponse, RequestKey, SqliteStorage, StoreError, StoreManager};
use crate::clients::{ClientError, ClientMessage, Clients};
use crate::config::Config;
use crate::context::AgentContext;
use crate::http::{Request, Response, ResponseKind};
use crate::network::{Network, NetworkError};
use crate::notify::{NotificationRecord, NotificationSurface, NotifyError};

enum Reply {
  Respond {
    status: u16,
    kind: ResponseKind,
    body: Bytes,
  },
  Fail,
}

/// Scripted network keyed by URL. Unscripted URLs fail like an offline fetch.
#[derive(Default)]
pub struct FakeNetwork {
  replies: Mutex<HashMap<String, Reply>>,
  calls: AtomicUsize,
}

impl FakeNetwork {
  pub fn respond(&self, url: &str, status: u16, kind: ResponseKind, body: &'static str) {
    self.replies.lock().unwrap().insert(
      normalize(url),
      Reply::Respond {
        status,
        kind,
        body: Bytes::from_static(body.as_bytes()),
      },
    );
  }

  pub fn fail(&self, url: &str) {
    self.replies.lock().unwrap().insert(normalize(url), Reply::Fail);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

fn normalize(url: &str) -> String {
  Url::parse(url).unwrap().to_string()
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let replies = self.replies.lock().unwrap();
    match replies.get(request.url().as_str()) {
      Some(Reply::Respond { status, kind, body }) => Ok(
        Response::new(*status, *kind)
          .with_url(request.url().clone())
          .with_body(body.clone()),
      ),
      Some(Reply::Fail) => Err(NetworkError::new(request.url(), "offline")),
      None => Err(NetworkError::new(request.url(), "no scripted reply")),
    }
  }
}

/// In-memory SQLite store that counts reads and writes.
pub struct CountingStore {
  inner: SqliteStorage,
  reads: AtomicUsize,
  writes: AtomicUsize,
  fail_writes: AtomicBool,
}

impl CountingStore {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      reads: AtomicUsize::new(0),
      writes: AtomicUsize::new(0),
      fail_writes: AtomicBool::new(false),
    }
  }

  /// The wrapped store, for arranging and asserting without counting.
  pub fn inner(&self) -> &SqliteStorage {
    &self.inner
  }

  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  /// Make every later write fail as if the quota were exhausted.
  pub fn fail_writes(&self) {
    self.fail_writes.store(true, Ordering::SeqCst);
  }

  fn write(&self) -> Result<(), StoreError> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "quota exceeded",
      )));
    }
    Ok(())
  }

  fn read(&self) {
    self.reads.fetch_add(1, Ordering::SeqCst);
  }
}

#[async_trait]
impl StoreManager for CountingStore {
  async fn open(&self, name: &str) -> Result<(), StoreError> {
    self.write()?;
    self.inner.open(name).await
  }

  async fn delete(&self, name: &str) -> Result<bool, StoreError> {
    self.write()?;
    self.inner.delete(name).await
  }

  async fn list(&self) -> Result<Vec<String>, StoreError> {
    self.read();
    self.inner.list().await
  }

  async fn put(
    &self,
    store: &str,
    key: &RequestKey,
    response: &CachedResponse,
  ) -> Result<(), StoreError> {
    self.write()?;
    self.inner.put(store, key, response).await
  }

  async fn put_all(
    &self,
    store: &str,
    entries: &[(RequestKey, CachedResponse)],
  ) -> Result<(), StoreError> {
    self.write()?;
    self.inner.put_all(store, entries).await
  }

  async fn get(&self, key: &RequestKey) -> Result<Option<CachedResponse>, StoreError> {
    self.read();
    self.inner.get(key).await
  }

  async fn get_in(
    &self,
    store: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedResponse>, StoreError> {
    self.read();
    self.inner.get_in(store, key).await
  }

  async fn keys(&self, store: &str) -> Result<Vec<RequestKey>, StoreError> {
    self.read();
    self.inner.keys(store).await
  }
}

/// Records shown and closed notifications.
#[derive(Default)]
pub struct RecordingSurface {
  shown: Mutex<Vec<NotificationRecord>>,
  closed: AtomicUsize,
}

impl RecordingSurface {
  pub fn shown(&self) -> Vec<NotificationRecord> {
    self.shown.lock().unwrap().clone()
  }

  pub fn closed(&self) -> usize {
    self.closed.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl NotificationSurface for RecordingSurface {
  async fn show(&self, notification: &NotificationRecord) -> Result<(), NotifyError> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }

  fn close(&self, _notification: &NotificationRecord) {
    self.closed.fetch_add(1, Ordering::SeqCst);
  }
}

/// Records claims, broadcasts and opened windows.
#[derive(Default)]
pub struct RecordingClients {
  open_pages: AtomicUsize,
  claims: AtomicUsize,
  messages: Mutex<Vec<ClientMessage>>,
  opened: Mutex<Vec<String>>,
  fail_broadcasts: AtomicBool,
}

impl RecordingClients {
  pub fn set_open_pages(&self, pages: usize) {
    self.open_pages.store(pages, Ordering::SeqCst);
  }

  pub fn fail_broadcasts(&self) {
    self.fail_broadcasts.store(true, Ordering::SeqCst);
  }

  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }

  pub fn messages(&self) -> Vec<ClientMessage> {
    self.messages.lock().unwrap().clone()
  }

  pub fn opened(&self) -> Vec<String> {
    self.opened.lock().unwrap().clone()
  }
}

#[async_trait]
impl Clients for RecordingClients {
  async fn claim(&self) -> Result<usize, ClientError> {
    self.claims.fetch_add(1, Ordering::SeqCst);
    Ok(self.open_pages.load(Ordering::SeqCst))
  }

  async fn post_message(&self, message: &ClientMessage) -> Result<usize, ClientError> {
    if self.fail_broadcasts.load(Ordering::SeqCst) {
      return Err(ClientError("no listeners".to_string()));
    }
    self.messages.lock().unwrap().push(message.clone());
    Ok(self.open_pages.load(Ordering::SeqCst))
  }

  async fn open_window(&self, url: &str) -> Result<(), ClientError> {
    self.opened.lock().unwrap().push(url.to_string());
    Ok(())
  }
}

/// A context wired entirely to fakes, with handles to each fake.
pub struct TestHarness {
  pub ctx: AgentContext,
  pub store: Arc<CountingStore>,
  pub network: Arc<FakeNetwork>,
  pub surface: Arc<RecordingSurface>,
  pub clients: Arc<RecordingClients>,
}

impl TestHarness {
  pub fn new() -> Self {
    Self::with_config(Config::default())
  }

  pub fn with_assets(assets: &[&str]) -> Self {
    Self::with_config(Config {
      shell_assets: assets.iter().map(|s| s.to_string()).collect(),
      ..Config::default()
    })
  }

  pub fn with_config(config: Config) -> Self {
    let store = Arc::new(CountingStore::new());
    let network = Arc::new(FakeNetwork::default());
    let surface = Arc::new(RecordingSurface::default());
    let clients = Arc::new(RecordingClients::default());

    let ctx = AgentContext {
      config: Arc::new(config),
      store: store.clone(),
      network: network.clone(),
      notifications: surface.clone(),
      clients: clients.clone(),
    };

    Self {
      ctx,
      store,
      network,
      surface,
      clients,
    }
  }
}
