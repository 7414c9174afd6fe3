//! Agent events and the loop that runs them one at a time.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Report, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::RequestKey;
use crate::context::AgentContext;
use crate::http::{Method, Request};
use crate::lifecycle::{ActivationReport, InstallReport, Lifecycle, WorkerState};
use crate::notify::{self, ClickOutcome, NotificationRecord};
use crate::router::{self, FetchOutcome};

/// Event type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Push,
  NotificationClick,
}

/// Events delivered to the agent
#[derive(Debug)]
pub enum AgentEvent {
  /// New deployment: populate the shell store
  Install,
  /// Take over from the previous version
  Activate,
  /// Outgoing request from the application
  Fetch(Request),
  /// Server push with optional body
  Push(Option<Bytes>),
  /// User interaction with a displayed notification
  NotificationClick {
    notification: NotificationRecord,
    action: Option<String>,
  },
}

impl AgentEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::Install => EventKind::Install,
      Self::Activate => EventKind::Activate,
      Self::Fetch(_) => EventKind::Fetch,
      Self::Push(_) => EventKind::Push,
      Self::NotificationClick { .. } => EventKind::NotificationClick,
    }
  }
}

/// Result of handling one event
#[derive(Debug)]
pub enum EventOutcome {
  Installed(InstallReport),
  Activated(ActivationReport),
  Fetched(FetchOutcome),
  Displayed(NotificationRecord),
  Clicked(ClickOutcome),
}

/// The request-interception agent: owns the current worker generation and
/// routes each event to its handler.
pub struct Agent {
  ctx: AgentContext,
  worker: Option<Lifecycle>,
}

impl Agent {
  pub fn new(ctx: AgentContext) -> Self {
    Self { ctx, worker: None }
  }

  pub fn worker_state(&self) -> Option<WorkerState> {
    self.worker.as_ref().map(Lifecycle::state)
  }

  pub async fn dispatch(&mut self, event: AgentEvent) -> Result<EventOutcome> {
    debug!(kind = ?event.kind(), "dispatching event");

    match event {
      AgentEvent::Install => self.install().await.map(EventOutcome::Installed),
      AgentEvent::Activate => self.activate().await.map(EventOutcome::Activated),
      AgentEvent::Fetch(request) => router::handle_fetch(&self.ctx, &request)
        .await
        .map(EventOutcome::Fetched)
        .map_err(Report::from),
      AgentEvent::Push(data) => notify::on_push(&self.ctx, data.as_deref())
        .await
        .map(EventOutcome::Displayed),
      AgentEvent::NotificationClick {
        notification,
        action,
      } => notify::on_click(&self.ctx, &notification, action.as_deref())
        .await
        .map(EventOutcome::Clicked),
    }
  }

  async fn install(&mut self) -> Result<InstallReport> {
    // Every install attempt is a fresh worker generation
    let mut worker = Lifecycle::new();
    let result = worker.install(&self.ctx).await;
    self.worker = Some(worker);
    Ok(result?)
  }

  async fn activate(&mut self) -> Result<ActivationReport> {
    let mut worker = match self.worker.take() {
      Some(worker) => worker,
      None => self.resume().await?,
    };
    let result = worker.activate(&self.ctx).await;
    self.worker = Some(worker);
    Ok(result?)
  }

  /// Pick up a worker installed by an earlier process.
  ///
  /// Install writes the whole asset list in one transaction, while fetches
  /// only add single entries. The install completed iff every shell asset
  /// is in the current shell store.
  async fn resume(&self) -> Result<Lifecycle> {
    let shell_store = self.ctx.config.shell_store();
    for url in self.ctx.config.shell_asset_urls()? {
      let key = RequestKey::new(Method::Get, &url);
      if self.ctx.store.get_in(&shell_store, &key).await?.is_none() {
        return Err(eyre!(
          "Version {} is not installed ({} missing from {}); run install first",
          self.ctx.config.version,
          url,
          shell_store
        ));
      }
    }
    Ok(Lifecycle::installed())
  }
}

struct Envelope {
  event: AgentEvent,
  reply: oneshot::Sender<Result<EventOutcome>>,
}

/// Sends events to a running agent loop.
#[derive(Clone)]
pub struct AgentHandle {
  tx: mpsc::UnboundedSender<Envelope>,
}

impl AgentHandle {
  /// Queue an event and wait for its outcome.
  pub async fn send(&self, event: AgentEvent) -> Result<EventOutcome> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Envelope { event, reply })
      .map_err(|_| eyre!("Agent event loop has stopped"))?;
    rx.await
      .map_err(|_| eyre!("Agent dropped the event without replying"))?
  }
}

/// Run `agent` on its own task. Events are handled strictly one after
/// another; the task hands the agent back once every handle is dropped.
pub fn spawn(agent: Agent) -> (AgentHandle, JoinHandle<Agent>) {
  let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

  let task = tokio::spawn(async move {
    let mut agent = agent;
    while let Some(Envelope { event, reply }) = rx.recv().await {
      let outcome = agent.dispatch(event).await;
      // The sender may have stopped waiting
      let _ = reply.send(outcome);
    }
    agent
  });

  (AgentHandle { tx }, task)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::StoreManager;
  use crate::http::ResponseKind;
  use crate::router::ResponseSource;
  use crate::testing::TestHarness;

  fn harness() -> TestHarness {
    let harness = TestHarness::with_assets(&["/", "/styles.css"]);
    harness.network.respond("http://localhost:8080/", 200, ResponseKind::Basic, "<html>");
    harness
      .network
      .respond("http://localhost:8080/styles.css", 200, ResponseKind::Basic, "body{}");
    harness
  }

  #[test]
  fn test_event_kinds() {
    assert_eq!(AgentEvent::Install.kind(), EventKind::Install);
    assert_eq!(AgentEvent::Push(None).kind(), EventKind::Push);
  }

  #[tokio::test]
  async fn test_full_deployment_through_event_loop() {
    let h = harness();
    h.store.inner().open("story-app-static-v2").await.unwrap();
    let (handle, task) = spawn(Agent::new(h.ctx.clone()));

    let installed = handle.send(AgentEvent::Install).await.unwrap();
    assert!(matches!(installed, EventOutcome::Installed(ref r) if r.assets == 2));

    let activated = handle.send(AgentEvent::Activate).await.unwrap();
    match activated {
      EventOutcome::Activated(report) => {
        assert_eq!(report.deleted, vec!["story-app-static-v2".to_string()])
      }
      other => panic!("unexpected outcome: {other:?}"),
    }

    // The shell is now served without the network
    h.network.fail("http://localhost:8080/styles.css");
    let request = Request::parse(Method::Get, "http://localhost:8080/styles.css").unwrap();
    match handle.send(AgentEvent::Fetch(request)).await.unwrap() {
      EventOutcome::Fetched(FetchOutcome::Respond {
        response, source, ..
      }) => {
        assert_eq!(source, ResponseSource::Cache);
        assert_eq!(response.into_bytes().as_ref(), b"body{}");
      }
      other => panic!("unexpected outcome: {other:?}"),
    }

    drop(handle);
    let agent = task.await.unwrap();
    assert_eq!(agent.worker_state(), Some(WorkerState::Activated));
  }

  #[tokio::test]
  async fn test_push_then_click_round_trip() {
    let h = harness();
    let mut agent = Agent::new(h.ctx.clone());

    let shown = match agent
      .dispatch(AgentEvent::Push(Some(Bytes::from_static(
        br#"{"title":"T","message":"M","url":"/x"}"#,
      ))))
      .await
      .unwrap()
    {
      EventOutcome::Displayed(record) => record,
      other => panic!("unexpected outcome: {other:?}"),
    };

    let clicked = agent
      .dispatch(AgentEvent::NotificationClick {
        notification: shown,
        action: Some("view".to_string()),
      })
      .await
      .unwrap();

    assert!(matches!(clicked, EventOutcome::Clicked(ClickOutcome::Opened(ref url)) if url == "/x"));
    assert_eq!(h.clients.opened(), vec!["/x".to_string()]);
    assert_eq!(h.surface.closed(), 1);
  }

  #[tokio::test]
  async fn test_reinstall_after_failure_uses_fresh_worker() {
    let h = harness();
    h.network.fail("http://localhost:8080/styles.css");
    let mut agent = Agent::new(h.ctx.clone());

    assert!(agent.dispatch(AgentEvent::Install).await.is_err());
    assert_eq!(agent.worker_state(), Some(WorkerState::Redundant));

    h.network
      .respond("http://localhost:8080/styles.css", 200, ResponseKind::Basic, "body{}");
    agent.dispatch(AgentEvent::Install).await.unwrap();
    assert_eq!(agent.worker_state(), Some(WorkerState::Installed));
  }

  #[tokio::test]
  async fn test_activate_resumes_earlier_install() {
    let h = harness();
    Agent::new(h.ctx.clone())
      .dispatch(AgentEvent::Install)
      .await
      .unwrap();

    let mut later = Agent::new(h.ctx.clone());
    later.dispatch(AgentEvent::Activate).await.unwrap();

    assert_eq!(later.worker_state(), Some(WorkerState::Activated));
  }

  #[tokio::test]
  async fn test_fetched_shell_entry_does_not_count_as_install() {
    let h = harness();
    let mut agent = Agent::new(h.ctx.clone());
    let request = Request::parse(Method::Get, "http://localhost:8080/").unwrap();
    match agent.dispatch(AgentEvent::Fetch(request)).await.unwrap() {
      EventOutcome::Fetched(FetchOutcome::Respond {
        write: Some(write), ..
      }) => write.settle().await,
      other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.store.inner().keys("story-app-static-v3").await.unwrap().len(), 1);

    let mut later = Agent::new(h.ctx.clone());
    assert!(later.dispatch(AgentEvent::Activate).await.is_err());

    assert_eq!(later.worker_state(), None);
    assert_eq!(h.clients.claims(), 0);
    assert!(h.clients.messages().is_empty());
  }

  #[tokio::test]
  async fn test_activate_without_install_fails() {
    let h = harness();
    let mut agent = Agent::new(h.ctx.clone());

    assert!(agent.dispatch(AgentEvent::Activate).await.is_err());
    assert_eq!(agent.worker_state(), None);
    assert_eq!(h.clients.claims(), 0);
  }
}
