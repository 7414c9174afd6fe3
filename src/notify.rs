//! Push delivery and notification click routing.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::NotificationDefaults;
use crate::context::AgentContext;

/// Body of a server push. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
  pub title: Option<String>,
  pub message: Option<String>,
  pub icon: Option<String>,
  pub url: Option<String>,
}

impl PushPayload {
  /// Decode raw push data. Absent, empty or malformed data yields an empty
  /// payload so that every field falls back to its default. Fields are read
  /// one by one: a field that is not a string is dropped on its own.
  pub fn decode(data: Option<&[u8]>) -> Self {
    let Some(data) = data.filter(|d| !d.iter().all(u8::is_ascii_whitespace)) else {
      return Self::default();
    };

    let fields = match serde_json::from_slice::<Value>(data) {
      Ok(Value::Object(fields)) => fields,
      Ok(Value::Null) => return Self::default(),
      Ok(other) => {
        warn!(payload = %other, "push payload is not an object, using defaults");
        return Self::default();
      }
      Err(e) => {
        warn!(error = %e, "malformed push payload, using defaults");
        return Self::default();
      }
    };

    let field = |name: &str| match fields.get(name) {
      None | Some(Value::Null) => None,
      Some(Value::String(s)) => Some(s.clone()),
      Some(other) => {
        warn!(field = name, value = %other, "ignoring non-string push field");
        None
      }
    };

    Self {
      title: field("title"),
      message: field("message"),
      icon: field("icon"),
      url: field("url"),
    }
  }
}

/// Fixed actions offered on every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
  View,
  Dismiss,
}

impl NotificationAction {
  pub const ALL: [NotificationAction; 2] = [NotificationAction::View, NotificationAction::Dismiss];

  pub fn id(&self) -> &'static str {
    match self {
      Self::View => "view",
      Self::Dismiss => "dismiss",
    }
  }

  pub fn title(&self) -> &'static str {
    match self {
      Self::View => "View Story",
      Self::Dismiss => "Dismiss",
    }
  }

  pub fn from_id(id: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|a| a.id() == id)
  }
}

impl Serialize for NotificationAction {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let mut action = serializer.serialize_struct("NotificationAction", 2)?;
    action.serialize_field("action", self.id())?;
    action.serialize_field("title", self.title())?;
    action.end()
  }
}

/// A notification handed to the OS surface. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRecord {
  pub title: String,
  pub body: String,
  pub icon: String,
  /// Navigation target opened by the `view` action
  pub url: String,
  pub actions: [NotificationAction; 2],
}

impl NotificationRecord {
  /// Fill every absent or empty field from `defaults`.
  pub fn build(payload: PushPayload, defaults: &NotificationDefaults) -> Self {
    let or_default = |value: Option<String>, default: &String| {
      value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.clone())
    };

    Self {
      title: or_default(payload.title, &defaults.title),
      body: or_default(payload.message, &defaults.body),
      icon: or_default(payload.icon, &defaults.icon),
      url: or_default(payload.url, &defaults.url),
      actions: NotificationAction::ALL,
    }
  }
}

#[derive(Debug, Error)]
#[error("notification surface failed: {0}")]
pub struct NotifyError(pub String);

/// OS notification surface.
#[async_trait]
pub trait NotificationSurface: Send + Sync {
  /// Display a notification, resolving once the surface has accepted it.
  async fn show(&self, notification: &NotificationRecord) -> Result<(), NotifyError>;

  fn close(&self, notification: &NotificationRecord);
}

/// Notification surface for the command line.
pub struct ConsoleSurface;

#[async_trait]
impl NotificationSurface for ConsoleSurface {
  async fn show(&self, notification: &NotificationRecord) -> Result<(), NotifyError> {
    let json = serde_json::to_string_pretty(notification).map_err(|e| NotifyError(e.to_string()))?;
    println!("{}", json);
    Ok(())
  }

  fn close(&self, notification: &NotificationRecord) {
    debug!(title = %notification.title, "notification closed");
  }
}

/// What a notification click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// A window was opened at the target URL
  Opened(String),
  Dismissed,
  /// No action id, or one this agent does not offer
  Ignored,
}

/// Handle a push: decode, build and display. Resolves after the display call
/// settles.
pub async fn on_push(ctx: &AgentContext, data: Option<&[u8]>) -> Result<NotificationRecord> {
  let payload = PushPayload::decode(data);
  let notification = NotificationRecord::build(payload, &ctx.config.notification);

  ctx
    .notifications
    .show(&notification)
    .await
    .map_err(|e| eyre!("Failed to display notification: {}", e))?;
  debug!(title = %notification.title, url = %notification.url, "notification shown");

  Ok(notification)
}

/// Handle a click on a notification or one of its actions.
pub async fn on_click(
  ctx: &AgentContext,
  notification: &NotificationRecord,
  action: Option<&str>,
) -> Result<ClickOutcome> {
  ctx.notifications.close(notification);

  match action.and_then(NotificationAction::from_id) {
    Some(NotificationAction::View) => {
      ctx
        .clients
        .open_window(&notification.url)
        .await
        .map_err(|e| eyre!("Failed to open {}: {}", notification.url, e))?;
      Ok(ClickOutcome::Opened(notification.url.clone()))
    }
    Some(NotificationAction::Dismiss) => {
      debug!("notification dismissed");
      Ok(ClickOutcome::Dismissed)
    }
    None => Ok(ClickOutcome::Ignored),
  }
}
