mod cache;
mod clients;
mod config;
mod context;
mod event;
mod http;
mod lifecycle;
mod logging;
mod network;
mod notify;
mod router;
#[cfg(test)]
mod testing;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use cache::SqliteStorage;
use clients::ConsoleClients;
use context::AgentContext;
use event::{Agent, AgentEvent, EventOutcome};
use http::{Method, Request, Response};
use network::HttpNetwork;
use notify::{ClickOutcome, ConsoleSurface, NotificationRecord, PushPayload};
use router::{FetchOutcome, ResponseSource};

#[derive(Parser, Debug)]
#[command(name = "story-sw")]
#[command(about = "Offline-first request interception agent")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/story-sw/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache the shell assets for the configured version
  Install,
  /// Delete stores from other versions and take control
  Activate,
  /// Route a request through the agent and write the body to stdout
  Fetch {
    url: String,
    #[arg(short, long, value_enum, default_value_t = Method::Get)]
    method: Method,
  },
  /// Display a notification for a push payload (JSON)
  Push { payload: Option<String> },
  /// Click a notification that targets URL
  Click {
    url: String,
    /// Action id (view, dismiss); omit for a tap on the body
    #[arg(short, long)]
    action: Option<String>,
  },
  /// List stores and their entries
  Stores,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let data_dir = config::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  let _log_guard = logging::init(&data_dir)?;

  let store = match &config.database {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  let network = HttpNetwork::new(&config)?;

  let ctx = AgentContext {
    config: Arc::new(config),
    store: Arc::new(store),
    network: Arc::new(network),
    notifications: Arc::new(ConsoleSurface),
    clients: Arc::new(ConsoleClients),
  };

  let event = match args.command {
    Command::Stores => return print_stores(&ctx).await,
    Command::Install => AgentEvent::Install,
    Command::Activate => AgentEvent::Activate,
    Command::Fetch { url, method } => AgentEvent::Fetch(Request::parse(method, &url)?),
    Command::Push { payload } => AgentEvent::Push(payload.map(Bytes::from)),
    Command::Click { url, action } => AgentEvent::NotificationClick {
      notification: NotificationRecord::build(
        PushPayload {
          url: Some(url),
          ..Default::default()
        },
        &ctx.config.notification,
      ),
      action,
    },
  };
  let passthrough = match &event {
    AgentEvent::Fetch(request) => Some(request.clone()),
    _ => None,
  };

  let (handle, task) = event::spawn(Agent::new(ctx.clone()));
  let outcome = handle.send(event).await;
  drop(handle);
  let agent = task.await?;
  tracing::debug!(state = ?agent.worker_state(), "agent stopped");

  match outcome? {
    EventOutcome::Installed(report) => {
      println!(
        "installed {} assets into {} (api store {})",
        report.assets, report.shell_store, report.api_store
      );
      if report.skip_waiting {
        println!("activation will not wait for open pages of the previous version");
      }
    }
    EventOutcome::Activated(report) => {
      for name in &report.deleted {
        println!("deleted {}", name);
      }
      println!(
        "active: {} ({} clients claimed, {} notified)",
        report.kept.join(", "),
        report.claimed,
        report.notified
      );
    }
    EventOutcome::Fetched(FetchOutcome::Respond {
      response,
      source,
      write,
    }) => {
      write_response(response, Some(source))?;
      // Let the store copy land before the process exits
      if let Some(write) = write {
        write.settle().await;
      }
    }
    EventOutcome::Fetched(FetchOutcome::Passthrough) => {
      // Not intercepted: take the normal network path
      let request = passthrough.ok_or_else(|| eyre!("Passthrough without a request"))?;
      let response = ctx.network.fetch(&request).await?;
      write_response(response, None)?;
    }
    EventOutcome::Displayed(record) => {
      tracing::info!(title = %record.title, url = %record.url, "notification displayed");
    }
    EventOutcome::Clicked(ClickOutcome::Opened(_)) => {}
    EventOutcome::Clicked(ClickOutcome::Dismissed) => println!("dismissed"),
    EventOutcome::Clicked(ClickOutcome::Ignored) => println!("closed"),
  }

  Ok(())
}

/// Status line to stderr, body to stdout.
fn write_response(response: Response, source: Option<ResponseSource>) -> Result<()> {
  let source = match source {
    Some(ResponseSource::Network) => "network",
    Some(ResponseSource::Cache) => "cache",
    Some(ResponseSource::Offline) => "offline",
    None => "passthrough",
  };
  eprintln!(
    "{} {} [{}] via {}",
    response.status(),
    response.header("content-type").unwrap_or("-"),
    response.kind().as_str(),
    source
  );

  let mut stdout = std::io::stdout().lock();
  stdout.write_all(&response.into_bytes())?;
  stdout.flush()?;
  Ok(())
}

async fn print_stores(ctx: &AgentContext) -> Result<()> {
  for name in ctx.store.list().await? {
    let keys = ctx.store.keys(&name).await?;
    println!("{} ({} entries)", name, keys.len());
    for key in keys {
      println!("  {} {}", key.method(), key.url());
    }
  }
  Ok(())
}
