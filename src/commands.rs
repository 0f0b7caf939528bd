//! CLI subcommands and the wiring behind them.

use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::connectivity::{Connectivity, HttpProbe, StaticConnectivity};
use crate::drainer::{DrainOutcome, QueueDrainer, SkipReason};
use crate::entity::EntityKind;
use crate::models::{decode_collection, CachedRecord, Client, Interaction, Lead, Project};
use crate::router::OfflineRouter;
use crate::store::{LocalStore, QueueId, SqliteStore};
use crate::transport::{HttpTransport, Request, Response, Transport};

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Fetch a path, serving from the cache when offline
  Get {
    /// Request path, e.g. /leads/
    path: String,
    /// Also print response headers
    #[arg(short, long)]
    verbose: bool,
  },
  /// Send a write, queueing it when offline
  Send {
    /// HTTP method (POST, PUT, DELETE)
    method: String,
    /// Request path, e.g. /leads/42
    path: String,
    /// JSON body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Replay queued writes once
  Drain,
  /// Replay queued writes periodically until interrupted
  Watch {
    /// Seconds between passes (defaults to drain.interval_secs)
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,
  },
  /// Inspect or edit the offline queue
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
  /// Inspect cached collections
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// Show connectivity, queue and cache state
  Status,
}

#[derive(Debug, Subcommand)]
pub enum QueueAction {
  /// List queued writes in replay order
  List,
  /// Discard a queued write
  Remove { id: QueueId },
}

#[derive(Debug, Subcommand)]
pub enum CacheAction {
  /// Print the cached records of one kind
  Show {
    /// leads, clients, projects or interactions
    kind: EntityKind,
  },
}

/// Everything a command needs, built once from config.
pub struct App {
  store: Arc<SqliteStore>,
  connectivity: Arc<dyn Connectivity>,
  router: OfflineRouter<SqliteStore>,
  drainer: QueueDrainer<SqliteStore>,
  drain_interval: Duration,
}

impl App {
  pub fn new(config: &Config, force_offline: bool) -> Result<Self> {
    let db_path = match &config.database_path {
      Some(path) => path.clone(),
      None => SqliteStore::default_path()?,
    };
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.api)?);
    let connectivity: Arc<dyn Connectivity> = if force_offline {
      Arc::new(StaticConnectivity::new(false))
    } else {
      Arc::new(HttpProbe::new(&config.connectivity, &config.api.base_url)?)
    };

    Ok(Self {
      router: OfflineRouter::new(store.clone(), transport.clone(), connectivity.clone()),
      drainer: QueueDrainer::new(store.clone(), transport, connectivity.clone()),
      store,
      connectivity,
      drain_interval: Duration::from_secs(config.drain.interval_secs),
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Get { path, verbose } => {
        let response = self.router.request(Request::get(path)).await?;
        if verbose {
          eprint!("{}", format_headers(&response));
        }
        print_response(&response);
      }
      Command::Send { method, path, data } => {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
          .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
        let mut request = Request::new(method, path);
        if let Some(data) = data {
          request = request.with_body(data);
        }
        let response = self.router.request(request).await?;
        print_response(&response);
      }
      Command::Drain => self.drain_once().await?,
      Command::Watch { interval } => {
        let every = interval
          .map(Duration::from_secs)
          .unwrap_or(self.drain_interval);
        println!("Draining every {}s, press Ctrl-C to stop", every.as_secs());
        self
          .drainer
          .run_until(every, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
              warn!(error = %e, "Failed to listen for Ctrl-C");
            }
          })
          .await?;
      }
      Command::Queue { action } => match action {
        QueueAction::List => self.list_queue()?,
        QueueAction::Remove { id } => {
          self.store.remove_queued(id)?;
          println!("Removed queued write {}", id);
        }
      },
      Command::Cache { action } => match action {
        CacheAction::Show { kind } => self.show_cache(kind)?,
      },
      Command::Status => self.status().await?,
    }

    Ok(())
  }

  async fn drain_once(&self) -> Result<()> {
    match self.drainer.drain().await? {
      DrainOutcome::Skipped(SkipReason::Offline) => println!("Offline, nothing sent"),
      DrainOutcome::Skipped(SkipReason::AlreadyRunning) => println!("A drain is already running"),
      DrainOutcome::Completed(report) => {
        println!(
          "Delivered {}, failed {}",
          report.delivered.len(),
          report.failed.len()
        );
        for failure in &report.failed {
          println!(
            "  #{} {} {}: {}",
            failure.id, failure.method, failure.path, failure.reason
          );
        }
      }
    }
    Ok(())
  }

  fn list_queue(&self) -> Result<()> {
    let queue = self.store.list_queue()?;
    if queue.is_empty() {
      println!("Queue is empty");
    }
    for entry in &queue {
      let m = &entry.mutation;
      println!(
        "{:>5}  {}  {:<6} {}  {}",
        entry.id,
        m.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
        m.method,
        m.path,
        m.body
      );
    }
    Ok(())
  }

  fn show_cache(&self, kind: EntityKind) -> Result<()> {
    let records = self.store.read_collection(kind)?;
    match kind {
      EntityKind::Lead => print_records::<Lead>(records),
      EntityKind::Client => print_records::<Client>(records),
      EntityKind::Project => print_records::<Project>(records),
      EntityKind::Interaction => print_records::<Interaction>(records),
    }
  }

  async fn status(&self) -> Result<()> {
    let online = self.connectivity.is_online().await;
    println!("Network:  {}", if online { "online" } else { "offline" });
    println!("Queued:   {}", self.store.queue_len()?);

    for kind in EntityKind::ALL {
      let count = self.store.read_collection(kind)?.len();
      match self.store.refreshed_at(kind)? {
        Some(at) => println!(
          "{:<13} {} records, refreshed {}",
          kind,
          count,
          at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("{:<13} never fetched", kind),
      }
    }
    Ok(())
  }
}

fn print_records<T: CachedRecord>(records: Vec<Value>) -> Result<()> {
  let records = decode_collection::<T>(records)?;
  if records.is_empty() {
    println!("No cached {}", T::kind());
  }
  for record in &records {
    println!("{:>6}  {}", record.id(), record.label());
  }
  Ok(())
}

/// One `name: value` line per header value, in response order.
fn format_headers(response: &Response) -> String {
  response
    .headers
    .iter()
    .map(|(name, value)| format!("{}: {}\n", name, String::from_utf8_lossy(value.as_bytes())))
    .collect()
}

fn print_response(response: &Response) {
  eprintln!("{} ({:?})", response.status, response.source);
  match response.json::<Value>() {
    Ok(body) => println!(
      "{}",
      serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
    ),
    Err(_) => println!("{}", response.text()),
  }
}
