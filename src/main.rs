mod cache;
mod config;
mod event;
mod sync;
mod transfer;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;
use url::Url;

use cache::{Generations, SqliteStore};
use config::Config;
use event::{SyncTrigger, WorkerEvent};
use sync::{SqliteQueue, TRANSFER_SYNC_TAG};
use transfer::{SubmitOutcome, TransferRequest};
use worker::fetch::{FetchRequest, HttpFetcher};
use worker::{SyncOutcome, Worker};

#[derive(Parser, Debug)]
#[command(name = "mtsw")]
#[command(about = "Offline-first caching worker for the MT103 transfer form")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mtsw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the static asset list and take over immediately
  Install,
  /// Delete stale cache generations and claim open clients
  Activate,
  /// Fetch a URL through the caching strategies
  Get {
    /// Absolute URL, or a path resolved against the upstream origin
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Submit a transfer payload from a JSON file ("-" reads stdin)
  Submit { file: PathBuf },
  /// Trigger a sync for the given tag
  Sync {
    #[arg(long, default_value = TRANSFER_SYNC_TAG)]
    tag: String,
  },
  /// Watch connectivity and sync whenever it comes back
  Watch {
    /// Probe interval in seconds
    #[arg(long, default_value_t = 30)]
    interval: u64,
  },
  /// Show entry counts per cache generation
  CacheInfo,
  /// Delete every cache generation
  ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mtsw=info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let worker = build_worker(&config)?;

  match args.command {
    Command::Install => {
      let cached = worker.on_install().await?;
      println!("installed {} static assets", cached);
    }
    Command::Activate => {
      let deleted = worker.on_activate()?;
      if deleted.is_empty() {
        println!("no stale generations");
      } else {
        for name in deleted {
          println!("deleted {}", name);
        }
      }
    }
    Command::Get { url, navigate } => {
      let url = resolve_url(&config, &url)?;
      let request = if navigate {
        FetchRequest::navigate(url)
      } else {
        FetchRequest::get(url)
      };

      let (tx, rx) = oneshot::channel();
      worker
        .dispatch(WorkerEvent::Fetch {
          request,
          reply: tx,
        })
        .await?;

      let served = rx.await.map_err(|_| eyre!("Worker dropped the reply"))??;
      println!("HTTP {} ({:?})", served.response.status, served.source);
      println!("{}", served.response.body_text());
    }
    Command::Submit { file } => {
      let payload = read_payload(&file)?;
      let transfer: TransferRequest = serde_json::from_str(&payload)
        .map_err(|e| eyre!("Invalid transfer payload: {}", e))?;

      let client = worker.transfer_client();
      match client.submit(&transfer).await? {
        SubmitOutcome::Accepted(ack) => {
          println!("accepted: {} ({})", ack.transaction_id, ack.status);
        }
        SubmitOutcome::Rejected { status, error } => {
          println!("rejected ({}): {}", status, error);
        }
        SubmitOutcome::Queued { id } => match id {
          Some(id) => println!("offline: queued as submission {}", id),
          None => println!("offline: could not queue, submission lost"),
        },
      }
    }
    Command::Sync { tag } => match worker.on_sync(&tag).await? {
      SyncOutcome::Drained(report) => {
        println!(
          "delivered {}/{} queued transfers, {} remaining",
          report.delivered, report.attempted, report.remaining
        );
      }
      SyncOutcome::Refreshed(report) => {
        println!(
          "refreshed {} cached assets, {} failed",
          report.refreshed, report.failed
        );
      }
      SyncOutcome::Ignored => println!("unknown sync tag: {}", tag),
    },
    Command::Watch { interval } => {
      let mut trigger = SyncTrigger::new(config.health_url()?, Duration::from_secs(interval));
      while let Some(event) = trigger.next().await {
        worker.dispatch(event).await?;
      }
    }
    Command::CacheInfo => {
      let (tx, rx) = oneshot::channel();
      worker
        .dispatch(WorkerEvent::Message {
          command: serde_json::json!({"type": "GET_CACHE_INFO"}),
          reply: Some(tx),
        })
        .await?;

      let info = rx.await.map_err(|_| eyre!("Worker dropped the reply"))?;
      match info.as_object() {
        Some(map) if !map.is_empty() => {
          for (name, count) in map {
            println!("{}: {}", name, count);
          }
        }
        _ => println!("cache is empty"),
      }
    }
    Command::ClearCache => {
      worker
        .dispatch(WorkerEvent::Message {
          command: serde_json::json!({"type": "CLEAR_CACHE"}),
          reply: None,
        })
        .await?;
    }
  }

  Ok(())
}

fn build_worker(config: &Config) -> Result<Worker<SqliteStore, HttpFetcher, SqliteQueue>> {
  let db_path = config.db_path()?;
  let store = SqliteStore::open_at(&db_path)?;
  let queue = SqliteQueue::open_at(&db_path)?;
  let fetcher = HttpFetcher::new()?;

  Ok(Worker::new(
    store,
    fetcher,
    queue,
    Generations::for_version(&config.cache.version),
    config.asset_urls()?,
    config.offline_page_url()?,
    config.submit_url()?,
  ))
}

/// Accept either an absolute URL or a path on the upstream.
fn resolve_url(config: &Config, input: &str) -> Result<Url> {
  if input.starts_with("http://") || input.starts_with("https://") {
    return Url::parse(input).map_err(|e| eyre!("Invalid url {}: {}", input, e));
  }
  Ok(config.upstream_url()?.join(input)?)
}

fn read_payload(file: &std::path::Path) -> Result<String> {
  if file.as_os_str() == "-" {
    let mut buffer = String::new();
    std::io::stdin()
      .read_to_string(&mut buffer)
      .map_err(|e| eyre!("Failed to read stdin: {}", e))?;
    return Ok(buffer);
  }

  std::fs::read_to_string(file)
    .map_err(|e| eyre!("Failed to read payload file {}: {}", file.display(), e))
}
