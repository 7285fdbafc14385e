mod cache;
mod config;
mod event;
mod logging;
mod network;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use cache::{CacheStorage, RequestKey, ResponseSource, ServedResponse, SqliteStorage};
use config::Config;
use event::EventHandler;
use network::{Destination, HttpNetwork, Network, Request};
use worker::{
  ActivateReport, ControlMessage, FetchOutcome, InstallReport, LifecycleState, MessageOutcome,
  OfflineCacheManager,
};

#[derive(Parser, Debug)]
#[command(name = "saathi-cache")]
#[command(about = "Offline cache manager for the Nyaay Saathi chat front end")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/saathi-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Page origin, overrides the config file
  #[arg(short, long)]
  origin: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the resource set into the current generation's store
  Install,
  /// Delete stale generations and take control
  Activate,
  /// Install, then activate
  Lifecycle,
  /// Route one request through the fetch policy
  Fetch {
    /// Absolute URL, or a path relative to the origin
    target: String,
    /// Treat the request as a full page navigation
    #[arg(long)]
    navigate: bool,
    /// Resource kind (guessed from the extension if omitted)
    #[arg(long, value_enum)]
    destination: Option<Destination>,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Write the response body to this file
    #[arg(long)]
    output: Option<PathBuf>,
  },
  /// Post a JSON control message, e.g. '{"type":"INIT_OFFLINE_DB"}'
  Message { json: String },
  /// Report an uncaught page error to the controlling generation
  ReportError { message: String },
  /// List cache stores and their entry counts
  Stores,
  /// Show the current generation's entry for a GET request
  Show {
    /// Absolute URL, or a path relative to the origin
    target: String,
  },
}

type Manager = OfflineCacheManager<SqliteStorage, HttpNetwork>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref(), args.origin.as_deref())?;
  let _log_guard = logging::init(&config.log_dir()?)?;
  info!(origin = %config.origin, store = %config.cache.name, "saathi-cache starting");

  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = Arc::new(HttpNetwork::new(&config.origin)?);
  let manager = Arc::new(OfflineCacheManager::new(
    config.origin.clone(),
    config.cache.clone(),
    Arc::clone(&storage),
    Arc::clone(&network),
  ));

  match args.command {
    Command::Install => print_install(&manager.on_install().await),
    Command::Activate => print_activate(&manager.on_activate().await),
    Command::Lifecycle => {
      let handler = EventHandler::new();
      let (installed, activated) = handler.register(manager).await?;
      print_install(&installed);
      print_activate(&activated);
      match handler.controller().await {
        Some(current) if current.state() == LifecycleState::Active => {
          info!(store = %current.cache_name(), "Controlling clients");
        }
        _ => warn!("Registration finished without an active controller"),
      }
    }
    Command::Fetch {
      target,
      navigate,
      destination,
      method,
      output,
    } => {
      let request = build_request(&config.origin, &target, navigate, destination, &method)?;
      let handler = start(manager).await;

      let served = match handler.fetch(request.clone()).await? {
        FetchOutcome::Respond(served) => served,
        FetchOutcome::Passthrough => {
          println!("passthrough (not intercepted)");
          ServedResponse::from_network(network.fetch(&request).await?)
        }
      };
      print_served(&served);

      if let Some(path) = output {
        std::fs::write(&path, &served.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
      }
    }
    Command::Message { json } => {
      let data: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON message: {}", e))?;
      let handler = start(manager).await;

      match handler.post_message(data).await? {
        MessageOutcome::Acknowledged(ControlMessage::InitOfflineDb) => {
          println!("acknowledged INIT_OFFLINE_DB")
        }
        MessageOutcome::Ignored => println!("ignored"),
      }
    }
    Command::ReportError { message } => {
      let handler = start(manager).await;
      handler.report_error(message).await?;
      println!("logged");
    }
    Command::Stores => {
      for name in storage.store_names()? {
        let marker = if name == config.cache.name { "*" } else { " " };
        println!(
          "{} {} ({} entries)",
          marker,
          name,
          storage.entry_count(&name)?
        );
      }
    }
    Command::Show { target } => {
      let request = build_request(&config.origin, &target, false, None, "GET")?;
      let key = RequestKey::from_request(&request);

      match storage.match_in(&config.cache.name, &key)? {
        Some(cached) => {
          println!("{} in {}", key, cached.store);
          print_served(&ServedResponse::from_cache(cached));
        }
        None => println!("{} not cached in {}", key, config.cache.name),
      }
    }
  }

  Ok(())
}

/// Event runtime controlled by the configured generation, if installed.
async fn start(manager: Arc<Manager>) -> EventHandler<SqliteStorage, HttpNetwork> {
  let handler = EventHandler::new();
  if let Err(e) = handler.adopt(manager).await {
    warn!(error = %e, "No active generation; requests pass through");
  }
  handler
}

fn build_request(
  origin: &Url,
  target: &str,
  navigate: bool,
  destination: Option<Destination>,
  method: &str,
) -> Result<Request> {
  let url = match Url::parse(target) {
    Ok(url) => url,
    Err(_) => origin
      .join(target)
      .map_err(|e| eyre!("Invalid target '{}': {}", target, e))?,
  };
  let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let mut request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };
  if let Some(destination) = destination {
    request = request.with_destination(destination);
  }

  Ok(request.with_method(method))
}

fn print_install(report: &InstallReport) {
  println!(
    "installed {}: {}/{} resources cached",
    report.store,
    report.cached(),
    report.outcomes.len()
  );
  for outcome in report.failed() {
    println!(
      "  failed {}: {}",
      outcome.path,
      outcome.error.as_deref().unwrap_or_default()
    );
  }
}

fn print_activate(report: &ActivateReport) {
  println!("activated: {} stale store(s) deleted", report.deleted.len());
  for name in &report.deleted {
    println!("  deleted {}", name);
  }
  for (name, error) in &report.failed {
    println!("  could not delete {}: {}", name, error);
  }
}

fn print_served(served: &ServedResponse) {
  let response = &served.response;
  println!("{} {} via {}", response.status, response.url, served.source);
  if served.source == ResponseSource::OfflineFallback {
    println!("  offline: substituted a cached stand-in");
  }
  if let Some(content_type) = response.header("content-type") {
    println!("  content-type: {}", content_type);
  }
  println!("  {} bytes", response.body.len());
  if let Some(cached_at) = served.cached_at {
    println!("  cached at {}", cached_at.format("%Y-%m-%d %H:%M:%S UTC"));
  }
}
