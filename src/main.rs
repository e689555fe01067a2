mod cache;
mod config;
mod db;
mod event;
mod net;
mod server;
mod worker;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::event::{EventHandler, EventOutcome, WorkerEvent};
use crate::net::HttpNetwork;
use crate::worker::{LogSurface, WindowClients, Worker};

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "An offline-first caching proxy for web applications")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Upstream origin to front
  #[arg(short, long)]
  origin: Option<String>,

  /// Address to listen on
  #[arg(short, long)]
  listen: Option<SocketAddr>,

  /// Also write logs to a daily-rotated file in this directory
  #[arg(long)]
  log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Keep the guard alive for the lifetime of the program
  let _guard = init_tracing(args.log_dir.as_deref())?;

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override origin and listen address if specified on command line
  if let Some(origin) = args.origin {
    config.origin = origin;
    config.origin_url()?;
  }
  if let Some(listen) = args.listen {
    config.listen = listen;
  }

  let db = db::Database::open(config.cache.database.as_deref())?;
  let network = Arc::new(HttpNetwork::new(config.request_timeout())?);
  let worker = Worker::new(
    &config,
    db,
    network.clone(),
    Arc::new(LogSurface),
    Arc::new(WindowClients::new()),
  )?;

  info!("Installing worker for {}", config.origin);
  if let EventOutcome::Failed(e) = worker.dispatch(WorkerEvent::Install).await {
    warn!("Serving without interception: {}", e);
  }

  // Background events: connectivity changes and periodic refresh
  let mut events = EventHandler::new();
  if config.sync.probe_interval_secs > 0 {
    events.spawn_connectivity_probe(
      network,
      config.origin_url()?,
      Duration::from_secs(config.sync.probe_interval_secs),
      config.sync.tag.clone(),
    );
  }
  if config.periodic.interval_secs > 0 {
    events.spawn_periodic(
      Duration::from_secs(config.periodic.interval_secs),
      config.periodic.tag.clone(),
    );
  }

  let background = worker.clone();
  tokio::spawn(async move {
    while let Some(event) = events.next().await {
      let worker = background.clone();
      tokio::spawn(async move {
        worker.dispatch(event).await;
      });
    }
  });

  let app = server::build_router(worker).layer(TraceLayer::new_for_http());

  let listener = tokio::net::TcpListener::bind(config.listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.listen, e))?;
  info!("Listening on {}", config.listen);

  axum::serve(listener, app)
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  Ok(())
}

fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", env!("CARGO_CRATE_NAME"))));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "offline-worker.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  Ok(guard)
}
