mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use gavel_execution::{
    AuctionEngine, BroadcastNotifier, Cache, Collaborators, KeyRing, LifecycleScheduler,
    MemoryCache, MemoryStore, RedisCache, SchedulerMetrics, SystemClock,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{LogFormat, ServiceConfig, ValidatedConfig, SEALED_BID_SECRET_ENV};

#[derive(Parser, Debug)]
#[command(author, version, about = "Gavel auction engine service", long_about = None)]
struct Args {
    /// Path to the YAML service configuration.
    #[arg(long)]
    config: String,

    /// Overrides `port` from the configuration file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Validate the configuration and exit.
    #[arg(long)]
    dry_run: bool,
}

struct AppState {
    registry: Registry,
}

fn load_config(args: &Args) -> anyhow::Result<ValidatedConfig> {
    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("Could not read config file {}", args.config))?;
    let mut config: ServiceConfig =
        serde_yaml::from_str(&raw).context("Could not parse config file")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    config.override_active_secret(std::env::var(SEALED_BID_SECRET_ENV).ok());
    if args.dry_run {
        println!("{:#?}", config.redacted_debug());
    }
    Ok(config.validate()?)
}

fn build_cache(config: &ValidatedConfig) -> anyhow::Result<Arc<dyn Cache>> {
    match &config.redis_url {
        Some(url) => {
            let cache = RedisCache::new(url, config.cache_prefix.clone())
                .context("Invalid redis_url")?;
            info!("using redis cache");
            Ok(Arc::new(cache))
        }
        None => {
            warn!("redis_url not set; caching in process memory");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    if args.dry_run {
        println!("config ok");
        return Ok(());
    }

    let logs = tracing_subscriber::fmt().with_max_level(config.log_level);
    match config.log_format {
        LogFormat::Json => logs.json().init(),
        LogFormat::Text => logs.init(),
    }

    let keys = KeyRing::from_secrets(
        config
            .sealed_bid_keys
            .iter()
            .map(|key| (key.id.as_str(), key.secret.as_str())),
    )
    .context("Could not derive sealed bid keys")?;
    let notifier = Arc::new(BroadcastNotifier::new(config.event_capacity));
    let engine = AuctionEngine::new(
        Collaborators {
            store: Arc::new(MemoryStore::new()),
            keys: Arc::new(keys),
            notifier: notifier.clone(),
            cache: build_cache(&config)?,
            clock: Arc::new(SystemClock),
        },
        config.engine,
    )
    .context("Invalid engine config")?;
    let engine = Arc::new(engine);

    let mut registry = Registry::with_prefix("gavel");
    let metrics = Arc::new(SchedulerMetrics::register(&mut registry));
    let scheduler = LifecycleScheduler::new(engine.clone(), config.scheduler, metrics)
        .context("Invalid scheduler config")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let mut events = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => info!(topic = %envelope.topic, event = envelope.event.name(), "event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    let state = Arc::new(AppState { registry });
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not bind {addr}"))?;
    info!(%addr, "auction service listening");

    let mut server_shutdown = shutdown_tx.subscribe();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    });

    let signal = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {err}");
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    server.await.context("server failed")?;
    signal.abort();
    scheduler_task.await.context("scheduler task panicked")?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let mut body = String::new();
    if let Err(err) = encode(&mut body, &state.registry) {
        error!("metrics encoding failed: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response()
}
