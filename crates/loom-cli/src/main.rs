//! loom - scan scheduler daemon.
//!
//! Wires the HTTP collaborators, the store and the REST API into one runtime
//! and runs it until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use loom_core::app::{ExitStatus, RuntimeBuilder};
use loom_core::config::LoomConfig;
use loom_core::impls::{
    BytesClient, CachingPluginCatalog, HttpExecutionSink, HttpService, InMemoryStore,
    KatalogusClient, OctopoesClient, SqliteStore,
};
use loom_core::ports::{Clock, Store, SystemClock};

const IN_MEMORY: &str = ":memory:";

// ── CLI ─────────────────────────────────────────────────────────────

/// Multi-tenant scheduler for scan, normalization and report tasks.
#[derive(Parser, Debug)]
#[command(name = "loom", version, about)]
struct Cli {
    /// JSON config file; flags and env vars override its values.
    #[arg(long, env = "LOOM_CONFIG")]
    config: Option<PathBuf>,

    /// Address of the REST API.
    #[arg(long, env = "LOOM_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Sqlite database path, or `:memory:`.
    #[arg(long, env = "LOOM_DATABASE")]
    database: Option<String>,

    /// Capacity of every organisation queue.
    #[arg(long, env = "LOOM_PQ_MAXSIZE")]
    pq_maxsize: Option<usize>,

    /// Seconds before a finished target may be ranked again.
    #[arg(long, env = "LOOM_PQ_GRACE_PERIOD")]
    pq_grace_period: Option<u64>,

    /// Seconds between population passes.
    #[arg(long, env = "LOOM_POPULATE_INTERVAL")]
    populate_interval: Option<u64>,

    /// Seconds between organisation refreshes.
    #[arg(long, env = "LOOM_ORGANISATION_REFRESH_INTERVAL")]
    organisation_refresh_interval: Option<u64>,

    /// Seconds a dispatcher idles when its queues are empty.
    #[arg(long, env = "LOOM_DISPATCH_INTERVAL")]
    dispatch_interval: Option<u64>,

    #[arg(long, env = "LOOM_MAX_DISPATCH_ATTEMPTS")]
    max_dispatch_attempts: Option<u32>,

    #[arg(long, env = "LOOM_DISPATCH_TIMEOUT")]
    dispatch_timeout: Option<u64>,

    /// Seconds plugin listings stay cached.
    #[arg(long, env = "LOOM_CACHE_TTL")]
    cache_ttl: Option<u64>,

    #[arg(long, env = "LOOM_HTTP_TIMEOUT")]
    http_timeout: Option<u64>,

    #[arg(long, env = "LOOM_HTTP_RETRIES")]
    http_retries: Option<u32>,

    /// Seconds workers get to stop before they are aborted.
    #[arg(long, env = "LOOM_SHUTDOWN_TIMEOUT")]
    shutdown_timeout: Option<u64>,

    #[arg(long, env = "LOOM_KATALOGUS_URL")]
    katalogus_url: Option<String>,

    #[arg(long, env = "LOOM_OCTOPOES_URL")]
    octopoes_url: Option<String>,

    #[arg(long, env = "LOOM_BYTES_URL")]
    bytes_url: Option<String>,

    #[arg(long, env = "LOOM_SINK_URL")]
    sink_url: Option<String>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<LoomConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                let config: LoomConfig = serde_json::from_str(&raw)
                    .with_context(|| format!("parse config {}", path.display()))?;
                info!(path = %path.display(), "loaded config");
                config
            }
            None => LoomConfig::default(),
        };

        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        apply!(
            listen_addr,
            database,
            pq_maxsize,
            pq_grace_period,
            populate_interval,
            organisation_refresh_interval,
            dispatch_interval,
            max_dispatch_attempts,
            dispatch_timeout,
            cache_ttl,
            http_timeout,
            http_retries,
            shutdown_timeout,
            katalogus_url,
            octopoes_url,
            bytes_url,
            sink_url,
        );
        Ok(config)
    }
}

// ── wiring ──────────────────────────────────────────────────────────

fn open_store(config: &LoomConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn Store>> {
    if config.database == IN_MEMORY {
        warn!("using the in-memory store, nothing survives a restart");
        return Ok(Arc::new(InMemoryStore::new(clock)));
    }
    let store = SqliteStore::open(Path::new(&config.database), clock)
        .with_context(|| format!("open database {}", config.database))?;
    info!(path = %config.database, "opened sqlite store");
    Ok(Arc::new(store))
}

fn service(config: &LoomConfig, name: &str, url: &str) -> anyhow::Result<HttpService> {
    HttpService::new(name, url, config.http_timeout(), config.http_retry_policy())
        .with_context(|| format!("create {name} client"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received");
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("loom=info,tower_http=info")),
        )
        .init();

    let config = Cli::parse().into_config()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&config, clock.clone())?;

    let catalog = CachingPluginCatalog::new(
        KatalogusClient::new(service(&config, "katalogus", &config.katalogus_url)?),
        config.cache_ttl(),
    );
    let objects = OctopoesClient::new(service(&config, "octopoes", &config.octopoes_url)?);
    let artifacts = BytesClient::new(service(&config, "bytes", &config.bytes_url)?);
    let sink = HttpExecutionSink::new(service(&config, "sink", &config.sink_url)?);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;

    let runtime = RuntimeBuilder::new(config)
        .clock(clock)
        .store(store)
        .catalog(Arc::new(catalog))
        .objects(Arc::new(objects))
        .artifacts(Arc::new(artifacts))
        .sink(Arc::new(sink))
        .listener(listener)
        .build()?;

    info!("loom starting");
    match runtime.run(shutdown_signal()).await {
        ExitStatus::Graceful => {
            info!("loom exited cleanly");
            Ok(())
        }
        status => {
            warn!(?status, "loom exited abnormally");
            std::process::exit(1);
        }
    }
}
