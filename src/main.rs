//! lb-pool command line client.
//!
//! # Architecture Overview
//!
//! ```text
//!     CLI / library caller
//!            │
//!            ▼
//!     ┌───────────────────────────────────────────────────────────────┐
//!     │                            Pool                               │
//!     │  ┌──────────────┐   ┌─────────────┐   ┌───────────────────┐   │
//!     │  │ RequestSet   │──▶│ get_endpoint│──▶│ Endpoint          │   │
//!     │  │ retry policy │   │ selection   │   │ counters, health, │   │
//!     │  └──────────────┘   └─────────────┘   │ timeout sweep     │   │
//!     │                                       └─────────┬─────────┘   │
//!     │  ┌──────────────┐   ┌─────────────┐             │             │
//!     │  │ Membership   │   │ Pinger      │◀── unhealthy┤             │
//!     │  │ add / remove │   │ probe loop  │             ▼             │
//!     │  └──────────────┘   └─────────────┘   ┌───────────────────┐   │
//!     │                                       │ ConnectionTracker │   │
//!     │                                       │ Transport (HTTP/1)│───┼──▶ Backend
//!     │                                       └───────────────────┘   │
//!     │  ┌────────────────────────────────────────────────────────┐   │
//!     │  │ Cross-cutting: config, events, logging, metrics        │   │
//!     │  └────────────────────────────────────────────────────────┘   │
//!     └───────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hyper::header::{HeaderName, HeaderValue};

use lb_pool::config::watcher::ConfigWatcher;
use lb_pool::config::{load_config, LbConfig};
use lb_pool::lifecycle::signals::shutdown_signal;
use lb_pool::observability::{logging, metrics};
use lb_pool::{HyperTransport, Method, Pool, PoolEvent, RequestBody, RequestOptions};

#[derive(Parser)]
#[command(name = "lb-pool")]
#[command(about = "Client-side load balancer over a pool of HTTP endpoints", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Endpoints as host:port, replacing the configured ones.
    #[arg(short, long, value_delimiter = ',')]
    endpoints: Vec<String>,

    /// Health-check path.
    #[arg(long)]
    ping: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send requests through the pool and print each outcome
    Request {
        #[arg(short, long, default_value = "/")]
        path: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: Method,

        /// Request body.
        #[arg(short, long)]
        data: Option<String>,

        /// Extra header as `name: value`.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Pin every attempt to this endpoint.
        #[arg(long)]
        endpoint: Option<String>,

        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Keep the pool running, follow config changes and print stats
    Watch,
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), Box<dyn std::error::Error>> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header {:?} is not `name: value`", raw))?;
    Ok((
        HeaderName::from_bytes(name.trim().as_bytes())?,
        HeaderValue::from_str(value.trim())?,
    ))
}

fn build_config(cli: &Cli) -> Result<LbConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => LbConfig::default(),
    };
    if !cli.endpoints.is_empty() {
        config.pool.endpoints = cli.endpoints.clone();
    }
    if cli.ping.is_some() {
        config.pool.ping = cli.ping.clone();
    }
    if cli.json_logs {
        config.observability.json = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    logging::init_logging(&config.observability);
    tracing::info!(
        endpoints = config.pool.endpoints.len(),
        max_pool_size = ?config.pool.max_pool_size,
        ping = ?config.pool.ping,
        "Configuration loaded"
    );

    let transport = Arc::new(HyperTransport::new(config.pool.connect_timeout()));
    let pool = Arc::new(Pool::from_config(transport, config.pool.clone())?);

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
            metrics::spawn_event_recorder(pool.name().to_string(), pool.subscribe());
            metrics::spawn_stats_reporter(
                Arc::downgrade(&pool),
                Duration::from_millis(config.observability.stats_interval_ms),
            );
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    match cli.command {
        Commands::Request { path, method, data, headers, endpoint, count } => {
            let mut options = RequestOptions::new(path).method(method);
            for raw in &headers {
                let (name, value) = parse_header(raw)?;
                options = options.header(name, value);
            }
            if let Some(endpoint) = endpoint {
                options = options.endpoint(endpoint);
            }

            for _ in 0..count.max(1) {
                let body = RequestBody::from(data.clone());
                let line = match pool.request(options.clone(), body).await {
                    Ok(response) => serde_json::json!({
                        "endpoint": response.endpoint,
                        "status": response.status.as_u16(),
                        "reused": response.reused,
                        "duration_ms": response.duration.as_millis() as u64,
                        "body": response.text(),
                    }),
                    Err(err) => serde_json::json!({ "error": err }),
                };
                println!("{}", line);
            }
            println!("{}", serde_json::to_string(&pool.summary())?);
        }
        Commands::Watch => run_watch(&cli.config, &config, &pool).await?,
    }

    pool.close();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_watch(
    path: &Option<PathBuf>,
    config: &LbConfig,
    pool: &Arc<Pool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut updates, _watcher) = match path {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path, config.pool.endpoints.clone());
            (Some(rx), Some(watcher.run()?))
        }
        None => (None, None),
    };

    let mut events = pool.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.observability.stats_interval_ms.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                println!("{}", serde_json::to_string(&pool.summary())?);
            }
            Ok(event) = events.recv() => {
                if let PoolEvent::Health { endpoint, healthy } = event {
                    tracing::info!(endpoint = %endpoint, healthy, "Endpoint health changed");
                }
            }
            Some(new_config) = async {
                match updates.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                pool.sync_endpoints(&new_config.pool.endpoints);
            }
        }
    }
    Ok(())
}
