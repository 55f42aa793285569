use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber;

use turnstile::config::{QuotaRules, ServiceConfig};
use turnstile::http::HttpServer;
use turnstile::ratelimit::{ConfigStore, RateLimiter};

/// Turnstile - Multi-tenant rate limiting service
#[derive(Parser, Debug)]
#[command(name = "turnstile")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the service configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Path to a quota-rules file (overrides the config file's rules_path)
    #[arg(short = 'r', long = "rules")]
    rules: Option<String>,

    /// HTTP listen address
    #[arg(short = 'a', long = "addr")]
    addr: Option<String>,

    /// Maximum requests processed concurrently across all tenants
    #[arg(long = "max-concurrent")]
    max_concurrent: Option<usize>,

    /// Maximum waiting requests per tenant queue
    #[arg(long = "max-queue")]
    max_queue: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Turnstile Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration with CLI overrides
    let mut config = match args.config {
        Some(ref path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };

    if let Some(ref rules_path) = args.rules {
        config.limits.rules_path = Some(rules_path.clone());
    }
    if let Some(ref addr) = args.addr {
        config.server.http_addr = addr.parse()?;
    }
    if let Some(max_concurrent) = args.max_concurrent {
        config.limits.max_global_concurrent = max_concurrent;
    }
    if let Some(max_queue) = args.max_queue {
        config.limits.max_tenant_queue_size = max_queue;
    }

    info!(
        http_addr = %config.server.http_addr,
        max_global_concurrent = config.limits.max_global_concurrent,
        max_tenant_queue_size = config.limits.max_tenant_queue_size,
        "Configuration loaded"
    );

    // Seed the config store with global limits and optional quota rules
    let store = Arc::new(ConfigStore::with_global(config.global_limits())?);
    load_quota_rules(&config, &store);

    let limiter = Arc::new(RateLimiter::new(store));
    info!("Rate limiter initialized");

    let server = HttpServer::new(config.server.http_addr, limiter);

    info!("Starting HTTP server on {}", config.server.http_addr);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile Rate Limiting Service stopped");
    Ok(())
}

/// Load quota rules from the configured file path, if any.
fn load_quota_rules(config: &ServiceConfig, store: &ConfigStore) {
    let Some(ref rules_path) = config.limits.rules_path else {
        info!("No quota rules path specified, starting with an empty store");
        return;
    };

    match QuotaRules::from_file(rules_path).and_then(|rules| {
        rules.apply(store)?;
        Ok(rules.rule_count())
    }) {
        Ok(count) => {
            info!(path = %rules_path, rule_count = count, "Quota rules loaded");
        }
        Err(e) => {
            warn!(
                path = %rules_path,
                error = %e,
                "Failed to load quota rules, continuing without them"
            );
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
