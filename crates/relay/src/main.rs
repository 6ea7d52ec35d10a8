//! Relay daemon.
//!
//! Configuration comes from the environment (see [relay::RelayConfig::from_env]). Any
//! configuration error, or a ledger that is unreachable at startup, exits with status 1.
//! Ctrl-C stops the control surface, then the relay (in-flight submissions finish first).

use anyhow::Context;
use relay::{AutomationClient, LogConfig, RegistryClient, RelayConfig, StateCache, Supervisor, SupervisorIntervals};
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("relay: configuration error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config.log)?;

    let registry = RegistryClient::new(&config.registry, &config.client)
        .context("registry client")?;
    let automation = AutomationClient::new(&config.automation, &config.client)
        .context("automation client")?;
    let cache = Arc::new(StateCache::new(config.cache_ttl));
    let supervisor = Arc::new(Supervisor::new(
        Arc::new(registry),
        Arc::new(automation),
        cache,
        SupervisorIntervals {
            health_check: config.health_check_interval,
            cache_eviction: config.cache_eviction_interval,
        },
    ));

    if let Err(e) = supervisor.start().await {
        tracing::error!(reason = %e, "relay failed to start");
        std::process::exit(1);
    }

    let listener = tokio::net::TcpListener::bind(config.control_listen_addr)
        .await
        .with_context(|| format!("bind control surface on {}", config.control_listen_addr))?;
    let app = relay::control::router(Arc::clone(&supervisor));
    relay::control::serve(listener, app, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(reason = %e, "failed to listen for ctrl-c");
        }
        tracing::info!("shutdown requested");
    })
    .await
    .context("control surface")?;

    supervisor.stop().await;
    Ok(())
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&log.level)
        .with_context(|| format!("invalid log level {:?}", log.level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &log.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
