//! devicehub-server
//!
//! Gateway process hosting the device session engine: accepts device
//! connections, verifies and heartbeats them, and exposes a front-adapter
//! API backends use to drive constrained POSTs and observed GETs through a
//! live session.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use server::backend::{DeviceServiceClient, DeviceVerifierClient, HubConfigPuller, build_http_client};
use server::config::ServerConfig;
use server::registry::SessionRegistry;
use server::session::SessionDeps;
use server::{audit, listener};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "devicehub-server")]
#[command(author, version, about = "Device session gateway")]
#[command(long_about = "
Terminates device connections, verifies and heartbeats them, and exposes an
internal HTTP front adapter so backends can drive a device's constrained
POSTs and observed GETs through its live session.

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/devicehub/server.toml
    3. /etc/devicehub/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("devicehub-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    if server::service::is_systemd() {
        info!("Running under systemd");
    }

    run_service(config).await
}

async fn run_service(config: ServerConfig) -> Result<()> {
    let http = build_http_client(server::backend::BACKEND_CALL_TIMEOUT);
    let concrete_config_store = common::InMemoryConfigStore::new();
    concrete_config_store.set_bool("disable.deviceverify", config.backend.disable_device_verify);
    let config_store: Arc<dyn common::ConfigStore> = Arc::new(concrete_config_store);

    let verifier = Arc::new(DeviceVerifierClient::new(
        http.clone(),
        config.backend.device_verifier_url.clone(),
        config_store.clone(),
    ));
    let device_service = Arc::new(DeviceServiceClient::new(http.clone()));
    let registry = SessionRegistry::new();
    let audit_logger = audit::create_audit_logger(config.audit.clone());

    let deps = Arc::new(SessionDeps {
        verifier,
        device_service,
        config_store: config_store.clone(),
        registry,
        audit: audit_logger,
        observer_cap: config.session.observer_cap,
        default_heartbeat_secs: config.session.heartbeat_secs,
    });

    let shutdown = CancellationToken::new();

    let hub_config_task = if let Some(url) = config.backend.hub_config_url.clone() {
        let poll_interval = Duration::from_secs(config.backend.hub_config_poll_secs);
        let puller = Arc::new(HubConfigPuller::new(http.clone(), url, config_store.clone(), poll_interval));
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let puller_for_task = puller.clone();
        let handle = tokio::spawn(async move { puller_for_task.run(shutdown_rx).await });
        Some((shutdown_tx, handle))
    } else {
        None
    };

    let watchdog_handle = server::service::spawn_watchdog_task()
        .await
        .context("Failed to spawn watchdog task")?;

    server::service::notify_ready().context("Failed to notify systemd ready")?;
    server::service::notify_status("Running - waiting for connections")
        .context("Failed to send status to systemd")?;

    info!(addr = %config.server.bind_addr, "devicehub-server ready, press Ctrl+C to shutdown");

    let listener_shutdown = shutdown.clone();
    let listener_settings = config.server.clone();
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener::run(&listener_settings, deps, listener_shutdown).await {
            error!("listener error: {:#}", e);
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    server::service::notify_stopping().context("Failed to notify systemd stopping")?;

    shutdown.cancel();
    let _ = listener_handle.await;

    watchdog_handle.abort();
    if let Some((shutdown_tx, handle)) = hub_config_task {
        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }

    info!("devicehub-server shutdown complete");
    Ok(())
}
