//! drydock updater daemon
//!
//! Thin scheduler around the updater library: load configuration, then run
//! one auto-update tick per interval until shutdown. The tick loop is a
//! single task, so at most one tick runs at a time by construction.
//!
//! The daemon transport, mount metrics, and identity registry are trait
//! seams filled in by the embedding deployment. This binary wires the
//! bundled in-memory implementations, which makes a bare `updaterd` run
//! against scripted state only; it is a development harness, not a
//! production daemon client.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drydock_updater::audit::JsonlAuditSink;
use drydock_updater::config::Config;
use drydock_updater::daemon::DaemonClient;
use drydock_updater::disk::StaticMounts;
use drydock_updater::health::HealthProbe;
use drydock_updater::image::PullBudget;
use drydock_updater::registry::NoopRegistry;
use drydock_updater::store::StateStore;
use drydock_updater::tick::{run_tick, TickContext};
use drydock_updater::MockDaemon;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing; RUST_LOG wins over the configured level.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting drydock updater");
    info!(
        admin_config = %config.admin_config_path,
        state_path = %config.state_path,
        tick_interval_secs = config.tick_interval().as_secs(),
        "Configuration loaded"
    );

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // Daemon transport is provided by the embedding deployment; the mock
    // keeps a bare `updaterd` runnable for development.
    let daemon = MockDaemon::new();
    let mounts = StaticMounts::default();
    let registry = NoopRegistry;
    let audit = JsonlAuditSink::new(&config.audit_log_path);

    let mut interval = tokio::time::interval(config.tick_interval());
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = run_once(&config, &daemon, &mounts, &registry, &audit).await {
                    error!(error = %err, "Tick failed");
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Updater shutting down");
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn run_once(
    config: &Config,
    daemon: &dyn DaemonClient,
    mounts: &StaticMounts,
    registry: &NoopRegistry,
    audit: &JsonlAuditSink,
) -> Result<()> {
    let admin_raw = tokio::fs::read(&config.admin_config_path)
        .await
        .with_context(|| format!("reading {}", config.admin_config_path))?;
    let admin_data: serde_json::Value =
        serde_json::from_slice(&admin_raw).context("parsing admin configuration")?;

    let mut store = StateStore::load(&config.state_path).await?;

    let report = run_tick(TickContext {
        daemon,
        mounts,
        registry,
        audit,
        admin_data: &admin_data,
        store: &mut store,
        pull_budget: PullBudget::default(),
        health_probe: HealthProbe::default(),
    })
    .await;

    if !report.errors.is_empty() {
        warn!(errors = report.errors.len(), "Tick finished with errors");
    }
    Ok(())
}
