//! ==============================================================================
//! main.rs - rasc host entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the telemetry core together and runs it until ctrl-c:
//!     an external decoder is sampled on a fixed interval, every reading is
//!     stored and merged into the live view, thresholds are checked and a
//!     JSON API serves history and the live stream.
//!
//! relationships:
//!     - config.rs: host.toml schema and loading
//!     - rasc (lib): decoder, store, cache, alerts, sampler, query, server
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                    │
//!     │  ┌──────────────────┐            ┌──────────────────────┐   │
//!     │  │ sampling loop    │            │ web server           │   │
//!     │  │ (5s cycle)       │            │ (port 3000)          │   │
//!     │  └────────┬─────────┘            └──────────┬───────────┘   │
//!     │           │ write                     read  │               │
//!     │           ▼                                 ▼               │
//!     │     ┌────────────┐  hook   ┌─────────────────────────┐      │
//!     │     │ latest     │───────> │ broadcast (SSE clients) │      │
//!     │     │ state      │         └─────────────────────────┘      │
//!     │     └────────────┘                                          │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rasc::alerts::{AlertConfigStore, AlertEvaluator, TelegramNotifier};
use rasc::cache::LatestStateCache;
use rasc::clock::{Clock, SystemClock};
use rasc::decoder::CommandDecoder;
use rasc::domain::LatestState;
use rasc::file_store::JsonlStore;
use rasc::query::Telemetry;
use rasc::sampler::SamplingLoop;
use rasc::system::SystemMonitor;

/// slow SSE clients beyond this many snapshots skip ahead
const UPDATE_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  RASC Host - CO2 Telemetry & Alerting");
    println!("===========================================================");

    // step 1: load configuration
    let config = config::HostConfig::load_or_default();
    config.print_summary();

    // step 2: logging (RUST_LOG wins over host.toml)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::with_offset_hours(config.clock.utc_offset_hours));
    let settings = config.loop_settings();

    // step 3: persistence
    println!("\n[STARTUP] Opening storage...");
    let store = Arc::new(
        JsonlStore::open_with_retention(&config.storage.readings_path, config.retention())
            .await
            .with_context(|| format!("failed to open {}", config.storage.readings_path.display()))?,
    );
    let alert_config = Arc::new(
        AlertConfigStore::open(&config.storage.alerts_path)
            .await
            .with_context(|| format!("failed to open {}", config.storage.alerts_path.display()))?,
    );
    println!("[STARTUP] ✓ {} stored readings", store.len().await);

    // step 4: live view + push channel
    let (updates, _) = broadcast::channel::<LatestState>(UPDATE_BUFFER);
    let hook_tx = updates.clone();
    let cache = Arc::new(LatestStateCache::new(clock.clone()).with_hook(Arc::new(move |snapshot: &LatestState| {
        // no subscribers is not an error
        let _ = hook_tx.send(snapshot.clone());
    })));

    // step 5: alerting
    let notifier = Arc::new(TelegramNotifier::new(
        config.telegram.api_base.clone(),
        Duration::from_secs(config.telegram.timeout_seconds),
        alert_config.clone(),
    )?);
    let evaluator = Arc::new(AlertEvaluator::new(alert_config.clone(), notifier.clone(), clock.clone()).await);
    if !alert_config.current().await.enabled {
        println!("[STARTUP] Alerts disabled (enable via POST /api/alerts/config)");
    }

    // step 6: web server in background
    let monitor = Arc::new(SystemMonitor::new(clock.clone()));
    let telemetry = Telemetry::new(
        store.clone(),
        cache.clone(),
        alert_config,
        notifier,
        monitor.clone(),
        clock.clone(),
        settings.storage_timeout,
    );
    let app = rasc::server::router(telemetry, updates);
    let bind = config.server.bind.clone();
    tokio::spawn(async move {
        println!("[STARTUP] ✓ API live at http://{}", bind);
        if let Err(e) = rasc::server::serve(&bind, app).await {
            tracing::error!(error = %e, "web server error");
        }
    });

    // step 7: sampling loop
    let decoder = Arc::new(CommandDecoder::new(config.decoder.command.clone(), config.decoder.args.clone()));
    let sampler = Arc::new(
        SamplingLoop::new(decoder, store, cache, evaluator, clock, settings).with_monitor(monitor),
    );
    let handle = sampler.handle();
    println!("\n[RUNTIME] Starting sensor polling ({}s interval)", config.polling.interval_seconds);
    println!("────────────────────────────────────────────────────────────");
    let worker = tokio::spawn(async move { sampler.run().await });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    println!("\n[SHUTDOWN] Stopping sampling loop...");
    handle.stop();
    worker.await.context("sampling loop panicked")?;
    println!("[SHUTDOWN] ✓ Done");
    Ok(())
}
