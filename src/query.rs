//! ==============================================================================
//! query.rs - read side of the telemetry core
//! ==============================================================================
//!
//! purpose:
//!     one cloneable handle bundling everything the outside world may ask
//!     for: the live snapshot, downsampled history, 24h statistics, host
//!     metrics and the alert configuration. the HTTP server is a thin layer
//!     over this; tests drive it directly.
//!
//! relationships:
//!     - reads: cache.rs, store.rs, system.rs, alerts/config.rs
//!     - used by: server.rs, main.rs
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as Span, Utc};

use crate::alerts::notifier::test_message;
use crate::alerts::{AlertConfig, AlertConfigPatch, AlertConfigStore, Notifier};
use crate::cache::LatestStateCache;
use crate::clock::Clock;
use crate::domain::{LatestState, StoredReading};
use crate::error::{ConfigError, NotifyError, StorageError};
use crate::store::{bounded, Store, WindowStats};
use crate::system::{SystemMonitor, SystemReport};

#[derive(Clone)]
pub struct Telemetry {
    store: Arc<dyn Store>,
    cache: Arc<LatestStateCache>,
    alerts: Arc<AlertConfigStore>,
    notifier: Arc<dyn Notifier>,
    monitor: Arc<SystemMonitor>,
    clock: Arc<dyn Clock>,
    storage_timeout: Duration,
}

impl Telemetry {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<LatestStateCache>,
        alerts: Arc<AlertConfigStore>,
        notifier: Arc<dyn Notifier>,
        monitor: Arc<SystemMonitor>,
        clock: Arc<dyn Clock>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            alerts,
            notifier,
            monitor,
            clock,
            storage_timeout,
        }
    }

    pub async fn latest(&self) -> LatestState {
        self.cache.snapshot().await
    }

    /// rows from the last `hours`, thinned to `max_points` (0 = all)
    pub async fn history(
        &self,
        hours: u32,
        max_points: Option<usize>,
    ) -> Result<Vec<StoredReading>, StorageError> {
        let now = self.clock.now();
        // a window reaching past the representable range means "everything"
        let since = now
            .checked_sub_signed(Span::hours(i64::from(hours)))
            .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC.with_timezone(now.offset()));
        bounded(self.storage_timeout, self.store.history(since, max_points)).await
    }

    pub async fn stats_24h(&self) -> Result<WindowStats, StorageError> {
        let since = self.clock.now() - Span::hours(24);
        bounded(self.storage_timeout, self.store.stats(since)).await
    }

    pub async fn system_metrics(&self) -> SystemReport {
        let monitor = self.monitor.clone();
        match tokio::task::spawn_blocking(move || monitor.report()).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "host metrics sampling failed");
                SystemReport {
                    metrics: Default::default(),
                    timestamp: self.clock.now(),
                }
            }
        }
    }

    /// current alert configuration with the bot token masked
    pub async fn alert_config(&self) -> AlertConfig {
        self.alerts.current().await.redacted()
    }

    /// validate and persist `patch`; on error the previous config stays
    pub async fn set_alert_config(&self, patch: AlertConfigPatch) -> Result<AlertConfig, ConfigError> {
        Ok(self.alerts.apply_patch(patch).await?.redacted())
    }

    pub async fn send_test_notification(&self) -> Result<String, NotifyError> {
        let message = test_message(self.clock.now());
        let detail = self.notifier.send(&message).await?;
        tracing::info!(%detail, "test notification sent");
        Ok(detail)
    }
}
