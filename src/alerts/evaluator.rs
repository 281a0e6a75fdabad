//! ==============================================================================
//! alerts/evaluator.rs - threshold + cooldown decision engine
//! ==============================================================================
//!
//! per metric the evaluator is either quiet (within bounds) or armed
//! (violating its bounds):
//!
//!     quiet --violation--> armed      notify if the cooldown has elapsed
//!     armed --violation--> armed      notify again once the cooldown elapses
//!     armed --in bounds--> quiet      silent, cooldown timer untouched
//!
//! every metric due in one check is reported in a single message and a
//! single notifier call. the new last-notified timestamps are persisted
//! before sending; if that fails nothing is sent and no state changes, so
//! the batch is retried on the next reading.
//!
//! a failed send still consumes the cooldown.
//!
//! ==============================================================================

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::alerts::config::{AlertConfigStore, Violation};
use crate::alerts::notifier::Notifier;
use crate::clock::{Clock, Timestamp};
use crate::domain::{LatestState, Metric};
use crate::error::StorageError;

/// in-memory alert state, guarded as one unit
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlertState {
    pub armed: BTreeSet<Metric>,
    pub last_notified_at: BTreeMap<Metric, Timestamp>,
}

/// outcome of one check
#[derive(Clone, Debug, PartialEq)]
pub enum Evaluation {
    /// alerts globally off or no usable channel
    Disabled,
    /// nothing violating
    Quiet,
    /// violations present, all still inside their cooldown
    Suppressed(Vec<Metric>),
    Notified(Dispatch),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    pub metrics: Vec<Metric>,
    pub suppressed: Vec<Metric>,
    pub message: String,
    pub delivered: bool,
}

pub struct AlertEvaluator {
    config: Arc<AlertConfigStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    state: Mutex<AlertState>,
}

impl AlertEvaluator {
    /// cooldowns persisted by a previous run are picked up from `config`
    pub async fn new(
        config: Arc<AlertConfigStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = AlertState {
            armed: BTreeSet::new(),
            last_notified_at: config.cooldowns().await,
        };
        Self {
            config,
            notifier,
            clock,
            state: Mutex::new(state),
        }
    }

    pub async fn state(&self) -> AlertState {
        self.state.lock().await.clone()
    }

    /// evaluate the latest merged values against the configured thresholds
    pub async fn check(&self, latest: &LatestState) -> Result<Evaluation, StorageError> {
        let config = self.config.current().await;
        if !config.enabled || !config.credentials.is_complete() {
            return Ok(Evaluation::Disabled);
        }

        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let mut due: Vec<Violation> = Vec::new();
        let mut suppressed = Vec::new();
        let mut recovered = Vec::new();

        for metric in Metric::ALL {
            let Some(rule) = config.thresholds.get(&metric).filter(|r| r.enabled) else {
                continue;
            };
            let Some(value) = latest.value(metric) else {
                continue;
            };

            let Some(violation) = rule.violation(metric, value) else {
                if state.armed.contains(&metric) {
                    tracing::info!(%metric, value, "back within bounds");
                    recovered.push(metric);
                }
                continue;
            };

            if !state.armed.contains(&metric) {
                tracing::info!(%metric, value, "threshold violated");
            }

            let cooled_down = state
                .last_notified_at
                .get(&metric)
                .map_or(true, |last| now - *last >= rule.cooldown());

            if cooled_down {
                due.push(violation);
            } else {
                tracing::debug!(%metric, value, "alert suppressed by cooldown");
                suppressed.push(metric);
            }
        }

        if !due.is_empty() {
            let mut stamps = state.last_notified_at.clone();
            for v in &due {
                stamps.insert(v.metric, now);
            }
            if let Err(e) = self.config.record_notifications(&stamps).await {
                tracing::error!(error = %e, "failed to persist alert cooldowns, batch not sent");
                return Err(e);
            }
            state.last_notified_at = stamps;
        }

        // only reached once nothing can fail any more
        for metric in &recovered {
            state.armed.remove(metric);
        }
        state.armed.extend(suppressed.iter().copied());

        if due.is_empty() {
            return Ok(if suppressed.is_empty() {
                Evaluation::Quiet
            } else {
                Evaluation::Suppressed(suppressed)
            });
        }

        let metrics: Vec<Metric> = due.iter().map(|v| v.metric).collect();
        state.armed.extend(metrics.iter().copied());

        let message = format_batch(&due, now);
        let delivered = match self.notifier.send(&message).await {
            Ok(detail) => {
                tracing::info!(?metrics, detail = %detail, "alert sent");
                true
            }
            Err(e) => {
                tracing::warn!(?metrics, error = %e, "alert delivery failed, cooldown still consumed");
                false
            }
        };

        Ok(Evaluation::Notified(Dispatch {
            metrics,
            suppressed,
            message,
            delivered,
        }))
    }
}

/// one HTML message listing every violation
pub fn format_batch(violations: &[Violation], now: Timestamp) -> String {
    let mut lines = vec!["<b>⚠️ CO2 monitor alert</b>".to_string()];
    lines.extend(violations.iter().map(|v| format!("• {v}")));
    lines.push(String::new());
    lines.push(format!("Time: {}", now.format("%Y-%m-%d %H:%M:%S")));
    lines.join("\n")
}
