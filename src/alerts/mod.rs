//! ==============================================================================
//! alerts/mod.rs - threshold alerting
//! ==============================================================================
//!
//! relationships:
//!     - config.rs:    thresholds, credentials and persisted cooldown stamps
//!     - evaluator.rs: per-metric armed state and cooldown gating
//!     - notifier.rs:  message delivery
//!
//! ==============================================================================

pub mod config;
pub mod evaluator;
pub mod notifier;

pub use config::{AlertConfig, AlertConfigPatch, AlertConfigStore, ChannelCredentials, ThresholdRule};
pub use evaluator::{AlertEvaluator, AlertState, Dispatch, Evaluation};
pub use notifier::{Notifier, TelegramNotifier};
