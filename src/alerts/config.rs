//! ==============================================================================
//! alerts/config.rs - alert thresholds and their persisted document
//! ==============================================================================
//!
//! purpose:
//!     owns AlertConfig (global switch, channel credentials, one threshold
//!     rule per metric) and the persisted copy of the evaluator's
//!     last-notified timestamps. both live in one JSON document so a restart
//!     does not reset cooldowns:
//!
//!         {
//!           "enabled": true,
//!           "bot_token": "...",
//!           "chat_id": "...",
//!           "thresholds": {
//!             "co2_ppm": { "enabled": true, "min": null, "max": 1000, "cooldown_minutes": 30 }
//!           },
//!           "last_notification": { "co2_ppm": "2026-03-01T08:00:00+08:00" }
//!         }
//!
//! patches:
//!     edits arrive as partial documents (AlertConfigPatch). unknown keys and
//!     unknown metrics are rejected, invalid rules are rejected, and in every
//!     rejected case the previous configuration stays in force.
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use crate::clock::Timestamp;
use crate::domain::Metric;
use crate::error::{ConfigError, StorageError};

pub const DEFAULT_COOLDOWN_MINUTES: u32 = 30;

/// bounds and rate limit for one metric
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: u32,
}

fn default_cooldown() -> u32 {
    DEFAULT_COOLDOWN_MINUTES
}

impl ThresholdRule {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            enabled: false,
            min,
            max,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
        }
    }

    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooldown_minutes))
    }

    /// `None` when the value is within bounds
    pub fn violation(&self, metric: Metric, value: f64) -> Option<Violation> {
        if let Some(min) = self.min.filter(|min| value < *min) {
            return Some(Violation { metric, value, bound: Bound::Min(min) });
        }
        if let Some(max) = self.max.filter(|max| value > *max) {
            return Some(Violation { metric, value, bound: Bound::Max(max) });
        }
        None
    }

    fn validate(&self, metric: Metric) -> Result<(), ConfigError> {
        let name = metric.as_str();
        if self.min.is_some_and(|v| !v.is_finite()) {
            return Err(ConfigError::NonFinite { metric: name, field: "min" });
        }
        if self.max.is_some_and(|v| !v.is_finite()) {
            return Err(ConfigError::NonFinite { metric: name, field: "max" });
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(ConfigError::InvertedBounds { metric: name, min, max });
            }
        }
        if self.enabled && self.cooldown_minutes == 0 {
            return Err(ConfigError::ZeroCooldown(name));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Bound {
    Min(f64),
    Max(f64),
}

/// one metric outside its configured bounds
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Violation {
    pub metric: Metric,
    pub value: f64,
    pub bound: Bound,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bound {
            Bound::Min(min) => write!(f, "{} below minimum {} (current: {:.2})", self.metric, min, self.value),
            Bound::Max(max) => write!(f, "{} above maximum {} (current: {:.2})", self.metric, max, self.value),
        }
    }
}

/// opaque to the evaluator; only the notifier reads them
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelCredentials {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

impl ChannelCredentials {
    pub fn is_complete(&self) -> bool {
        !self.bot_token.trim().is_empty() && !self.chat_id.trim().is_empty()
    }

    /// token shortened for display: first 10 chars + "...", or "***"
    pub fn redacted(&self) -> Self {
        let bot_token = match self.bot_token.as_str() {
            "" => String::new(),
            t if t.chars().count() > 10 => format!("{}...", t.chars().take(10).collect::<String>()),
            _ => "***".to_string(),
        };
        Self { bot_token, chat_id: self.chat_id.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub credentials: ChannelCredentials,
    #[serde(default)]
    pub thresholds: BTreeMap<Metric, ThresholdRule>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        let thresholds = BTreeMap::from([
            (Metric::Co2Ppm, ThresholdRule::new(None, Some(1000.0))),
            (Metric::TemperatureC, ThresholdRule::new(Some(10.0), Some(30.0))),
            (Metric::HumidityPct, ThresholdRule::new(Some(30.0), Some(70.0))),
        ]);
        Self {
            enabled: false,
            credentials: ChannelCredentials::default(),
            thresholds,
        }
    }
}

impl AlertConfig {
    /// make sure every known metric has a rule
    fn fill_defaults(mut self) -> Self {
        let defaults = AlertConfig::default();
        for (metric, rule) in defaults.thresholds {
            self.thresholds.entry(metric).or_insert(rule);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.iter().try_for_each(|(metric, rule)| rule.validate(*metric))
    }

    /// the configuration this patch would produce; `self` is untouched
    pub fn patched(&self, patch: AlertConfigPatch) -> Result<AlertConfig, ConfigError> {
        let mut next = self.clone();

        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(token) = patch.bot_token {
            next.credentials.bot_token = token.trim().to_string();
        }
        if let Some(chat_id) = patch.chat_id {
            next.credentials.chat_id = chat_id.trim().to_string();
        }
        for (metric, edit) in patch.thresholds.unwrap_or_default() {
            let rule = next
                .thresholds
                .entry(metric)
                .or_insert_with(|| ThresholdRule::new(None, None));
            if let Some(enabled) = edit.enabled {
                rule.enabled = enabled;
            }
            if let Some(min) = edit.min {
                rule.min = min;
            }
            if let Some(max) = edit.max {
                rule.max = max;
            }
            if let Some(cooldown) = edit.cooldown_minutes {
                rule.cooldown_minutes = cooldown;
            }
        }

        next.validate()?;
        Ok(next)
    }

    /// copy safe to hand to API clients
    pub fn redacted(&self) -> AlertConfig {
        AlertConfig {
            credentials: self.credentials.redacted(),
            ..self.clone()
        }
    }
}

// ==============================================================================
// patches
// ==============================================================================

/// partial update of AlertConfig; absent keys keep their current value
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertConfigPatch {
    pub enabled: Option<bool>,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub thresholds: Option<BTreeMap<Metric, ThresholdPatch>>,
}

impl AlertConfigPatch {
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// `min`/`max` distinguish "absent" (keep) from `null` (clear)
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdPatch {
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub min: Option<Option<f64>>,
    #[serde(default, deserialize_with = "present")]
    pub max: Option<Option<f64>>,
    pub cooldown_minutes: Option<u32>,
}

fn present<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

// ==============================================================================
// persisted document
// ==============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct AlertDocument {
    #[serde(flatten)]
    config: AlertConfig,
    #[serde(default)]
    last_notification: BTreeMap<Metric, Timestamp>,
}

/// configuration collaborator: owns AlertConfig and the persisted cooldowns
pub struct AlertConfigStore {
    path: Option<PathBuf>,
    doc: RwLock<AlertDocument>,
}

impl AlertConfigStore {
    /// load the document at `path`; a missing file is created with defaults,
    /// an unreadable one is replaced by defaults in memory
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<AlertDocument>(&text) {
                Ok(mut doc) => {
                    doc.config = doc.config.fill_defaults();
                    if let Err(e) = doc.config.validate() {
                        tracing::warn!(error = %e, "stored alert config is invalid, using defaults");
                        doc.config = AlertConfig::default();
                    }
                    doc
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse alert config, using defaults");
                    AlertDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let doc = AlertDocument::default();
                write_document(&path, &doc).await?;
                tracing::info!(path = %path.display(), "created default alert config");
                doc
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path: Some(path), doc: RwLock::new(doc) })
    }

    /// non-persistent store, for tests and ephemeral runs
    pub fn in_memory(config: AlertConfig) -> Self {
        Self {
            path: None,
            doc: RwLock::new(AlertDocument { config, last_notification: BTreeMap::new() }),
        }
    }

    pub async fn current(&self) -> AlertConfig {
        self.doc.read().await.config.clone()
    }

    /// validate, persist and apply a patch; returns the new configuration
    pub async fn apply_patch(&self, patch: AlertConfigPatch) -> Result<AlertConfig, ConfigError> {
        let mut doc = self.doc.write().await;
        let next = AlertDocument {
            config: doc.config.patched(patch)?,
            last_notification: doc.last_notification.clone(),
        };
        self.persist(&next).await?;
        *doc = next;
        tracing::info!("alert configuration updated");
        Ok(doc.config.clone())
    }

    pub async fn cooldowns(&self) -> BTreeMap<Metric, Timestamp> {
        self.doc.read().await.last_notification.clone()
    }

    /// replace the persisted last-notified map; nothing changes on failure
    pub async fn record_notifications(
        &self,
        stamps: &BTreeMap<Metric, Timestamp>,
    ) -> Result<(), StorageError> {
        let mut doc = self.doc.write().await;
        let next = AlertDocument {
            config: doc.config.clone(),
            last_notification: stamps.clone(),
        };
        self.persist(&next).await?;
        *doc = next;
        Ok(())
    }

    async fn persist(&self, doc: &AlertDocument) -> Result<(), StorageError> {
        match &self.path {
            Some(path) => write_document(path, doc).await,
            None => Ok(()),
        }
    }
}

/// write to a sibling temp file, then rename over the target
async fn write_document(path: &Path, doc: &AlertDocument) -> Result<(), StorageError> {
    let body = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;
    use tempfile::tempdir;

    fn patch(value: serde_json::Value) -> AlertConfigPatch {
        AlertConfigPatch::from_json(value).unwrap()
    }

    #[test]
    fn defaults_cover_every_metric_and_are_disabled() {
        let config = AlertConfig::default();
        assert!(!config.enabled);
        for metric in Metric::ALL {
            let rule = &config.thresholds[&metric];
            assert!(!rule.enabled);
            assert_eq!(rule.cooldown_minutes, 30);
        }
        assert_eq!(config.thresholds[&Metric::Co2Ppm].max, Some(1000.0));
    }

    #[test]
    fn violation_checks_bounds_independently() {
        let max_only = ThresholdRule::new(None, Some(1000.0));
        assert!(max_only.violation(Metric::Co2Ppm, 300.0).is_none());
        assert!(max_only.violation(Metric::Co2Ppm, 1000.0).is_none());
        assert!(max_only.violation(Metric::Co2Ppm, 1000.5).is_some());

        let min_only = ThresholdRule::new(Some(10.0), None);
        assert!(min_only.violation(Metric::TemperatureC, 49.0).is_none());
        assert!(min_only.violation(Metric::TemperatureC, 9.9).is_some());
    }

    #[test]
    fn violation_text_names_metric_bound_and_value() {
        let rule = ThresholdRule::new(Some(10.0), Some(30.0));
        let low = rule.violation(Metric::TemperatureC, 8.5).unwrap();
        assert_eq!(low.to_string(), "temperature_c below minimum 10 (current: 8.50)");
        let high = ThresholdRule::new(None, Some(1000.0)).violation(Metric::Co2Ppm, 1200.0).unwrap();
        assert_eq!(high.to_string(), "co2_ppm above maximum 1000 (current: 1200.00)");
    }

    #[test]
    fn patch_updates_only_given_fields() {
        let config = AlertConfig::default();
        let next = config
            .patched(patch(json!({
                "enabled": true,
                "bot_token": "  123456:ABCDEF  ",
                "thresholds": { "co2_ppm": { "enabled": true, "max": 1200 } }
            })))
            .unwrap();

        assert!(next.enabled);
        assert_eq!(next.credentials.bot_token, "123456:ABCDEF");
        let co2 = &next.thresholds[&Metric::Co2Ppm];
        assert!(co2.enabled);
        assert_eq!(co2.max, Some(1200.0));
        assert_eq!(co2.cooldown_minutes, 30);
        assert_eq!(next.thresholds[&Metric::TemperatureC], config.thresholds[&Metric::TemperatureC]);
    }

    #[test]
    fn null_clears_a_bound_while_absence_keeps_it() {
        let config = AlertConfig::default();
        let next = config
            .patched(patch(json!({ "thresholds": { "temperature_c": { "min": null } } })))
            .unwrap();
        let rule = &next.thresholds[&Metric::TemperatureC];
        assert_eq!(rule.min, None);
        assert_eq!(rule.max, Some(30.0));
    }

    #[test]
    fn unknown_metric_or_key_is_malformed() {
        let unknown_metric = AlertConfigPatch::from_json(json!({ "thresholds": { "pm25": { "max": 10 } } }));
        assert!(matches!(unknown_metric, Err(ConfigError::Malformed(_))));

        let unknown_key = AlertConfigPatch::from_json(json!({ "volume": 11 }));
        assert!(matches!(unknown_key, Err(ConfigError::Malformed(_))));

        let legacy_alias = AlertConfigPatch::from_json(json!({ "thresholds": { "humidity": { "max": 80 } } }));
        assert!(legacy_alias.is_ok());
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let config = AlertConfig::default();
        let inverted = config.patched(patch(json!({ "thresholds": { "humidity_pct": { "min": 80, "max": 20 } } })));
        assert!(matches!(inverted, Err(ConfigError::InvertedBounds { .. })));

        let zero = config.patched(patch(json!({
            "thresholds": { "co2_ppm": { "enabled": true, "cooldown_minutes": 0 } }
        })));
        assert!(matches!(zero, Err(ConfigError::ZeroCooldown("co2_ppm"))));
    }

    #[test]
    fn redaction_matches_token_length() {
        let long = ChannelCredentials { bot_token: "1234567890:SECRET".into(), chat_id: "42".into() };
        assert_eq!(long.redacted().bot_token, "1234567890...");
        let short = ChannelCredentials { bot_token: "abc".into(), chat_id: "42".into() };
        assert_eq!(short.redacted().bot_token, "***");
        assert_eq!(ChannelCredentials::default().redacted().bot_token, "");
    }

    #[tokio::test]
    async fn open_creates_default_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let store = AlertConfigStore::open(&path).await.unwrap();
        assert_eq!(store.current().await, AlertConfig::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn config_and_cooldowns_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let at = DateTime::parse_from_rfc3339("2026-03-01T08:00:00+08:00").unwrap();

        {
            let store = AlertConfigStore::open(&path).await.unwrap();
            store
                .apply_patch(patch(json!({ "enabled": true, "thresholds": { "co2_ppm": { "enabled": true } } })))
                .await
                .unwrap();
            store
                .record_notifications(&BTreeMap::from([(Metric::Co2Ppm, at)]))
                .await
                .unwrap();
        }

        let store = AlertConfigStore::open(&path).await.unwrap();
        assert!(store.current().await.enabled);
        assert_eq!(store.cooldowns().await.get(&Metric::Co2Ppm), Some(&at));
    }

    #[tokio::test]
    async fn rejected_patch_keeps_previous_config() {
        let store = AlertConfigStore::in_memory(AlertConfig::default());
        let before = store.current().await;
        let result = store
            .apply_patch(patch(json!({ "enabled": true, "thresholds": { "co2_ppm": { "min": 2000, "max": 1000 } } })))
            .await;
        assert!(result.is_err());
        assert_eq!(store.current().await, before);
    }

    #[tokio::test]
    async fn partial_file_is_completed_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(
            &path,
            r#"{"enabled": true, "bot_token": "t", "chat_id": "c",
                "thresholds": {"co2_ppm": {"enabled": true, "max": 900}}}"#,
        )
        .unwrap();

        let config = AlertConfigStore::open(&path).await.unwrap().current().await;
        assert_eq!(config.thresholds[&Metric::Co2Ppm].max, Some(900.0));
        assert_eq!(config.thresholds[&Metric::Co2Ppm].cooldown_minutes, 30);
        assert_eq!(config.thresholds.len(), 3);
    }
}
