//! ==============================================================================
//! config.rs - runtime configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - PollingConfig:  sampling cadence, scan window, per-call timeouts
//!     - DecoderConfig:  external scanner command producing JSON readings
//!     - StorageConfig:  readings log and alert document locations, retention
//!     - ServerConfig:   HTTP bind address
//!     - ClockConfig:    local UTC offset used for all timestamps
//!     - LoggingConfig:  default log level, per-reading logging
//!     - TelegramConfig: bot API endpoint and request timeout
//!
//! alert thresholds and bot credentials are NOT here: they are edited at
//! runtime through the API and live in the alert document (storage.alerts_path).
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rasc::sampler::LoopSettings;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub polling: PollingConfig,
    pub decoder: DecoderConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub clock: ClockConfig,
    pub logging: LoggingConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub scan_window_seconds: u64,
    pub decode_timeout_seconds: u64,
    pub storage_timeout_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            scan_window_seconds: 5,
            decode_timeout_seconds: 15,
            storage_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecoderConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["scripts/scan_co2.py".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub readings_path: PathBuf,
    pub alerts_path: PathBuf,
    /// how much history stays queryable (and resident in memory)
    pub retention_hours: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            readings_path: PathBuf::from("data").join("readings.jsonl"),
            alerts_path: PathBuf::from("data").join("alerts.json"),
            retention_hours: 168,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClockConfig {
    pub utc_offset_hours: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { utc_offset_hours: 8 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
    pub timeout_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl HostConfig {
    /// Parse one host.toml
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            interval: Duration::from_secs(self.polling.interval_seconds.max(1)),
            scan_window: Duration::from_secs(self.polling.scan_window_seconds),
            decode_timeout: Duration::from_secs(self.polling.decode_timeout_seconds),
            storage_timeout: Duration::from_secs(self.polling.storage_timeout_seconds),
            show_sensor_data: self.logging.show_sensor_data,
        }
    }

    /// never below the 24h the stats endpoint covers
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.storage.retention_hours.max(24).saturating_mul(3600))
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│           HOST CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Poll Interval: {}s", self.polling.interval_seconds);
        println!("│ Scan Window: {}s", self.polling.scan_window_seconds);
        println!("│ Decoder: {} {}", self.decoder.command, self.decoder.args.join(" "));
        println!("│ Readings: {}", self.storage.readings_path.display());
        println!("│ Alerts: {}", self.storage.alerts_path.display());
        println!("│ Retention: {}h", self.retention().as_secs() / 3600);
        println!("│ HTTP: {}", self.server.bind);
        println!("│ UTC Offset: {:+}h", self.clock.utc_offset_hours);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
