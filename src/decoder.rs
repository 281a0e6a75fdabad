//! ==============================================================================
//! decoder.rs - source of decoded sensor readings
//! ==============================================================================
//!
//! purpose:
//!     the core never parses the sensor's advertisement bytes itself. it asks
//!     a Decoder for "the latest reading in this scan window" and gets back a
//!     partial Reading, nothing, or an error.
//!
//! CommandDecoder:
//!     runs an external scanner (e.g. a python script wrapping the vendor's
//!     ble library) and reads one JSON object from its stdout:
//!
//!         {"co2_ppm": 812, "temperature_c": 24.3, "humidity": 41.0,
//!          "rssi": -67, "raw_payload": "d506..."}
//!
//!     an empty line or `null` means "no advertisement seen this window".
//!     a field that cannot be represented (negative or non-numeric co2, a
//!     bad hex payload) is dropped on its own; only unparseable JSON fails
//!     the whole reading.
//!     the scan window is passed in RASC_SCAN_WINDOW_SECS. the child is
//!     killed if the caller's timeout drops the call.
//!
//! ==============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::domain::{Reading, CO2_PPM_RANGE, SIGNAL_STRENGTH_RANGE};
use crate::error::{DecodeError, RangeRejected};

#[async_trait]
pub trait Decoder: Send + Sync {
    /// `Ok(None)` when the sensor was not heard from in `scan_window`
    async fn decode(&self, scan_window: Duration) -> Result<Option<Reading>, DecodeError>;
}

pub struct CommandDecoder {
    program: String,
    args: Vec<String>,
}

impl CommandDecoder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[async_trait]
impl Decoder for CommandDecoder {
    async fn decode(&self, scan_window: Duration) -> Result<Option<Reading>, DecodeError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .env("RASC_SCAN_WINDOW_SECS", scan_window.as_secs().to_string())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DecodeError::Process {
                status: output.status.to_string(),
                stderr,
            });
        }

        parse_payload(&String::from_utf8_lossy(&output.stdout))
    }
}

/// parse the last non-empty line of decoder output.
///
/// fields are taken one by one: a value that cannot be represented (wrong
/// type, negative co2, ...) is logged and dropped without losing the rest.
pub fn parse_payload(stdout: &str) -> Result<Option<Reading>, DecodeError> {
    let line = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.is_empty() || line == "null" {
        return Ok(None);
    }

    let raw: RawReading =
        serde_json::from_str(line).map_err(|e| DecodeError::Payload(format!("{e} (got: {line})")))?;
    let (reading, rejected) = raw.into_reading();
    for r in &rejected {
        tracing::warn!(field = r.field, value = r.value, "dropping unrepresentable decoder field");
    }
    Ok(Some(reading))
}

// ==============================================================================
// lenient payload
// ==============================================================================

/// decoder output before any field is trusted
#[derive(Debug, Default, Deserialize)]
struct RawReading {
    co2_ppm: Option<Value>,
    temperature_c: Option<Value>,
    #[serde(alias = "humidity")]
    humidity_pct: Option<Value>,
    #[serde(alias = "rssi")]
    signal_strength: Option<Value>,
    raw_payload: Option<Value>,
    host_metrics: Option<Value>,
}

impl RawReading {
    fn into_reading(self) -> (Reading, Vec<RangeRejected>) {
        let mut rejected = Vec::new();

        let co2_ppm = number("co2_ppm", self.co2_ppm).and_then(|v| {
            whole(v, 0.0, f64::from(u32::MAX))
                .map(|v| v as u32)
                .or_else(|| reject(&mut rejected, "co2_ppm", v, &CO2_PPM_RANGE))
        });
        let signal_strength = number("signal_strength", self.signal_strength).and_then(|v| {
            whole(v, f64::from(i32::MIN), f64::from(i32::MAX))
                .map(|v| v as i32)
                .or_else(|| reject(&mut rejected, "signal_strength", v, &SIGNAL_STRENGTH_RANGE))
        });

        let reading = Reading {
            co2_ppm,
            temperature_c: number("temperature_c", self.temperature_c),
            humidity_pct: number("humidity_pct", self.humidity_pct),
            signal_strength,
            raw_payload: self.raw_payload.and_then(payload_bytes),
            host_metrics: self.host_metrics.and_then(|v| match serde_json::from_value(v) {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed host metrics");
                    None
                }
            }),
        };
        (reading, rejected)
    }
}

/// a finite JSON number; anything else is dropped
fn number(field: &'static str, value: Option<Value>) -> Option<f64> {
    match value? {
        Value::Null => None,
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        other => {
            tracing::warn!(field, value = %other, "dropping non-numeric decoder field");
            None
        }
    }
}

/// `v` rounded to an integer within `min..=max`
fn whole(v: f64, min: f64, max: f64) -> Option<f64> {
    let rounded = v.round();
    (min..=max).contains(&rounded).then_some(rounded)
}

fn reject<T>(
    rejected: &mut Vec<RangeRejected>,
    field: &'static str,
    value: f64,
    range: &std::ops::RangeInclusive<f64>,
) -> Option<T> {
    rejected.push(RangeRejected {
        field,
        value,
        min: *range.start(),
        max: *range.end(),
    });
    None
}

fn payload_bytes(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => hex::decode(s.trim()).ok(),
        _ => None,
    }
}
