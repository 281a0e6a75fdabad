//! ==============================================================================
//! domain.rs - readings, snapshots and plausible ranges
//! ==============================================================================
//!
//! purpose:
//!     the data that flows through the core. a Reading is what one scan
//!     produced, with every field independently optional. a StoredReading is
//!     that reading stamped and persisted. LatestState is the merged live view.
//!
//! validation:
//!     Reading::sanitize drops any field outside its plausible range and
//!     reports it as a RangeRejected; the rest of the reading survives.
//!
//! ==============================================================================

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::RangeRejected;

// ==============================================================================
// plausible ranges
// ==============================================================================
// anything outside these is decode garbage and never reaches storage,
// the latest-state cache or the alert evaluator.

pub const CO2_PPM_RANGE: RangeInclusive<f64> = 300.0..=10_000.0;
pub const TEMPERATURE_C_RANGE: RangeInclusive<f64> = 0.0..=50.0;
pub const HUMIDITY_PCT_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const SIGNAL_STRENGTH_RANGE: RangeInclusive<f64> = -127.0..=20.0;
pub const USAGE_PCT_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const CPU_TEMP_C_RANGE: RangeInclusive<f64> = -40.0..=150.0;

/// host statistics sampled alongside every sensor reading
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub cpu_usage_pct: Option<f64>,
    pub ram_usage_pct: Option<f64>,
    pub cpu_temp_c: Option<f64>,
}

impl HostMetrics {
    pub fn is_empty(&self) -> bool {
        self.cpu_usage_pct.is_none() && self.ram_usage_pct.is_none() && self.cpu_temp_c.is_none()
    }
}

/// one sample as produced by a decoder
///
/// every field is optional: the sensor does not report everything every
/// cycle, and a missing value is not a zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub co2_ppm: Option<u32>,
    pub temperature_c: Option<f64>,
    #[serde(alias = "humidity")]
    pub humidity_pct: Option<f64>,
    /// rssi of the advertisement, dBm
    #[serde(alias = "rssi")]
    pub signal_strength: Option<i32>,
    /// undecoded payload kept for later re-decoding (hex on disk)
    #[serde(default, with = "hex_payload", skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_metrics: Option<HostMetrics>,
}

impl Reading {
    /// true when at least one environmental value (co2, temperature,
    /// humidity) is present
    pub fn has_sensor_data(&self) -> bool {
        self.co2_ppm.is_some() || self.temperature_c.is_some() || self.humidity_pct.is_some()
    }

    /// drop every field outside its plausible range, keeping the rest
    pub fn sanitize(mut self) -> (Reading, Vec<RangeRejected>) {
        let mut rejected = Vec::new();

        self.co2_ppm = keep("co2_ppm", self.co2_ppm, &CO2_PPM_RANGE, &mut rejected);
        self.temperature_c = keep("temperature_c", self.temperature_c, &TEMPERATURE_C_RANGE, &mut rejected);
        self.humidity_pct = keep("humidity_pct", self.humidity_pct, &HUMIDITY_PCT_RANGE, &mut rejected);
        self.signal_strength = keep("signal_strength", self.signal_strength, &SIGNAL_STRENGTH_RANGE, &mut rejected);

        if let Some(host) = self.host_metrics.as_mut() {
            host.cpu_usage_pct = keep("cpu_usage_pct", host.cpu_usage_pct, &USAGE_PCT_RANGE, &mut rejected);
            host.ram_usage_pct = keep("ram_usage_pct", host.ram_usage_pct, &USAGE_PCT_RANGE, &mut rejected);
            host.cpu_temp_c = keep("cpu_temp_c", host.cpu_temp_c, &CPU_TEMP_C_RANGE, &mut rejected);
        }
        if self.host_metrics.is_some_and(|h| h.is_empty()) {
            self.host_metrics = None;
        }

        (self, rejected)
    }
}

fn keep<T>(
    field: &'static str,
    value: Option<T>,
    range: &RangeInclusive<f64>,
    rejected: &mut Vec<RangeRejected>,
) -> Option<T>
where
    T: Copy + Into<f64>,
{
    let v = value?;
    let as_f64: f64 = v.into();
    if range.contains(&as_f64) {
        Some(v)
    } else {
        rejected.push(RangeRejected {
            field,
            value: as_f64,
            min: *range.start(),
            max: *range.end(),
        });
        None
    }
}

/// a reading as persisted: the sample plus the instant it was recorded
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub recorded_at: Timestamp,
    #[serde(flatten)]
    pub reading: Reading,
}

// ==============================================================================
// latest state
// ==============================================================================

/// merged view of the most recent value of every metric
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestState {
    pub co2_ppm: Option<u32>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub signal_strength: Option<i32>,
    pub cpu_usage_pct: Option<f64>,
    pub ram_usage_pct: Option<f64>,
    pub cpu_temp_c: Option<f64>,
    /// when the last update was merged
    pub timestamp: Option<Timestamp>,
}

impl LatestState {
    /// overwrite only the fields the reading carries
    pub fn merge(&mut self, reading: &Reading) {
        fn put<T: Copy>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        put(&mut self.co2_ppm, reading.co2_ppm);
        put(&mut self.temperature_c, reading.temperature_c);
        put(&mut self.humidity_pct, reading.humidity_pct);
        put(&mut self.signal_strength, reading.signal_strength);
        if let Some(host) = reading.host_metrics {
            put(&mut self.cpu_usage_pct, host.cpu_usage_pct);
            put(&mut self.ram_usage_pct, host.ram_usage_pct);
            put(&mut self.cpu_temp_c, host.cpu_temp_c);
        }
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Co2Ppm => self.co2_ppm.map(f64::from),
            Metric::TemperatureC => self.temperature_c,
            Metric::HumidityPct => self.humidity_pct,
        }
    }
}

/// metrics that can carry an alert threshold
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Co2Ppm,
    TemperatureC,
    #[serde(alias = "humidity")]
    HumidityPct,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Co2Ppm, Metric::TemperatureC, Metric::HumidityPct];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Co2Ppm => "co2_ppm",
            Metric::TemperatureC => "temperature_c",
            Metric::HumidityPct => "humidity_pct",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.filter(|t| !t.is_empty())
            .map(|t| hex::decode(t).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_valid_fields_next_to_rejected_ones() {
        let reading = Reading {
            co2_ppm: Some(65_000),
            temperature_c: Some(22.5),
            humidity_pct: Some(140.0),
            signal_strength: Some(-70),
            ..Default::default()
        };

        let (clean, rejected) = reading.sanitize();

        assert_eq!(clean.co2_ppm, None);
        assert_eq!(clean.temperature_c, Some(22.5));
        assert_eq!(clean.humidity_pct, None);
        assert_eq!(clean.signal_strength, Some(-70));
        let fields: Vec<_> = rejected.iter().map(|r| r.field).collect();
        assert_eq!(fields, ["co2_ppm", "humidity_pct"]);
    }

    #[test]
    fn sanitize_rejects_nan() {
        let reading = Reading { temperature_c: Some(f64::NAN), ..Default::default() };
        let (clean, rejected) = reading.sanitize();
        assert!(clean.temperature_c.is_none());
        assert_eq!(rejected.len(), 1);
        assert!(!clean.has_sensor_data());
    }

    #[test]
    fn sanitize_drops_empty_host_metrics() {
        let reading = Reading {
            co2_ppm: Some(800),
            host_metrics: Some(HostMetrics { cpu_usage_pct: Some(250.0), ..Default::default() }),
            ..Default::default()
        };
        let (clean, rejected) = reading.sanitize();
        assert!(clean.host_metrics.is_none());
        assert_eq!(rejected[0].field, "cpu_usage_pct");
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let reading = Reading {
            co2_ppm: Some(300),
            temperature_c: Some(50.0),
            humidity_pct: Some(0.0),
            ..Default::default()
        };
        let (clean, rejected) = reading.clone().sanitize();
        assert!(rejected.is_empty());
        assert_eq!(clean, reading);
    }

    #[test]
    fn merge_only_overwrites_present_fields() {
        let mut state = LatestState::default();
        state.merge(&Reading { co2_ppm: Some(1200), temperature_c: Some(21.0), ..Default::default() });
        state.merge(&Reading { temperature_c: Some(25.0), ..Default::default() });

        assert_eq!(state.co2_ppm, Some(1200));
        assert_eq!(state.temperature_c, Some(25.0));
        assert_eq!(state.humidity_pct, None);
    }

    #[test]
    fn reading_accepts_legacy_field_names_and_hex_payload() {
        let json = r#"{"co2_ppm": 812, "humidity": 41.5, "rssi": -64, "raw_payload": "d506ff"}"#;
        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.humidity_pct, Some(41.5));
        assert_eq!(reading.signal_strength, Some(-64));
        assert_eq!(reading.raw_payload, Some(vec![0xd5, 0x06, 0xff]));
    }

    #[test]
    fn metric_keys_are_snake_case() {
        let json = serde_json::to_string(&Metric::Co2Ppm).unwrap();
        assert_eq!(json, "\"co2_ppm\"");
        let humidity: Metric = serde_json::from_str("\"humidity\"").unwrap();
        assert_eq!(humidity, Metric::HumidityPct);
    }
}
