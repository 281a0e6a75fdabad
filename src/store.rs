//! ==============================================================================
//! store.rs - append-only readings log with downsampled range queries
//! ==============================================================================
//!
//! purpose:
//!     defines the Store contract used by the sampling loop (append) and the
//!     query facade (history / stats), plus the in-memory implementation.
//!     the file-backed implementation lives in file_store.rs and shares the
//!     same ordered index (ReadingLog) so both answer queries identically.
//!
//! retention:
//!     the index only holds rows within a retention window (default 7 days)
//!     behind the newest row. history and stats never reach further back,
//!     whatever `since` asks for.
//!
//! relationships:
//!     - used by: sampler.rs (append), query.rs (history, stats)
//!     - implemented by: MemoryStore (here), JsonlStore (file_store.rs)
//!
//! ==============================================================================

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as Span;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::clock::Timestamp;
use crate::domain::{Reading, StoredReading};
use crate::error::StorageError;

#[async_trait]
pub trait Store: Send + Sync {
    /// record one reading; out-of-range fields are stripped first
    async fn append(&self, reading: &Reading, recorded_at: Timestamp) -> Result<(), StorageError>;

    /// rows recorded at or after `since`, oldest first, downsampled to at
    /// most `max_points` entries when that is set and non-zero
    async fn history(
        &self,
        since: Timestamp,
        max_points: Option<usize>,
    ) -> Result<Vec<StoredReading>, StorageError>;

    async fn stats(&self, since: Timestamp) -> Result<WindowStats, StorageError>;
}

/// run a store call with an upper bound on its duration
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(StorageError::Timeout(limit)))
}

// ==============================================================================
// downsampling
// ==============================================================================

/// systematic sample of `rows`: every `floor(n / max_points)`-th row starting
/// at index 0, capped at `max_points` entries.
///
/// `None` and `Some(0)` both mean "everything".
pub fn downsample<T: Clone>(rows: &[T], max_points: Option<usize>) -> Vec<T> {
    match max_points {
        Some(max) if max > 0 && rows.len() > max => {
            let stride = rows.len() / max;
            rows.iter().step_by(stride).take(max).cloned().collect()
        }
        _ => rows.to_vec(),
    }
}

// ==============================================================================
// window statistics
// ==============================================================================

/// aggregates over a time window; an aggregate with no samples is null
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WindowStats {
    pub count: usize,
    pub avg_co2: Option<f64>,
    pub min_co2: Option<f64>,
    pub max_co2: Option<f64>,
    pub avg_temp: Option<f64>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub min_humidity: Option<f64>,
    pub max_humidity: Option<f64>,
}

#[derive(Default)]
struct Aggregate {
    n: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Aggregate {
    fn push(&mut self, value: Option<f64>) {
        let Some(v) = value else { return };
        self.n += 1;
        self.sum += v;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    fn avg(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

// ==============================================================================
// ordered in-memory index
// ==============================================================================

/// how far behind the newest row the in-memory index reaches by default
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// expired rows are dropped in batches so an insert is not a memmove
const EVICT_BATCH: usize = 256;

/// rows kept sorted by `recorded_at`, bounded to `retention` behind the
/// newest row. rows past the retention window are never returned, whether
/// or not they have been evicted yet.
#[derive(Debug)]
pub(crate) struct ReadingLog {
    rows: Vec<StoredReading>,
    retention: Span,
}

impl Default for ReadingLog {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl ReadingLog {
    pub(crate) fn with_retention(retention: Duration) -> Self {
        Self {
            rows: Vec::new(),
            retention: Span::from_std(retention).unwrap_or_else(|_| Span::max_value()),
        }
    }

    pub(crate) fn insert(&mut self, row: StoredReading) {
        // equal timestamps keep arrival order
        let at = self.rows.partition_point(|r| r.recorded_at <= row.recorded_at);
        self.rows.insert(at, row);
        self.evict();
    }

    /// oldest instant still inside the retention window
    fn cutoff(&self) -> Option<Timestamp> {
        let newest = self.rows.last()?;
        newest.recorded_at.checked_sub_signed(self.retention)
    }

    fn expired(&self) -> usize {
        match self.cutoff() {
            Some(cutoff) => self.rows.partition_point(|r| r.recorded_at < cutoff),
            None => 0,
        }
    }

    fn evict(&mut self) {
        let expired = self.expired();
        if expired >= EVICT_BATCH {
            self.rows.drain(..expired);
        }
    }

    /// rows inside the retention window
    pub(crate) fn len(&self) -> usize {
        self.rows.len() - self.expired()
    }

    fn window(&self, since: Timestamp) -> &[StoredReading] {
        let live = &self.rows[self.expired()..];
        let start = live.partition_point(|r| r.recorded_at < since);
        &live[start..]
    }

    pub(crate) fn history(&self, since: Timestamp, max_points: Option<usize>) -> Vec<StoredReading> {
        downsample(self.window(since), max_points)
    }

    pub(crate) fn stats(&self, since: Timestamp) -> WindowStats {
        let rows = self.window(since);
        let (mut co2, mut temp, mut humidity) =
            (Aggregate::default(), Aggregate::default(), Aggregate::default());

        for row in rows {
            co2.push(row.reading.co2_ppm.map(f64::from));
            temp.push(row.reading.temperature_c);
            humidity.push(row.reading.humidity_pct);
        }

        WindowStats {
            count: rows.len(),
            avg_co2: co2.avg(),
            min_co2: co2.min,
            max_co2: co2.max,
            avg_temp: temp.avg(),
            min_temp: temp.min,
            max_temp: temp.max,
            avg_humidity: humidity.avg(),
            min_humidity: humidity.min,
            max_humidity: humidity.max,
        }
    }
}

/// sanitize a reading for storage, logging what was dropped
pub(crate) fn prepare_row(reading: &Reading, recorded_at: Timestamp) -> StoredReading {
    let (reading, rejected) = reading.clone().sanitize();
    for r in &rejected {
        tracing::warn!(field = r.field, value = r.value, "dropping out-of-range field before storage");
    }
    StoredReading { recorded_at, reading }
}

// ==============================================================================
// memory store
// ==============================================================================

/// volatile store, used for tests and runs without a data directory
#[derive(Debug, Default)]
pub struct MemoryStore {
    log: RwLock<ReadingLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self { log: RwLock::new(ReadingLog::with_retention(retention)) }
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append(&self, reading: &Reading, recorded_at: Timestamp) -> Result<(), StorageError> {
        let row = prepare_row(reading, recorded_at);
        self.log.write().await.insert(row);
        Ok(())
    }

    async fn history(
        &self,
        since: Timestamp,
        max_points: Option<usize>,
    ) -> Result<Vec<StoredReading>, StorageError> {
        Ok(self.log.read().await.history(since, max_points))
    }

    async fn stats(&self, since: Timestamp) -> Result<WindowStats, StorageError> {
        Ok(self.log.read().await.stats(since))
    }
}
