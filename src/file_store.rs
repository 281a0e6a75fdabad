//! ==============================================================================
//! file_store.rs - JSON-lines readings log on disk
//! ==============================================================================
//!
//! purpose:
//!     durable implementation of the Store contract. every reading is one
//!     JSON object per line:
//!
//!         {"recorded_at":"2026-03-01T08:00:05+08:00","co2_ppm":812,...}
//!
//!     on open the file is streamed line by line into an ordered in-memory
//!     index bounded by the retention window, so queries never touch the
//!     disk and memory does not grow with the file. older rows stay in the
//!     file as an archive. a row only becomes visible to queries after its
//!     line has been written and synced.
//!
//! failure handling:
//!     - corrupt lines found during replay are skipped and counted
//!     - a write that fails half-way leaves a torn line; the next append
//!       starts on a fresh line so only the torn row is lost
//!
//! ==============================================================================

use std::path::{Path, PathBuf};

use std::io::SeekFrom;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;

use crate::clock::Timestamp;
use crate::domain::{Reading, StoredReading};
use crate::error::StorageError;
use crate::store::{prepare_row, ReadingLog, Store, WindowStats, DEFAULT_RETENTION};

pub struct JsonlStore {
    path: PathBuf,
    inner: RwLock<Inner>,
}

struct Inner {
    file: File,
    log: ReadingLog,
    torn_tail: bool,
}

impl JsonlStore {
    /// open (or create) the log at `path` and replay its rows
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_retention(path, DEFAULT_RETENTION).await
    }

    /// like `open`, keeping only `retention` behind the newest row in memory
    pub async fn open_with_retention(path: impl AsRef<Path>, retention: Duration) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut log = ReadingLog::with_retention(retention);
        let mut skipped = 0usize;
        let mut torn_tail = false;

        match File::open(&path).await {
            Ok(mut file) => {
                torn_tail = ends_without_newline(&mut file).await?;
                file.seek(SeekFrom::Start(0)).await?;

                let mut reader = BufReader::new(file);
                let mut line = Vec::new();
                loop {
                    line.clear();
                    if reader.read_until(b'\n', &mut line).await? == 0 {
                        break;
                    }
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match serde_json::from_slice::<StoredReading>(&line) {
                        Ok(row) => log.insert(row),
                        Err(e) => {
                            skipped += 1;
                            tracing::debug!(error = %e, "unreadable row in readings log");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if skipped > 0 {
            tracing::warn!(path = %path.display(), skipped, "skipped corrupt rows while replaying readings log");
        }
        tracing::info!(path = %path.display(), rows = log.len(), "readings log opened");

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;

        Ok(Self {
            path,
            inner: RwLock::new(Inner { file, log, torn_tail }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.log.len()
    }
}

async fn ends_without_newline(file: &mut File) -> Result<bool, StorageError> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

#[async_trait]
impl Store for JsonlStore {
    async fn append(&self, reading: &Reading, recorded_at: Timestamp) -> Result<(), StorageError> {
        let row = prepare_row(reading, recorded_at);
        let mut line = serde_json::to_string(&row)?;
        line.push('\n');

        let mut inner = self.inner.write().await;
        if inner.torn_tail {
            line.insert(0, '\n');
        }

        // assume the worst until the sync succeeds
        inner.torn_tail = true;
        inner.file.write_all(line.as_bytes()).await?;
        inner.file.flush().await?;
        inner.file.sync_data().await?;
        inner.torn_tail = false;

        inner.log.insert(row);
        Ok(())
    }

    async fn history(
        &self,
        since: Timestamp,
        max_points: Option<usize>,
    ) -> Result<Vec<StoredReading>, StorageError> {
        Ok(self.inner.read().await.log.history(since, max_points))
    }

    async fn stats(&self, since: Timestamp) -> Result<WindowStats, StorageError> {
        Ok(self.inner.read().await.log.stats(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HostMetrics;
    use chrono::{DateTime, Duration};
    use tempfile::tempdir;

    fn t0() -> Timestamp {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00+08:00").unwrap()
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("readings.jsonl");

        {
            let store = JsonlStore::open(&path).await.unwrap();
            let reading = Reading {
                co2_ppm: Some(950),
                temperature_c: Some(24.1),
                signal_strength: Some(-71),
                raw_payload: Some(vec![0x00, 0x08, 0xb6]),
                host_metrics: Some(HostMetrics { cpu_usage_pct: Some(12.5), ..Default::default() }),
                ..Default::default()
            };
            store.append(&reading, t0()).await.unwrap();
            store
                .append(&Reading { humidity_pct: Some(40.0), ..Default::default() }, t0() + Duration::seconds(5))
                .await
                .unwrap();
        }

        let store = JsonlStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 2);
        let rows = store.history(t0(), None).await.unwrap();
        assert_eq!(rows[0].reading.co2_ppm, Some(950));
        assert_eq!(rows[0].reading.raw_payload, Some(vec![0x00, 0x08, 0xb6]));
        assert_eq!(rows[0].reading.host_metrics.unwrap().cpu_usage_pct, Some(12.5));
        assert_eq!(rows[1].reading.humidity_pct, Some(40.0));
        assert_eq!(rows[1].recorded_at, t0() + Duration::seconds(5));
    }

    #[tokio::test]
    async fn corrupt_and_torn_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let good = r#"{"recorded_at":"2026-03-01T08:00:00+08:00","co2_ppm":700}"#;
        std::fs::write(&path, format!("{good}\nnot json\n{{\"recorded_at\":\"2026-03")).unwrap();

        let store = JsonlStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 1);

        store
            .append(&Reading { co2_ppm: Some(710), ..Default::default() }, t0() + Duration::minutes(1))
            .await
            .unwrap();
        drop(store);

        let store = JsonlStore::open(&path).await.unwrap();
        let co2: Vec<_> = store
            .history(t0(), None)
            .await
            .unwrap()
            .iter()
            .map(|r| r.reading.co2_ppm.unwrap())
            .collect();
        assert_eq!(co2, vec![700, 710]);
    }

    #[tokio::test]
    async fn replay_keeps_only_the_retention_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        {
            let store = JsonlStore::open(&path).await.unwrap();
            for hour in 0..48 {
                store
                    .append(&Reading { co2_ppm: Some(500 + hour as u32), ..Default::default() }, t0() + Duration::hours(hour))
                    .await
                    .unwrap();
            }
        }

        let store = JsonlStore::open_with_retention(&path, std::time::Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        // newest is hour 47, so hours 23..=47 stay queryable
        assert_eq!(store.len().await, 25);
        let rows = store.history(t0(), None).await.unwrap();
        assert_eq!(rows[0].reading.co2_ppm, Some(523));

        // the file itself is untouched
        let archived = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(archived, 48);
    }

    #[tokio::test]
    async fn stats_match_memory_store_semantics() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("r.jsonl")).await.unwrap();
        assert_eq!(store.stats(t0()).await.unwrap().count, 0);

        store
            .append(&Reading { temperature_c: Some(20.0), ..Default::default() }, t0())
            .await
            .unwrap();
        store
            .append(&Reading { temperature_c: Some(30.0), ..Default::default() }, t0() + Duration::minutes(1))
            .await
            .unwrap();

        let stats = store.stats(t0()).await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.avg_temp, Some(25.0));
        assert_eq!(stats.avg_co2, None);
    }
}
