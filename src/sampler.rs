//! ==============================================================================
//! sampler.rs - background sampling loop
//! ==============================================================================
//!
//! purpose:
//!     the single long-lived worker of the process. every cycle:
//!
//!         decoder ──> sanitize ──> store.append
//!                                  cache.update ──> alerts.check ──> notifier
//!
//!     then waits a fixed interval, whatever happened.
//!
//! failure model:
//!     a missing advertisement, a decoder crash, a timeout or a full disk are
//!     all routine. they are logged and the loop carries on with the next
//!     cycle. nothing in a cycle can stop the loop.
//!
//!     a failed append does not hold back the live view or alerting: the
//!     cache is still updated and thresholds still evaluated.
//!
//! shutdown:
//!     LoopHandle::stop() clears the running flag and wakes the wait. a cycle
//!     already in progress is allowed to finish.
//!
//! relationships:
//!     - uses: decoder.rs, store.rs, cache.rs, alerts/evaluator.rs, system.rs
//!     - started by: main.rs
//!
//! ==============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::alerts::{AlertEvaluator, Evaluation};
use crate::cache::LatestStateCache;
use crate::clock::Clock;
use crate::decoder::Decoder;
use crate::domain::{LatestState, Reading};
use crate::error::{DecodeError, RangeRejected};
use crate::store::{bounded, Store};
use crate::system::SystemMonitor;

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// pause between two cycles
    pub interval: Duration,
    /// how long the decoder listens for an advertisement
    pub scan_window: Duration,
    pub decode_timeout: Duration,
    pub storage_timeout: Duration,
    /// log every reading at info instead of debug
    pub show_sensor_data: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            scan_window: Duration::from_secs(5),
            decode_timeout: Duration::from_secs(15),
            storage_timeout: Duration::from_secs(5),
            show_sensor_data: true,
        }
    }
}

/// cooperative stop switch shared with whoever owns the process lifetime
#[derive(Clone, Debug)]
pub struct LoopHandle {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl LoopHandle {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// the sensor was not heard from
    NoData,
    /// something was decoded but no sensor value was plausible
    Rejected(Vec<RangeRejected>),
    Failed(DecodeError),
    Recorded {
        snapshot: LatestState,
        stored: bool,
        alert: Option<Evaluation>,
    },
}

pub struct SamplingLoop {
    decoder: Arc<dyn Decoder>,
    store: Arc<dyn Store>,
    cache: Arc<LatestStateCache>,
    alerts: Arc<AlertEvaluator>,
    clock: Arc<dyn Clock>,
    monitor: Option<Arc<SystemMonitor>>,
    settings: LoopSettings,
    handle: LoopHandle,
}

impl SamplingLoop {
    pub fn new(
        decoder: Arc<dyn Decoder>,
        store: Arc<dyn Store>,
        cache: Arc<LatestStateCache>,
        alerts: Arc<AlertEvaluator>,
        clock: Arc<dyn Clock>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            decoder,
            store,
            cache,
            alerts,
            clock,
            monitor: None,
            settings,
            handle: LoopHandle::new(),
        }
    }

    /// attach host metrics to every stored reading
    pub fn with_monitor(mut self, monitor: Arc<SystemMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// run cycles until the handle is stopped
    pub async fn run(&self) {
        tracing::info!(interval_secs = self.settings.interval.as_secs_f64(), "sampling loop started");
        while self.handle.is_running() {
            self.run_cycle().await;
            self.wait().await;
        }
        tracing::info!("sampling loop stopped");
    }

    async fn wait(&self) {
        let notified = self.handle.wake.notified();
        tokio::pin!(notified);
        // register before re-checking the flag so a concurrent stop() is not missed
        notified.as_mut().enable();
        if !self.handle.is_running() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.settings.interval) => {}
            _ = &mut notified => {}
        }
    }

    /// one decode → store → cache → alert pass
    pub async fn run_cycle(&self) -> CycleOutcome {
        let decode = self.decoder.decode(self.settings.scan_window);
        let decoded = match tokio::time::timeout(self.settings.decode_timeout, decode).await {
            Ok(Ok(Some(reading))) => reading,
            Ok(Ok(None)) => {
                tracing::debug!("no advertisement this cycle");
                return CycleOutcome::NoData;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "decode failed");
                return CycleOutcome::Failed(e);
            }
            Err(_) => {
                let e = DecodeError::Timeout(self.settings.decode_timeout);
                tracing::warn!(error = %e, "decode failed");
                return CycleOutcome::Failed(e);
            }
        };

        let reading = self.with_host_metrics(decoded).await;
        let (reading, rejected) = reading.sanitize();
        for r in &rejected {
            tracing::warn!(field = r.field, value = r.value, "rejected implausible value");
        }
        if !reading.has_sensor_data() {
            return if rejected.is_empty() {
                CycleOutcome::NoData
            } else {
                CycleOutcome::Rejected(rejected)
            };
        }

        self.log_reading(&reading);

        let recorded_at = self.clock.now();
        let stored = match bounded(self.settings.storage_timeout, self.store.append(&reading, recorded_at)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "failed to store reading");
                false
            }
        };

        let snapshot = self.cache.update(&reading).await;

        let alert = match self.alerts.check(&snapshot).await {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                tracing::warn!(error = %e, "alert evaluation skipped");
                None
            }
        };

        CycleOutcome::Recorded { snapshot, stored, alert }
    }

    async fn with_host_metrics(&self, mut reading: Reading) -> Reading {
        let Some(monitor) = self.monitor.clone() else {
            return reading;
        };
        match tokio::task::spawn_blocking(move || monitor.sample()).await {
            Ok(metrics) => reading.host_metrics = Some(metrics),
            Err(e) => tracing::warn!(error = %e, "host metrics sampling failed"),
        }
        reading
    }

    fn log_reading(&self, r: &Reading) {
        if self.settings.show_sensor_data {
            tracing::info!(
                co2_ppm = ?r.co2_ppm,
                temperature_c = ?r.temperature_c,
                humidity_pct = ?r.humidity_pct,
                rssi = ?r.signal_strength,
                "reading"
            );
        } else {
            tracing::debug!(co2_ppm = ?r.co2_ppm, temperature_c = ?r.temperature_c, "reading");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertConfig, AlertConfigStore, Notifier};
    use crate::clock::ManualClock;
    use crate::error::{NotifyError, StorageError};
    use crate::store::{MemoryStore, WindowStats};
    use crate::domain::StoredReading;
    use crate::clock::Timestamp;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Scripted = Result<Option<Reading>, DecodeError>;

    struct ScriptedDecoder {
        script: Mutex<VecDeque<Scripted>>,
        delay: Duration,
    }

    impl ScriptedDecoder {
        fn new(script: Vec<Scripted>) -> Self {
            Self { script: Mutex::new(script.into()), delay: Duration::ZERO }
        }
    }

    #[async_trait]
    impl Decoder for ScriptedDecoder {
        async fn decode(&self, _scan_window: Duration) -> Result<Option<Reading>, DecodeError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl Store for BrokenStore {
        async fn append(&self, _: &Reading, _: Timestamp) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
        async fn history(&self, _: Timestamp, _: Option<usize>) -> Result<Vec<StoredReading>, StorageError> {
            Ok(Vec::new())
        }
        async fn stats(&self, _: Timestamp) -> Result<WindowStats, StorageError> {
            Ok(WindowStats::default())
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl Notifier for SilentNotifier {
        async fn send(&self, _message: &str) -> Result<String, NotifyError> {
            Ok("ok".into())
        }
    }

    fn fast() -> LoopSettings {
        LoopSettings {
            interval: Duration::from_millis(10),
            decode_timeout: Duration::from_millis(200),
            storage_timeout: Duration::from_millis(200),
            ..LoopSettings::default()
        }
    }

    async fn build(decoder: ScriptedDecoder, store: Arc<dyn Store>, settings: LoopSettings) -> SamplingLoop {
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2026-03-01T08:00:00+08:00").unwrap(),
        ));
        let cache = Arc::new(LatestStateCache::new(clock.clone()));
        let config = Arc::new(AlertConfigStore::in_memory(AlertConfig::default()));
        let alerts = Arc::new(AlertEvaluator::new(config, Arc::new(SilentNotifier), clock.clone()).await);
        SamplingLoop::new(Arc::new(decoder), store, cache, alerts, clock, settings)
    }

    fn co2(ppm: u32) -> Reading {
        Reading { co2_ppm: Some(ppm), ..Default::default() }
    }

    #[tokio::test]
    async fn successful_cycle_stores_and_updates_cache() {
        let store = Arc::new(MemoryStore::new());
        let sampler = build(ScriptedDecoder::new(vec![Ok(Some(co2(800)))]), store.clone(), fast()).await;

        let outcome = sampler.run_cycle().await;

        let CycleOutcome::Recorded { snapshot, stored, alert } = outcome else {
            panic!("expected a recorded cycle")
        };
        assert!(stored);
        assert_eq!(snapshot.co2_ppm, Some(800));
        assert_eq!(alert, Some(Evaluation::Disabled));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn failures_and_empty_cycles_touch_nothing() {
        let store = Arc::new(MemoryStore::new());
        let script = vec![
            Err(DecodeError::Payload("truncated".into())),
            Ok(None),
            Ok(Some(Reading { co2_ppm: Some(12), signal_strength: Some(-60), ..Default::default() })),
        ];
        let sampler = build(ScriptedDecoder::new(script), store.clone(), fast()).await;

        assert!(matches!(sampler.run_cycle().await, CycleOutcome::Failed(DecodeError::Payload(_))));
        assert!(matches!(sampler.run_cycle().await, CycleOutcome::NoData));
        match sampler.run_cycle().await {
            CycleOutcome::Rejected(rejected) => assert_eq!(rejected[0].field, "co2_ppm"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.len().await, 0);
        assert_eq!(sampler.cache.snapshot().await, LatestState::default());
    }

    #[tokio::test]
    async fn slow_decoder_times_out() {
        let mut decoder = ScriptedDecoder::new(vec![Ok(Some(co2(800)))]);
        decoder.delay = Duration::from_secs(5);
        let sampler = build(decoder, Arc::new(MemoryStore::new()), fast()).await;

        assert!(matches!(sampler.run_cycle().await, CycleOutcome::Failed(DecodeError::Timeout(_))));
    }

    #[tokio::test]
    async fn storage_failure_still_updates_live_view() {
        let sampler = build(ScriptedDecoder::new(vec![Ok(Some(co2(950)))]), Arc::new(BrokenStore), fast()).await;

        let CycleOutcome::Recorded { snapshot, stored, .. } = sampler.run_cycle().await else {
            panic!("expected a recorded cycle")
        };
        assert!(!stored);
        assert_eq!(snapshot.co2_ppm, Some(950));
    }

    #[tokio::test]
    async fn loop_survives_errors_and_stops_promptly() {
        let store = Arc::new(MemoryStore::new());
        let script = vec![
            Err(DecodeError::Payload("bad".into())),
            Ok(Some(co2(700))),
            Err(DecodeError::Payload("bad".into())),
            Ok(Some(co2(710))),
        ];
        let mut settings = fast();
        settings.interval = Duration::from_millis(5);
        let sampler = Arc::new(build(ScriptedDecoder::new(script), store.clone(), settings).await);
        let handle = sampler.handle();

        let task = tokio::spawn({
            let sampler = sampler.clone();
            async move { sampler.run().await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.len().await < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop should record both readings");

        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should exit after stop")
            .unwrap();
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn stop_interrupts_a_long_wait() {
        let mut settings = fast();
        settings.interval = Duration::from_secs(3600);
        let sampler = Arc::new(build(ScriptedDecoder::new(vec![]), Arc::new(MemoryStore::new()), settings).await);
        let handle = sampler.handle();
        let task = tokio::spawn({
            let sampler = sampler.clone();
            async move { sampler.run().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stop should wake the wait")
            .unwrap();
    }
}
