//! ==============================================================================
//! clock.rs - time source for timestamps and cooldown arithmetic
//! ==============================================================================
//!
//! every instant in the crate is a `DateTime<FixedOffset>` in the locale of
//! the sensor (UTC+8 by default), so stored rows, alert messages and API
//! responses all print the same wall-clock time.
//!
//! ==============================================================================

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};

pub type Timestamp = DateTime<FixedOffset>;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock pinned to one UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Falls back to UTC when the offset is out of range (more than ±23h).
    pub fn with_offset_hours(hours: i32) -> Self {
        let offset = FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| {
            tracing::warn!(hours, "invalid utc offset, using UTC");
            Utc.fix()
        });
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
