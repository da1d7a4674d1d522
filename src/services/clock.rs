use chrono::{Duration, Local, NaiveDateTime};

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always reports the same instant.
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Wall-clock time that advances with the tokio clock, so paused-time tests
/// can drive calendar-anchored schedules.
pub struct TokioClock {
    base: NaiveDateTime,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(base: NaiveDateTime) -> Self {
        Self {
            base,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = Duration::from_std(self.started.elapsed()).unwrap_or(Duration::zero());
        self.base + elapsed
    }
}
