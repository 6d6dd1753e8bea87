use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time source for signing timestamps and poll intervals.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances `now` instantly and records the call.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    slept: Duration,
    sleeps: u32,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                slept: Duration::ZERO,
                sleeps: 0,
            }),
        }
    }

    pub fn at_unix(seconds: i64) -> Self {
        Self::new(DateTime::from_timestamp(seconds, 0).unwrap_or_default())
    }

    pub fn total_slept(&self) -> Duration {
        self.state
            .lock()
            .map(|state| state.slept)
            .unwrap_or_default()
    }

    pub fn sleep_calls(&self) -> u32 {
        self.state.lock().map(|state| state.sleeps).unwrap_or(0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .map(|state| state.now)
            .unwrap_or_else(|_| Utc::now())
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.slept += duration;
            state.sleeps += 1;
            if let Ok(step) = chrono::Duration::from_std(duration) {
                state.now += step;
            }
        }
    }
}
