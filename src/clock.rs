use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstracts wall-clock reads so the aggregator and window math can be
/// driven deterministically in tests.
pub trait Clock: Send + Sync {
    /// Current time as unix seconds.
    fn now_unix(&self) -> i64;
}

/// Real wall-clock source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the unix epoch")
            .as_secs() as i64
    }
}

/// A clock whose reading is set explicitly by a test, for deterministic
/// assertions about rates, latencies, and window math.
#[derive(Debug)]
pub struct FakeClock {
    now: AtomicI64,
}

impl FakeClock {
    pub fn new(start_unix: i64) -> Self {
        Self {
            now: AtomicI64::new(start_unix),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, unix: i64) {
        self.now.store(unix, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
