use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counters since the last report, kept cheap enough to bump on every page
/// moved.
pub struct RecentStats {
    pages_fetched: AtomicUsize,
    pages_synced: AtomicUsize,
    pages_evicted: AtomicUsize,
    errors: AtomicUsize,
    start: Mutex<Instant>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordedStats {
    pub pages_fetched: usize,
    pub pages_synced: usize,
    pub pages_evicted: usize,
    pub errors: usize,
}

impl RecordedStats {
    pub fn had_activity(&self) -> bool {
        *self != Self::default()
    }
}

impl Default for RecentStats {
    fn default() -> Self {
        Self {
            pages_fetched: AtomicUsize::new(0),
            pages_synced: AtomicUsize::new(0),
            pages_evicted: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start: Mutex::new(Instant::now()),
        }
    }
}

impl RecentStats {
    pub fn pages_fetched(&self, count: usize) {
        self.pages_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn pages_synced(&self, count: usize) {
        self.pages_synced.fetch_add(count, Ordering::Relaxed);
    }

    pub fn pages_evicted(&self, count: usize) {
        self.pages_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dt(&self) -> Duration {
        self.start.lock().unwrap().elapsed()
    }

    /// Take a snapshot and restart the measurement window.
    pub fn reset(&self) -> RecordedStats {
        *self.start.lock().unwrap() = Instant::now();
        RecordedStats {
            pages_fetched: self.pages_fetched.swap(0, Ordering::Relaxed),
            pages_synced: self.pages_synced.swap(0, Ordering::Relaxed),
            pages_evicted: self.pages_evicted.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
        }
    }
}

pub fn pages_to_kbytes_per_sec(pages: usize, dt: Duration) -> f32 {
    let kbytes = (pages * 4096 / 1024) as f32;
    let secs = dt.as_secs_f32();
    if secs == 0.0 {
        0.0
    } else {
        kbytes / secs
    }
}
