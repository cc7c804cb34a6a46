use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

pub const WINDOW_CAPACITY: usize = 100;
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Diagnostics {
    last_call_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_time: Option<DateTime<Utc>>,
}

/// Call history and cooldown state of a single provider.
#[derive(Debug)]
pub struct ProviderStats {
    calls_made: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    // Guards the counter pair so readers never observe made != succeeded + failed.
    record_lock: Mutex<()>,
    window: Mutex<VecDeque<Instant>>,
    cooldown_until: RwLock<Option<Instant>>,
    diagnostics: RwLock<Diagnostics>,
}

impl Default for ProviderStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderStats {
    pub fn new() -> Self {
        Self {
            calls_made: AtomicU64::new(0),
            calls_succeeded: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            record_lock: Mutex::new(()),
            window: Mutex::new(VecDeque::with_capacity(WINDOW_CAPACITY + 1)),
            cooldown_until: RwLock::new(None),
            diagnostics: RwLock::new(Diagnostics::default()),
        }
    }

    pub fn record_call(&self, success: bool, error_message: Option<&str>) {
        self.record_call_at(Instant::now(), success, error_message);
    }

    pub(crate) fn record_call_at(&self, at: Instant, success: bool, error_message: Option<&str>) {
        {
            let _guard = self.record_lock.lock();
            self.calls_made.fetch_add(1, Ordering::AcqRel);
            if success {
                self.calls_succeeded.fetch_add(1, Ordering::AcqRel);
            } else {
                self.calls_failed.fetch_add(1, Ordering::AcqRel);
            }
        }

        {
            let mut window = self.window.lock();
            window.push_back(at);
            while window.len() > WINDOW_CAPACITY {
                window.pop_front();
            }
        }

        let now = Utc::now();
        let mut diagnostics = self.diagnostics.write();
        diagnostics.last_call_time = Some(now);
        if !success {
            diagnostics.last_error = Some(error_message.unwrap_or("unknown error").to_string());
            diagnostics.last_error_time = Some(now);
        }
    }

    pub fn set_cooldown(&self, duration: Duration) {
        let until = Instant::now() + duration;
        *self.cooldown_until.write() = Some(until);
        debug!("Cooldown set for {:?}", duration);
    }

    pub fn is_on_cooldown(&self) -> bool {
        self.is_on_cooldown_at(Instant::now())
    }

    pub(crate) fn is_on_cooldown_at(&self, now: Instant) -> bool {
        match *self.cooldown_until.read() {
            None => return false,
            Some(until) if now < until => return true,
            Some(_) => {}
        }

        let mut cooldown = self.cooldown_until.write();
        // Another writer may have installed a fresh cooldown in between.
        match *cooldown {
            Some(until) if now < until => true,
            _ => {
                *cooldown = None;
                false
            }
        }
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        (*self.cooldown_until.read())
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    pub fn calls_in_last_minute(&self) -> usize {
        self.calls_in_window_at(Instant::now())
    }

    pub(crate) fn calls_in_window_at(&self, now: Instant) -> usize {
        self.window
            .lock()
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < RATE_WINDOW)
            .count()
    }

    pub fn success_rate(&self) -> f64 {
        let (made, succeeded, _) = self.counters();
        if made == 0 {
            return 100.0;
        }
        succeeded as f64 / made as f64 * 100.0
    }

    pub fn calls_made(&self) -> u64 {
        self.calls_made.load(Ordering::Acquire)
    }

    pub fn calls_succeeded(&self) -> u64 {
        self.calls_succeeded.load(Ordering::Acquire)
    }

    pub fn calls_failed(&self) -> u64 {
        self.calls_failed.load(Ordering::Acquire)
    }

    /// Consistent `(made, succeeded, failed)` triple.
    pub fn counters(&self) -> (u64, u64, u64) {
        let _guard = self.record_lock.lock();
        (self.calls_made(), self.calls_succeeded(), self.calls_failed())
    }

    pub fn last_error(&self) -> Option<String> {
        self.diagnostics.read().last_error.clone()
    }

    pub fn last_call_time(&self) -> Option<DateTime<Utc>> {
        self.diagnostics.read().last_call_time
    }

    pub fn last_error_time(&self) -> Option<DateTime<Utc>> {
        self.diagnostics.read().last_error_time
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (calls_made, calls_succeeded, calls_failed) = self.counters();
        let diagnostics = self.diagnostics.read();
        StatsSnapshot {
            calls_made,
            calls_succeeded,
            calls_failed,
            success_rate: self.success_rate(),
            calls_last_minute: self.calls_in_last_minute(),
            last_call_time: diagnostics.last_call_time,
            last_error: diagnostics.last_error.clone(),
            last_error_time: diagnostics.last_error_time,
            cooldown_remaining_secs: self.cooldown_remaining().map(|d| d.as_secs_f64()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub calls_made: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub success_rate: f64,
    pub calls_last_minute: usize,
    pub last_call_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub cooldown_remaining_secs: Option<f64>,
}
