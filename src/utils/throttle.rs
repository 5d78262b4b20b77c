//! Log throttling utility
//!
//! A slot with no card inserted fails every mount attempt the browser
//! makes. The throttler keeps such repeated warnings to one per interval.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Limits how often a message with the same key is logged
pub struct LogThrottler {
    last_logged: Mutex<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a message for `key` should be logged now
    ///
    /// A `true` answer starts a new interval for that key.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget `key`, so its next message is logged immediately
    pub fn clear(&self, key: &str) {
        self.last_logged.lock().remove(key);
    }

    pub fn clear_all(&self) {
        self.last_logged.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.last_logged.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_logged.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
///
/// ```rust
/// use slotfs::utils::LogThrottler;
/// use slotfs::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "sd_absent", "No card in {} slot", "sd");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}
