//! Time source for the queue.
//!
//! All timestamps are UTC RFC 3339 with millisecond precision and a literal
//! trailing `Z`, which keeps lexicographic string comparison (`locked_at <
//! cutoff`) equivalent to chronological comparison. Tests inject a fake
//! clock so claim ordering, scheduling, and backoff can be asserted without
//! real sleeps.

use chrono::{DateTime, SecondsFormat, Utc};

/// A source of "now", abstracted so tests can control it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// `now()` rendered in the canonical on-disk timestamp format.
    fn now_iso(&self) -> String {
        format_iso(self.now())
    }
}

/// Render a timestamp in the canonical on-disk format.
pub fn format_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a canonical timestamp back into a `DateTime<Utc>`.
pub fn parse_iso(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A clock whose value advances only when told to — lets tests assert
    /// exact `next_run_at`/backoff values without timing flakiness.
    pub struct FakeClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FakeClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        pub fn advance(&self, seconds: i64) {
            let mut guard = self.now.lock().unwrap();
            *guard += chrono::Duration::seconds(seconds);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }
}
