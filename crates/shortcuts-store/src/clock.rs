use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Source of commit and enqueue timestamps.
pub trait Clock: Send + Sync {
    /// Never returns a value earlier than a previous call on the same clock.
    fn now(&self) -> DateTime<Utc>;
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Wall clock clamped to be non-decreasing.
///
/// A wall-clock step backwards (NTP adjustment, manual change) is absorbed by
/// repeating the last observed millisecond until real time catches up, so
/// queue order by `enqueued_at` never contradicts enqueue order.
pub struct MonotonicClock {
    last_ms: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last_ms: AtomicI64::new(i64::MIN),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        loop {
            let wall = Utc::now().timestamp_millis();
            let prev = self.last_ms.load(Ordering::Acquire);
            let next = wall.max(prev);
            if next == prev {
                return from_millis(prev);
            }
            if self
                .last_ms
                .compare_exchange(prev, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return from_millis(next);
            }
            // CAS failed, another caller advanced the clock; retry
        }
    }
}

/// Manually driven clock for deterministic tests.
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_ms: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now_ms.fetch_add(ms.max(0), Ordering::AcqRel);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.now_ms.fetch_max(at.timestamp_millis(), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        from_millis(self.now_ms.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn monotonic_never_decreases() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let ts = clock.now();
            assert!(ts >= prev);
            prev = ts;
        }
    }

    #[test]
    fn monotonic_concurrent() {
        let clock = Arc::new(MonotonicClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || {
                    let mut prev = clock.now();
                    for _ in 0..500 {
                        let ts = clock.now();
                        assert!(ts >= prev);
                        prev = ts;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn manual_clock_only_moves_forward() {
        let start = from_millis(1_000);
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(250);
        assert_eq!(clock.now().timestamp_millis(), 1_250);

        clock.set(from_millis(10));
        assert_eq!(clock.now().timestamp_millis(), 1_250);
        clock.advance(-5);
        assert_eq!(clock.now().timestamp_millis(), 1_250);
    }
}
