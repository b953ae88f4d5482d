//! Monotonic request timestamps.
//!
//! Wire timestamps are UTC microseconds. Requests within the same second
//! must still be unique because replies are matched by the echoed value, so
//! a second that already produced a timestamp yields `last + 1_000_000`.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Process-lifetime source of strictly increasing timestamps.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<u64>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unique timestamp in microseconds.
    pub fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let mut last = self.last.lock();
        let ts = if *last == 0 || now / MICROS_PER_SECOND > *last / MICROS_PER_SECOND {
            now
        } else {
            // same second already produced one, or the wall clock stepped back
            *last + MICROS_PER_SECOND
        };
        *last = ts;
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing_within_a_second() {
        let clock = MonotonicClock::new();
        let a = clock.next();
        let b = clock.next();
        let c = clock.next();
        assert!(b > a && c > b);
        // collisions inside one second advance by a full second
        assert!(b == a + MICROS_PER_SECOND || b / MICROS_PER_SECOND > a / MICROS_PER_SECOND);
    }

    #[test]
    fn test_shared_between_threads() {
        use std::sync::Arc;

        let clock = Arc::new(MonotonicClock::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let clock = Arc::clone(&clock);
            handles.push(std::thread::spawn(move || {
                (0..50).map(|_| clock.next()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), before, "timestamps must be unique");
    }
}
