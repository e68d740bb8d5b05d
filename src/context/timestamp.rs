use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Strictly increasing write timestamps in microseconds.
///
/// Follows the wall clock but never repeats or goes backwards, so statements
/// stamped from one generator apply in the order they were stamped.
#[derive(Debug, Default)]
pub struct TimestampGenerator {
    last: AtomicI64,
}

impl TimestampGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        self.next_range(1)
    }

    /// Reserves `count` consecutive timestamps and returns the first one.
    pub fn next_range(&self, count: usize) -> i64 {
        let count = count.max(1) as i64;
        let now = Utc::now().timestamp_micros();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let base = now.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                base + count - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return base,
                Err(current) => last = current,
            }
        }
    }
}
