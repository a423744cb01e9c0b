//! Emit rate limiting for the scanner.

/// Token bucket refilled from the bus clock, so limits stay coherent across
/// clock-skewed hosts. Acquisition never blocks; callers drop and count.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    rate_per_sec: f64,
    tokens: f64,
    last_refill_ms: Option<i64>,
}

impl TokenBucket {
    /// A full bucket holding `burst` tokens, refilled at `rate_per_sec`.
    #[must_use]
    pub fn new(burst: u32, rate_per_sec: f64) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            rate_per_sec: rate_per_sec.max(0.0),
            tokens: capacity,
            last_refill_ms: None,
        }
    }

    /// Take one token when available. `now_ms` must come from the bus clock.
    pub fn try_acquire(&mut self, now_ms: i64) -> bool {
        if let Some(last) = self.last_refill_ms {
            let elapsed_sec = (now_ms - last).max(0) as f64 / 1000.0;
            self.tokens = (self.tokens + elapsed_sec * self.rate_per_sec).min(self.capacity);
        }
        self.last_refill_ms = Some(now_ms);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_drains_then_blocks() {
        let mut bucket = TokenBucket::new(3, 1.0);
        assert!(bucket.try_acquire(1_000));
        assert!(bucket.try_acquire(1_000));
        assert!(bucket.try_acquire(1_000));
        assert!(!bucket.try_acquire(1_000));
    }

    #[test]
    fn tokens_refill_with_bus_time() {
        let mut bucket = TokenBucket::new(1, 2.0);
        assert!(bucket.try_acquire(0));
        assert!(!bucket.try_acquire(100));
        // 500ms at 2 tokens/sec earns one token back.
        assert!(bucket.try_acquire(600));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let mut bucket = TokenBucket::new(2, 100.0);
        assert!(bucket.try_acquire(0));
        assert!(bucket.try_acquire(0));
        // A long gap refills to capacity, not beyond.
        assert!(bucket.try_acquire(10_000));
        assert!(bucket.try_acquire(10_000));
        assert!(!bucket.try_acquire(10_000));
    }

    #[test]
    fn clock_regression_is_tolerated() {
        let mut bucket = TokenBucket::new(1, 1.0);
        assert!(bucket.try_acquire(5_000));
        assert!(!bucket.try_acquire(4_000));
    }
}
