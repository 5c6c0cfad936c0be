//! Exponential reconnect backoff.

use std::time::Duration;

/// Delay schedule for consecutive reconnect attempts.
///
/// Attempt `n` (1-based) waits `initial * 2^(n-1)`, capped at `max`.
/// Never runs out: the session keeps retrying for as long as it runs.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Advance to the next attempt and return how long to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let factor = 2u32.saturating_pow(self.attempt - 1);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Consecutive attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let mut b = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(b.attempt(), 6);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut b = ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(5));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_many_attempts_do_not_overflow() {
        let mut b = ReconnectBackoff::new(Duration::from_secs(2), Duration::from_secs(60));
        for _ in 0..200 {
            assert!(b.next_delay() <= Duration::from_secs(60));
        }
    }
}
