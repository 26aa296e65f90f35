use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Enforces a minimum spacing between dispatches, shared by every worker.
///
/// Holds a single "next allowed instant" cursor. Each caller reserves the
/// slot at `max(now, cursor)` and pushes the cursor forward by `delay`, then
/// sleeps until its slot. Reservations are taken in lock order, so callers
/// are served first come, first served.
pub struct RateLimiter {
    delay: Duration,
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_allowed: Mutex::new(None),
        }
    }

    /// The configured spacing.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait for the next dispatch slot.
    ///
    /// Returns immediately when the delay is zero.
    pub async fn acquire(&self) {
        if self.delay.is_zero() {
            return;
        }

        let slot = self.reserve(Instant::now());
        tokio::time::sleep_until(slot).await;
    }

    /// Claim the next slot at or after `now` and advance the cursor.
    fn reserve(&self, now: Instant) -> Instant {
        // A poisoned cursor is still a valid instant; keep going with it.
        let mut next = self
            .next_allowed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let slot = match *next {
            Some(cursor) if cursor > now => cursor,
            _ => now,
        };
        *next = Some(slot + self.delay);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reserve_spaces_slots() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let now = Instant::now();

        let a = limiter.reserve(now);
        let b = limiter.reserve(now);
        let c = limiter.reserve(now);

        assert_eq!(a, now);
        assert_eq!(b - a, Duration::from_millis(100));
        assert_eq!(c - b, Duration::from_millis(100));
    }

    #[test]
    fn test_reserve_after_idle_starts_now() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let start = Instant::now();
        limiter.reserve(start);

        // Cursor is in the past relative to this call
        let later = start + Duration::from_secs(5);
        assert_eq!(limiter.reserve(later), later);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..50 {
            limiter.acquire().await;
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_are_spaced() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(50)));
        let mut handles = Vec::new();

        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut times = Vec::new();
        for h in handles {
            times.push(h.await.unwrap());
        }
        times.sort();

        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }
    }
}
