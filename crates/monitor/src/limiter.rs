use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Token bucket shared by every event processor. Waiters are served in
/// arrival order because the bucket lock is fair.
#[derive(Debug)]
pub struct RateLimiter {
    period: Duration,
    burst: u32,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    refilled_at: Instant,
}

impl RateLimiter {
    /// One token every `period`, holding at most `burst` tokens.
    pub fn new(period: Duration, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            period: period.max(Duration::from_nanos(1)),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        }
    }

    pub fn per_second() -> Self {
        Self::new(Duration::from_secs(1), 1)
    }

    /// Waits until a token is available and takes it. Dropping the future
    /// gives up the place in line without consuming anything.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        loop {
            match bucket.take(Instant::now(), self.period, self.burst) {
                Ok(()) => return,
                Err(wait) => sleep(wait).await,
            }
        }
    }
}

impl Bucket {
    fn take(&mut self, now: Instant, period: Duration, burst: u32) -> Result<(), Duration> {
        self.refill(now, period, burst);
        if self.tokens > 0 {
            self.tokens -= 1;
            return Ok(());
        }
        let elapsed = now.saturating_duration_since(self.refilled_at);
        Err(period.saturating_sub(elapsed))
    }

    fn refill(&mut self, now: Instant, period: Duration, burst: u32) {
        if self.tokens >= burst {
            self.refilled_at = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.refilled_at);
        let earned = elapsed.as_nanos() / period.as_nanos();
        if earned == 0 {
            return;
        }
        let earned = u32::try_from(earned).unwrap_or(u32::MAX);
        self.tokens = self.tokens.saturating_add(earned).min(burst);
        self.refilled_at = if self.tokens >= burst {
            now
        } else {
            self.refilled_at + period * earned
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_waited(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "waited {elapsed:?}, expected {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_acquisitions_by_period() {
        let limiter = RateLimiter::per_second();
        let start = Instant::now();

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.acquire().await;
        limiter.acquire().await;

        assert_waited(start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_served_immediately() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 3);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert_waited(start, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_refills_up_to_burst_only() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 2);
        limiter.acquire().await;
        limiter.acquire().await;

        sleep(Duration::from_secs(10)).await;
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert_waited(start, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_wait_consumes_nothing() {
        let limiter = RateLimiter::per_second();
        limiter.acquire().await;

        let waited = tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(waited.is_err());

        let start = Instant::now();
        limiter.acquire().await;
        assert_waited(start, Duration::from_millis(900));
    }
}
