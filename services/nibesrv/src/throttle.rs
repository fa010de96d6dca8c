//! Poll-rate throttle

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Enforces a minimum interval between poll cycles
#[derive(Debug)]
pub struct RateThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl RateThrottle {
    /// Interval of `3600 / reads_per_hour` seconds
    pub fn new(reads_per_hour: u32) -> Self {
        let reads = if reads_per_hour == 0 {
            warn!("reads_per_hour is 0, throttling to one read per hour");
            1
        } else {
            reads_per_hour
        };
        Self::with_interval(Duration::from_secs_f64(SECONDS_PER_HOUR / f64::from(reads)))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until one interval has passed since the previous return
    ///
    /// The first call returns immediately. Returns `false` when `token` was
    /// cancelled during the wait.
    pub async fn wait_for_next_cycle(&mut self, token: &CancellationToken) -> bool {
        if let Some(last) = self.last {
            let deadline = last + self.interval;
            tokio::select! {
                () = token.cancelled() => {
                    debug!("Throttle wait cancelled");
                    return false;
                }
                () = sleep_until(deadline) => {}
            }
        }

        if token.is_cancelled() {
            return false;
        }
        self.last = Some(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_rate() {
        assert_eq!(RateThrottle::new(60).interval(), Duration::from_secs(60));
        assert_eq!(RateThrottle::new(3600).interval(), Duration::from_secs(1));
        assert_eq!(RateThrottle::new(7200).interval(), Duration::from_millis(500));
        assert_eq!(RateThrottle::new(0).interval(), Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_waits_are_spaced() {
        let token = CancellationToken::new();
        let mut throttle = RateThrottle::new(3600);

        let start = Instant::now();
        assert!(throttle.wait_for_next_cycle(&token).await);
        assert!(throttle.wait_for_next_cycle(&token).await);
        assert!(start.elapsed() >= Duration::from_secs(1));

        assert!(throttle.wait_for_next_cycle(&token).await);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_counts_toward_interval() {
        let token = CancellationToken::new();
        let mut throttle = RateThrottle::with_interval(Duration::from_secs(10));

        assert!(throttle.wait_for_next_cycle(&token).await);
        tokio::time::sleep(Duration::from_secs(4)).await;

        let before = Instant::now();
        assert!(throttle.wait_for_next_cycle(&token).await);
        let waited = before.elapsed();
        assert!(waited >= Duration::from_secs(6));
        assert!(waited < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let token = CancellationToken::new();
        let mut throttle = RateThrottle::with_interval(Duration::from_secs(3600));
        assert!(throttle.wait_for_next_cycle(&token).await);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        let before = Instant::now();
        assert!(!throttle.wait_for_next_cycle(&token).await);
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_cancelled_token_returns_false_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let mut throttle = RateThrottle::new(60);
        assert!(!throttle.wait_for_next_cycle(&token).await);
    }
}
