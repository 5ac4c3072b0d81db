//! Bounded exponential backoff for polling asynchronous backends

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Polling policy of one adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
    pub jitter: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_micros(100),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(15 * 60),
            jitter: Duration::from_millis(200),
        }
    }
}

/// What a call to [`Waiter::wait`] decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// Poll once more
    Ready,
    TimedOut,
    Cancelled,
}

/// Tracks elapsed time and attempts for one polled operation
#[derive(Debug, Clone)]
pub struct Waiter {
    start: Instant,
    config: WaiterConfig,
    attempt: u32,
}

impl Waiter {
    pub fn new(start: Instant, config: WaiterConfig) -> Self {
        Self {
            start,
            config,
            attempt: 0,
        }
    }

    pub fn start_now(config: WaiterConfig) -> Self {
        Self::new(Instant::now(), config)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// `min(max_delay, min_delay * 2^attempt)`, without jitter
    pub fn backoff(&self) -> Duration {
        let factor = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        self.config
            .min_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.config.jitter.as_nanos()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..=max))
    }

    /// Sleep before the next poll. Returns [`WaitState::TimedOut`] without
    /// sleeping once the budget is spent, and [`WaitState::Cancelled`] as
    /// soon as the token fires.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> WaitState {
        if cancel.is_cancelled() {
            return WaitState::Cancelled;
        }
        let elapsed = self.elapsed();
        if elapsed >= self.config.timeout {
            return WaitState::TimedOut;
        }

        let remaining = self.config.timeout - elapsed;
        let delay = (self.backoff() + self.jitter()).min(remaining);
        self.attempt = self.attempt.saturating_add(1);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitState::Cancelled,
            _ = tokio::time::sleep(delay) => WaitState::Ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(timeout: Duration) -> WaiterConfig {
        WaiterConfig {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            timeout,
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut waiter = Waiter::start_now(config(Duration::from_secs(60)));
        let mut delays = Vec::new();
        for attempt in 0..5 {
            waiter.attempt = attempt;
            delays.push(waiter.backoff().as_millis());
        }
        assert_eq!(delays, vec![100, 200, 400, 400, 400]);

        waiter.attempt = 40;
        assert_eq!(waiter.backoff(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_budget() {
        let token = CancellationToken::new();
        let start = Instant::now();
        let mut waiter = Waiter::new(start, config(Duration::from_secs(1)));

        let mut polls = 0;
        let state = loop {
            match waiter.wait(&token).await {
                WaitState::Ready => polls += 1,
                other => break other,
            }
        };

        assert_eq!(state, WaitState::TimedOut);
        // 100 + 200 + 400 + 300 (clamped to the remaining budget)
        assert_eq!(polls, 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_below_max_delay_bounds_the_wait() {
        let token = CancellationToken::new();
        let start = Instant::now();
        let mut waiter = Waiter::new(
            start,
            WaiterConfig {
                max_delay: Duration::from_secs(5),
                ..config(Duration::from_secs(1))
            },
        );

        let mut slept = Vec::new();
        let state = loop {
            let before = Instant::now();
            match waiter.wait(&token).await {
                WaitState::Ready => slept.push(before.elapsed().as_millis()),
                other => break other,
            }
        };

        assert_eq!(state, WaitState::TimedOut);
        // the fourth delay would be 800ms, only 300ms of budget remain
        assert_eq!(slept, vec![100, 200, 400, 300]);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let mut waiter = Waiter::start_now(WaiterConfig {
            min_delay: Duration::from_secs(10),
            ..config(Duration::from_secs(60))
        });

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        assert_eq!(waiter.wait(&token).await, WaitState::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
        // already cancelled: no sleep at all
        assert_eq!(waiter.wait(&token).await, WaitState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_stays_in_bounds() {
        let token = CancellationToken::new();
        let mut waiter = Waiter::start_now(WaiterConfig {
            jitter: Duration::from_millis(50),
            ..config(Duration::from_secs(60))
        });
        let start = Instant::now();
        assert_eq!(waiter.wait(&token).await, WaitState::Ready);
        let slept = start.elapsed();
        assert!(slept >= Duration::from_millis(100));
        assert!(slept <= Duration::from_millis(151));
        assert_eq!(waiter.attempt(), 1);
    }
}
