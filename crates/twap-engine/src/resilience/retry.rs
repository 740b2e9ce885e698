use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Suspends the current task. Swapped out in tests so retry loops run
/// without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed-delay retry policy, optionally bounded.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    /// At most `max_attempts` attempts in total, at least one.
    pub fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts.max(1)),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Retries forever.
    pub fn unlimited(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }

    pub async fn wait(&self) {
        self.sleeper.sleep(self.delay).await;
    }
}
