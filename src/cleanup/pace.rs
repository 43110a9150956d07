//! Request pacing for the hosted service's rate limits.
//!
//! The remote APIs tolerate one call per fixed interval, so pacing is a
//! minimum-inter-call interval rather than a bare sleep; tests swap in
//! [`NoThrottle`] and never touch the wall clock.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

#[async_trait]
pub trait Throttle: Send + Sync {
    /// Waits until at least the configured interval has passed since the
    /// previous call. The first call returns immediately.
    async fn wait(&self);
}

/// Wall-clock minimum-interval throttle used in production.
pub struct MinInterval {
    every: Duration,
    last: Mutex<Option<Instant>>,
}

impl MinInterval {
    pub fn new(every: Duration) -> Self {
        Self {
            every,
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Throttle for MinInterval {
    async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.every {
                sleep(self.every - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// No-op throttle for tests.
pub struct NoThrottle;

#[async_trait]
impl Throttle for NoThrottle {
    async fn wait(&self) {}
}
