//! Retry schedule for registry writes.
//!
//! The curve is `base * attempt^e`: quick first retries (100ms, ~650ms, ~2s)
//! that flatten into a hard ceiling once `attempt` passes 13.

use std::future::Future;
use std::time::Duration;

use meshkit_registry::RegistryError;

/// Attempts past this one wait the ceiling.
const LAST_CURVED_ATTEMPT: u32 = 13;

/// Wait before retry `attempt` (1-based) using the default schedule.
///
/// Pure: never sleeps. `attempt` 0 is treated as 1.
#[must_use]
pub fn backoff(attempt: u32) -> Duration {
    Backoff::default().delay(attempt)
}

/// Configurable exponential-ish backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(120),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay for `attempt`, never above `max`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        if attempt > LAST_CURVED_ATTEMPT {
            return self.max;
        }
        let factor = f64::from(attempt).powf(std::f64::consts::E);
        let secs = self.base.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs).map_or(self.max, |d| d.min(self.max))
    }
}

/// Bounded retry of a registry write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct RegisterRetry {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for RegisterRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RegisterRetry {
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `op` until it succeeds or the attempts are spent.
    ///
    /// Sleeps between attempts but not after the last one.
    ///
    /// # Errors
    /// Returns the error of the final attempt.
    pub async fn run<F, Fut>(&self, service: &str, mut op: F) -> Result<(), RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RegistryError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(service, attempt, "registration succeeded after retries");
                    }
                    return Ok(());
                }
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        service,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "registration attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
