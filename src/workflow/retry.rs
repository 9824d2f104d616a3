// Retry - explicit per-unit retry policy on top of the backoff crate
use crate::error::CollaboratorError;
use backoff::backoff::Backoff;
use backoff::future::retry_notify;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Deterministic exponential delays.
    None,
    /// `uniform(0, ceiling)` for each delay.
    Full,
}

/// Exponential backoff with jitter, applied to every fan-out unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: Jitter::Full,
        }
    }
}

/// Result of a retried operation plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, CollaboratorError>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Upper bound of the delay before retry number `retry` (0-based).
    pub fn delay_ceiling(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.delay_ceiling(retry);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full => {
                let micros = ceiling.as_micros() as u64;
                Duration::from_micros(rand::thread_rng().gen_range(0..=micros))
            }
        }
    }

    fn backoff(&self) -> PolicyBackoff {
        PolicyBackoff {
            policy: self.clone(),
            retries: 0,
        }
    }

    /// Run `op` until it succeeds, fails permanently, exhausts the policy, or
    /// `cancel` fires. Only [`CollaboratorError::Transient`] is retried.
    pub async fn retry<T, F, Fut>(&self, label: &str, cancel: &CancellationToken, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let attempts = AtomicU32::new(0);

        let operation = || {
            attempts.fetch_add(1, Ordering::SeqCst);
            let fut = op();
            async move {
                fut.await.map_err(|e| {
                    if e.is_retryable() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        };
        let notify = |e: CollaboratorError, delay: Duration| {
            tracing::warn!("🔄 {} failed ({}), retrying in {:?}", label, e, delay);
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
            r = retry_notify(self.backoff(), operation, notify) => r,
        };

        Attempted {
            result,
            attempts: attempts.load(Ordering::SeqCst),
        }
    }
}

/// Adapts [`RetryPolicy`] to the backoff crate: yields a delay after each
/// failed attempt until `max_attempts` is reached.
struct PolicyBackoff {
    policy: RetryPolicy,
    retries: u32,
}

impl Backoff for PolicyBackoff {
    fn reset(&mut self) {
        self.retries = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries + 1 >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for(self.retries);
        self.retries += 1;
        Some(delay)
    }
}
