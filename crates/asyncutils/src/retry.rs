use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff policy for [`supervise`].
///
/// The delay before retry `n` (zero-based) is `initial * multiplier^n`,
/// capped at `max`. With `max_attempts` set, the supervisor gives up after
/// that many failed attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl Backoff {
    /// Delay to wait after the given (zero-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// Whether another attempt is allowed after `failures` failed attempts.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }
}

/// Run `task` until it succeeds, fails with an error `is_retryable` rejects,
/// or the backoff policy runs out of attempts.
///
/// The task receives the zero-based attempt number. The last error is
/// returned when the supervisor gives up.
pub async fn supervise<T, E, F, Fut, R>(backoff: &Backoff, is_retryable: R, mut task: F) -> Result<T, E>
where
    E: Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match task(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && backoff.allows(attempt + 1) => {
                let delay = backoff.delay(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = ?err, "Supervised task failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) => {
                tracing::error!(attempt, error = ?err, "Supervised task failed; giving up");
                return Err(err);
            },
        }
    }
}
