// Work Function Wrappers - retrying transactional work
// A work function that can hit transient conflicts is re-run until it either
// succeeds or fails with something that is not worth retrying. The retry
// count travels with the value so summarizers can report it.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Whether a failed attempt should be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

/// Classifies errors by labels found anywhere in their chain
#[derive(Debug, Clone)]
pub struct TransientLabels {
    labels: Vec<String>,
}

impl TransientLabels {
    pub fn new<I, L>(labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Labels used by transactional document stores
    pub fn transactions() -> Self {
        Self::new(["TransientTransactionError", "UnknownTransactionCommitResult"])
    }

    pub fn classify(&self, error: &anyhow::Error) -> ErrorClass {
        let transient = error.chain().any(|cause| {
            let message = cause.to_string();
            self.labels.iter().any(|label| message.contains(label.as_str()))
        });
        if transient {
            ErrorClass::Transient
        } else {
            ErrorClass::Fatal
        }
    }
}

/// Retry limits for [`measure_with_retry`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `None` retries transient failures for as long as they keep happening
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Exponential backoff starting at `base_delay`, capped at `max_delay`
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }
}

/// Run `operation` until it succeeds or fails fatally
///
/// Returns the value together with the number of retries it took. A fatal
/// error, or a transient one past `policy.max_retries`, is returned as is.
pub async fn measure_with_retry<T, C, F, Fut>(
    policy: &RetryPolicy,
    classify: C,
    mut operation: F,
) -> Result<(T, u32)>
where
    C: Fn(&anyhow::Error) -> ErrorClass,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0u32;
    let mut delay = policy.base_delay;

    loop {
        match operation().await {
            Ok(value) => {
                if retries > 0 {
                    debug!("Operation succeeded after {} retries", retries);
                }
                return Ok((value, retries));
            }
            Err(e) if classify(&e) == ErrorClass::Fatal => {
                return Err(e);
            }
            Err(e) if policy.max_retries.is_some_and(|max| retries >= max) => {
                error!("Operation failed after {} retries: {}", retries, e);
                return Err(e);
            }
            Err(e) => {
                retries += 1;
                warn!("Transient failure (retry {}): {}", retries, e);

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, policy.max_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> anyhow::Error {
        anyhow::anyhow!("write conflict (TransientTransactionError)")
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let attempts = &AtomicU32::new(0);
        let labels = TransientLabels::transactions();

        let (value, retries) = measure_with_retry(
            &RetryPolicy::default(),
            |e| labels.classify(e),
            move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(transient())
                } else {
                    Ok("committed")
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, "committed");
        assert_eq!(retries, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let attempts = &AtomicU32::new(0);
        let labels = TransientLabels::transactions();

        let result: Result<((), u32)> = measure_with_retry(
            &RetryPolicy::default(),
            |e| labels.classify(e),
            move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("duplicate key"))
            },
        )
        .await;

        assert_eq!(result.unwrap_err().to_string(), "duplicate key");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_limit_and_backoff() {
        let attempts = &AtomicU32::new(0);
        let policy = RetryPolicy::default()
            .with_max_retries(2)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(15));

        let start = tokio::time::Instant::now();
        let result: Result<((), u32)> = measure_with_retry(
            &policy,
            |_| ErrorClass::Transient,
            move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 10ms then 15ms (capped)
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(25) && waited < Duration::from_millis(30));
    }

    #[test]
    fn test_labels_match_anywhere_in_chain() {
        let labels = TransientLabels::transactions();
        let wrapped = transient().context("insert failed");
        assert_eq!(labels.classify(&wrapped), ErrorClass::Transient);
        assert_eq!(
            labels.classify(&anyhow::anyhow!("network down")),
            ErrorClass::Fatal
        );
    }
}
