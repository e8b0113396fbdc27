//! Startup readiness loop.
//!
//! Blocks boot until a dependency answers its probe. The sleeper is
//! injected so tests can count sleeps instead of waiting for them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// How often, and how many times, to probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("dependency not ready after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
}

/// Suspends the caller between probes.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Call `probe` until it reports ready.
///
/// A ready probe returns immediately without sleeping. With a bound of `n`
/// attempts the loop gives up after the `n`th failure, without a trailing
/// sleep.
pub async fn wait_until_ready<F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut probe: F,
) -> Result<u32, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        if probe().await {
            if attempts > 1 {
                info!(attempts, "Dependency ready");
            }
            return Ok(attempts);
        }

        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            warn!(attempts, "Giving up on dependency");
            return Err(RetryError::RetryExhausted { attempts });
        }

        warn!(
            attempt = attempts,
            retry_in = ?policy.interval,
            "Dependency not ready, retrying"
        );
        sleeper.sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    fn policy(max_attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(250),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_ready_probe_never_sleeps() {
        let sleeper = RecordingSleeper::default();
        let attempts = wait_until_ready(&policy(None), &sleeper, || async { true })
            .await
            .unwrap();

        assert_eq!(attempts, 1);
        assert!(sleeper.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sleeps_once_per_failure() {
        let sleeper = RecordingSleeper::default();
        let mut remaining_failures = 3;

        let attempts = wait_until_ready(&policy(None), &sleeper, || {
            let ready = remaining_failures == 0;
            remaining_failures -= usize::from(!ready);
            async move { ready }
        })
        .await
        .unwrap();

        assert_eq!(attempts, 4);
        assert_eq!(
            *sleeper.sleeps.lock().unwrap(),
            vec![Duration::from_millis(250); 3]
        );
    }

    #[tokio::test]
    async fn test_bounded_attempts_exhaust_without_trailing_sleep() {
        let sleeper = RecordingSleeper::default();
        let err = wait_until_ready(&policy(Some(3)), &sleeper, || async { false })
            .await
            .unwrap_err();

        assert_eq!(err, RetryError::RetryExhausted { attempts: 3 });
        assert_eq!(sleeper.sleeps.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_policy_parses_humantime() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{ "interval": "250ms", "max_attempts": 4 }"#).unwrap();
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, Some(4));
    }
}
