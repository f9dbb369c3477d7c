// Idempotent stream provisioning with a fixed retry budget.
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::ProvisioningError;
use crate::platform::{Platform, StreamSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Make sure `spec.name` exists. "Already exists" counts as success since
/// several harness instances may race to create the same stream.
pub async fn ensure_stream<P>(
    platform: &P,
    spec: &StreamSpec,
    policy: RetryPolicy,
) -> Result<(), ProvisioningError>
where
    P: Platform + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match platform.create_stream(spec).await {
            Ok(()) => {
                info!(stream = %spec.name, subjects = ?spec.subjects, "stream created");
                return Ok(());
            }
            Err(err) if err.is_already_exists() => {
                info!(stream = %spec.name, "stream already exists");
                return Ok(());
            }
            Err(err) if attempt >= max_attempts => {
                return Err(ProvisioningError {
                    stream: spec.name.clone(),
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) => {
                warn!(
                    stream = %spec.name,
                    attempt,
                    max_attempts,
                    error = %err,
                    "stream provisioning failed, retrying"
                );
                sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::inprocess::InProcessPlatform;
    use crate::platform::Retention;

    fn spec() -> StreamSpec {
        StreamSpec {
            name: "CHURN".into(),
            subjects: vec!["churn.>".into()],
            retention: Retention::Limits,
            max_bytes: 1024 * 1024,
            max_age: Duration::from_secs(60),
            max_messages_per_subject: 1,
            replicas: 1,
        }
    }

    #[tokio::test]
    async fn creates_missing_stream() {
        let platform = InProcessPlatform::new();
        ensure_stream(&platform, &spec(), RetryPolicy::default())
            .await
            .expect("provision");
        assert_eq!(platform.stream_count(), 1);
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let platform = InProcessPlatform::new();
        ensure_stream(&platform, &spec(), RetryPolicy::default())
            .await
            .expect("first");
        ensure_stream(&platform, &spec(), RetryPolicy::default())
            .await
            .expect("second");
        assert_eq!(platform.stream_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let platform = InProcessPlatform::new();
        platform.fail_next_stream_creates(2);
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        };
        ensure_stream(&platform, &spec(), policy)
            .await
            .expect("provision");
        assert_eq!(platform.stream_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_budget() {
        let platform = InProcessPlatform::new();
        platform.fail_next_stream_creates(10);
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        };
        let err = ensure_stream(&platform, &spec(), policy)
            .await
            .expect_err("should fail");
        assert_eq!(err.attempts, 3);
        assert_eq!(err.stream, "CHURN");
        assert!(matches!(err.source, PlatformError::Unavailable(_)));
        assert_eq!(platform.stream_count(), 0);
    }
}
