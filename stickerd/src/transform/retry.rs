//! Bounded retry around a transform call.

use std::time::Duration;

use metrics::counter;
use tracing::{info, warn};

use super::{EditRequest, EditResponse, ImageTransformer, TransformError};
use crate::config::TransformConfig;

/// Attempts are counted including the first one: `max_attempts = 2` means one retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_secs(2),
        }
    }
}

impl From<&TransformConfig> for RetryPolicy {
    fn from(config: &TransformConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: config.retry_delay,
        }
    }
}

/// Call `transformer`, retrying transient failures with a fixed delay until the policy is used up.
///
/// Non-transient errors are returned after the first attempt.
pub async fn edit_with_retry(
    transformer: &dyn ImageTransformer,
    request: EditRequest,
    policy: RetryPolicy,
) -> Result<EditResponse, TransformError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        counter!("stickerd_transform_attempts_total").increment(1);
        info!(attempt, max_attempts, "Calling image transform provider");

        match transformer.edit(request.clone()).await {
            Ok(response) => {
                if attempt > 1 {
                    info!(attempt, "Image transform succeeded after retry");
                }
                return Ok(response);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(
                    attempt,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "Transient transform failure, retrying"
                );
                counter!("stickerd_transform_retries_total").increment(1);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(attempt, transient = err.is_transient(), error = %err, "Image transform failed");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedTransformer, edit_request, generated};
    use tokio::time::Instant;

    fn api_error(message: &str) -> TransformError {
        TransformError::Api {
            status: 400,
            message: message.to_string(),
            code: None,
            kind: Some("invalid_request_error".to_string()),
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_transient_failure_is_retried_once() {
        let transformer = ScriptedTransformer::new([
            Err(TransformError::Connection("connection reset by peer".into())),
            Ok(generated("aGk=")),
        ]);

        let started = Instant::now();
        let response = edit_with_retry(transformer.as_ref(), edit_request(), RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(response.data[0].b64_json.as_deref(), Some("aGk="));
        assert_eq!(transformer.call_count(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_failure_is_not_retried() {
        let transformer = ScriptedTransformer::new([Err(api_error("Invalid image")), Ok(generated("aGk="))]);

        let err = edit_with_retry(transformer.as_ref(), edit_request(), RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TransformError::Api { status: 400, .. }));
        assert_eq!(transformer.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_after_max_attempts() {
        let transformer = ScriptedTransformer::new([
            Err(TransformError::Connection("reset".into())),
            Err(TransformError::Connection("reset again".into())),
            Ok(generated("aGk=")),
        ]);

        let err = edit_with_retry(transformer.as_ref(), edit_request(), RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TransformError::Connection(ref m) if m == "reset again"));
        assert_eq!(transformer.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_retried() {
        let transformer = ScriptedTransformer::new([
            Err(TransformError::Timeout(Duration::from_secs(60))),
            Ok(generated("aGk=")),
        ]);

        assert!(
            edit_with_retry(transformer.as_ref(), edit_request(), RetryPolicy::default())
                .await
                .is_err()
        );
        assert_eq!(transformer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_policy_never_retries() {
        let transformer = ScriptedTransformer::new([
            Err(TransformError::Connection("reset".into())),
            Ok(generated("aGk=")),
        ]);
        let policy = RetryPolicy {
            max_attempts: 1,
            delay: Duration::ZERO,
        };

        assert!(edit_with_retry(transformer.as_ref(), edit_request(), policy).await.is_err());
        assert_eq!(transformer.call_count(), 1);
    }

    #[test]
    fn test_policy_from_config_clamps_attempts() {
        let config = TransformConfig {
            max_attempts: 0,
            retry_delay: Duration::from_millis(500),
            ..Default::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(500));
    }
}
