//! Retry controller for fallible judgment calls
//!
//! External failures are classified exactly once, at the call boundary
//! that produced them; the retry loop switches on the closed
//! [`FailureKind`] and never inspects free text. Backoff starts at the
//! configured delay and doubles after every retried attempt, applied
//! before the next attempt and never after the last.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Closed taxonomy the retry loop switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Model refused on policy grounds; worth retrying, terminal if it
    /// keeps refusing
    ContentPolicyRefusal,
    /// Explicit rate-limit signal; retry with backoff
    RateLimited,
    /// Response referenced a trimmed-away tool call; repair locally,
    /// then retry
    DanglingToolReference,
    /// Everything else; propagate immediately
    Unclassified,
}

impl FailureKind {
    pub fn of(error: &GatewayError) -> Self {
        match error {
            GatewayError::ContentPolicyRefusal { .. } => FailureKind::ContentPolicyRefusal,
            GatewayError::RateLimited { .. } => FailureKind::RateLimited,
            GatewayError::DanglingToolReference { .. } => FailureKind::DanglingToolReference,
            _ => FailureKind::Unclassified,
        }
    }
}

/// Classify a model API failure into a gateway error, once, where it
/// crossed the boundary. Downstream code matches on the variant and
/// never re-parses the message.
pub(crate) fn classify_api_failure(error: async_openai::error::OpenAIError) -> GatewayError {
    let text = error.to_string();
    let lowered = text.to_lowercase();
    if lowered.contains("content filter") || lowered.contains("content_filter") {
        GatewayError::ContentPolicyRefusal { message: text }
    } else if lowered.contains("rate limit")
        || lowered.contains("rate_limit")
        || lowered.contains("429")
    {
        GatewayError::RateLimited { message: text }
    } else if lowered.contains("tool_call_id") {
        GatewayError::DanglingToolReference { message: text }
    } else {
        GatewayError::Api(error)
    }
}

/// Retry configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total tries, including the first
    pub max_attempts: usize,
    /// Delay before the second attempt; doubles each retry
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
        }
    }
}

/// Retry `operation` under `policy`, with a no-op repair hook.
pub async fn invoke_with_retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    invoke_with_retry_repairing(policy, operation, || {}).await
}

/// Retry `operation` under `policy`. On a dangling tool reference the
/// `repair` hook runs before the retry so the caller can drop the
/// offending turn from its working state.
pub async fn invoke_with_retry_repairing<T, F, Fut, R>(
    policy: &RetryPolicy,
    mut operation: F,
    mut repair: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(),
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1usize;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => {
                let kind = FailureKind::of(&error);
                if kind == FailureKind::Unclassified {
                    debug!(%error, "non-retryable failure");
                    return Err(error);
                }
                if attempt >= policy.max_attempts {
                    warn!(
                        attempts = attempt,
                        %error,
                        "retries exhausted"
                    );
                    return Err(GatewayError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(error),
                    });
                }
                if kind == FailureKind::DanglingToolReference {
                    debug!(%error, "repairing working state before retry");
                    repair();
                }
                warn!(attempt, ?kind, ?delay, %error, "attempt failed, backing off");
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            FailureKind::of(&GatewayError::RateLimited {
                message: "x".into()
            }),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::of(&GatewayError::Other("x".into())),
            FailureKind::Unclassified
        );
    }

    #[test]
    fn test_classify_api_failure() {
        use async_openai::error::OpenAIError;

        let err = classify_api_failure(OpenAIError::InvalidArgument(
            "request hit the rate limit".to_string(),
        ));
        assert!(matches!(err, GatewayError::RateLimited { .. }));

        let err = classify_api_failure(OpenAIError::InvalidArgument(
            "response blocked by content filter".to_string(),
        ));
        assert!(matches!(err, GatewayError::ContentPolicyRefusal { .. }));

        let err = classify_api_failure(OpenAIError::InvalidArgument(
            "no tool message found for tool_call_id call_9".to_string(),
        ));
        assert!(matches!(err, GatewayError::DanglingToolReference { .. }));

        let err = classify_api_failure(OpenAIError::InvalidArgument("boom".to_string()));
        assert!(matches!(err, GatewayError::Api(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_retries_with_doubling_delays() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_op = calls.clone();
        let started = tokio::time::Instant::now();

        let result: Result<()> = invoke_with_retry(&fast_policy(4), || {
            let calls = calls_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::RateLimited {
                    message: "busy".to_string(),
                })
            }
        })
        .await;

        // Exactly max_attempts calls, delays of 10 + 20 + 40 ms between
        // them and none after the last.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(70));
        match result.unwrap_err() {
            GatewayError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, GatewayError::RateLimited { .. }));
            }
            other => panic!("expected RetriesExhausted, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_op = calls.clone();

        let result = invoke_with_retry(&fast_policy(5), || {
            let calls = calls_op.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GatewayError::RateLimited {
                        message: "busy".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unclassified_fails_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_op = calls.clone();

        let result: Result<()> = invoke_with_retry(&fast_policy(5), || {
            let calls = calls_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Other("broken".to_string()))
            }
        })
        .await;

        assert!(matches!(result.unwrap_err(), GatewayError::Other(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dangling_reference_runs_repair_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let repairs = Arc::new(AtomicUsize::new(0));
        let calls_op = calls.clone();
        let repairs_hook = repairs.clone();

        let result = invoke_with_retry_repairing(
            &fast_policy(5),
            || {
                let calls = calls_op.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(GatewayError::DanglingToolReference {
                            message: "missing result for call_3".to_string(),
                        })
                    } else {
                        Ok("done")
                    }
                }
            },
            || {
                repairs_hook.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(repairs.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_refusal_exhausts_to_terminal_error() {
        let result: Result<()> = invoke_with_retry(&fast_policy(2), || async {
            Err(GatewayError::ContentPolicyRefusal {
                message: "filtered".to_string(),
            })
        })
        .await;

        match result.unwrap_err() {
            GatewayError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, GatewayError::ContentPolicyRefusal { .. }));
            }
            other => panic!("expected RetriesExhausted, got {other}"),
        }
    }
}
