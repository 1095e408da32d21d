//! Retry/backoff for backend sends.
//!
//! - 429: wait `Retry-After` seconds (or the configured rate-limit delay) and
//!   retry; exhaustion yields [`ProviderError::RateLimitExceeded`].
//! - 5xx and transport failures: wait `base_delay × attempt` and retry;
//!   exhaustion yields [`ProviderError::Driver`] with the last status and body.
//! - Any other non-success status fails immediately.
//!
//! Backoff sleeps on the current task; nothing is rescheduled elsewhere.

use std::future::Future;
use std::time::Duration;

use agentloom_config::RetryConfig;
use agentloom_core::error::ProviderError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry limits for one logical request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            rate_limit_delay: Duration::from_millis(config.rate_limit_delay_ms),
        }
    }
}

/// What one send attempt produced.
#[derive(Debug)]
pub enum SendOutcome<T> {
    /// 2xx; carries whatever the caller extracted from the response
    Success(T),
    /// Any non-success HTTP status
    Status {
        status: u16,
        retry_after: Option<u64>,
        body: String,
    },
}

/// Parse a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok())
}

/// Run `send` until it succeeds, fails permanently, or attempts run out.
///
/// `send` receives the 1-based attempt number. Transport failures should be
/// returned as `Err(ProviderError::Network(..))`; they are retried like 5xx.
pub async fn send_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut send: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<SendOutcome<T>, ProviderError>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            outcome = send(attempt) => outcome,
        };

        let delay = match outcome {
            Ok(SendOutcome::Success(value)) => return Ok(value),

            Ok(SendOutcome::Status { status: 429, retry_after, .. }) => {
                let delay = retry_after
                    .map(Duration::from_secs)
                    .unwrap_or(policy.rate_limit_delay);
                if attempt >= max {
                    return Err(ProviderError::RateLimitExceeded {
                        attempts: attempt,
                        retry_after_secs: delay.as_secs(),
                    });
                }
                warn!(attempt, max, delay_ms = delay.as_millis() as u64, "Rate limited, backing off");
                delay
            }

            Ok(SendOutcome::Status { status, body, .. }) if status >= 500 => {
                if attempt >= max {
                    return Err(ProviderError::Driver { status, body });
                }
                let delay = policy.base_delay * attempt;
                warn!(attempt, max, status, delay_ms = delay.as_millis() as u64, "Server error, retrying");
                delay
            }

            Ok(SendOutcome::Status { status, body, .. }) => {
                warn!(status, body = %body, "Provider rejected request");
                return Err(ProviderError::Driver { status, body });
            }

            Err(e @ (ProviderError::Network(_) | ProviderError::Timeout(_))) => {
                if attempt >= max {
                    return Err(ProviderError::Driver {
                        status: 0,
                        body: e.to_string(),
                    });
                }
                let delay = policy.base_delay * attempt;
                warn!(attempt, max, error = %e, delay_ms = delay.as_millis() as u64, "Transport error, retrying");
                delay
            }

            Err(e) => return Err(e),
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            rate_limit_delay: Duration::from_secs(5),
        }
    }

    fn status(code: u16) -> Result<SendOutcome<&'static str>, ProviderError> {
        Ok(SendOutcome::Status {
            status: code,
            retry_after: None,
            body: format!("status {code}"),
        })
    }

    /// Replays scripted outcomes and counts attempts.
    fn scripted(
        script: Vec<Result<SendOutcome<&'static str>, ProviderError>>,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut(u32) -> std::future::Ready<Result<SendOutcome<&'static str>, ProviderError>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut script = script.into_iter();
        let send = move |_attempt: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(script.next().unwrap_or_else(|| status(500)))
        };
        (calls, send)
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let (calls, send) = scripted(vec![Ok(SendOutcome::Success("ok"))]);
        let out = send_with_retry(&policy(), &CancellationToken::new(), send).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_back_off_linearly_then_succeed() {
        let (calls, send) = scripted(vec![status(502), status(503), Ok(SendOutcome::Success("ok"))]);
        let start = tokio::time::Instant::now();
        let out = send_with_retry(&policy(), &CancellationToken::new(), send).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after attempt 1, 2s after attempt 2
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_exhaust_into_driver_error() {
        let (calls, send) = scripted(vec![status(500), status(500), status(503)]);
        let err = send_with_retry(&policy(), &CancellationToken::new(), send).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            ProviderError::Driver { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "status 503");
            }
            other => panic!("expected Driver error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_never_retried() {
        let (calls, send) = scripted(vec![status(400), Ok(SendOutcome::Success("unreachable"))]);
        let err = send_with_retry(&policy(), &CancellationToken::new(), send).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_honours_retry_after() {
        let (calls, send) = scripted(vec![
            Ok(SendOutcome::Status {
                status: 429,
                retry_after: Some(7),
                body: String::new(),
            }),
            Ok(SendOutcome::Success("ok")),
        ]);
        let start = tokio::time::Instant::now();
        send_with_retry(&policy(), &CancellationToken::new(), send).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhaustion() {
        let (calls, send) = scripted(vec![status(429), status(429), status(429)]);
        let err = send_with_retry(&policy(), &CancellationToken::new(), send).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            err,
            ProviderError::RateLimitExceeded { attempts: 3, retry_after_secs: 5 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_become_status_zero_driver_errors() {
        let (calls, send) = scripted(vec![
            Err(ProviderError::Network("refused".into())),
            Err(ProviderError::Network("refused".into())),
            Err(ProviderError::Network("refused".into())),
        ]);
        let err = send_with_retry(&policy(), &CancellationToken::new(), send).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, ProviderError::Driver { status: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff() {
        let cancel = CancellationToken::new();
        let (_calls, send) = scripted(vec![status(503), status(503), status(503)]);
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let err = send_with_retry(&policy(), &cancel, send).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after(Some("12")), Some(12));
        assert_eq!(parse_retry_after(Some(" 3 ")), Some(3));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2026 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
