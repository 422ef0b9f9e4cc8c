//! Bounded retry with exponential backoff and a hard per-attempt timeout.

use std::future::Future;

use tracing::{debug, warn};

use docent_core::{Error, Result, RetryPolicy};

/// Run `f` under `policy`.
///
/// Transient failures (timeouts, collaborator and HTTP errors) are retried up
/// to `max_attempts`; anything else returns immediately. When attempts run
/// out the last timeout is returned as `CollaboratorTimeout`, any other last
/// failure as `Collaborator`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last = None;

    for attempt in 1..=attempts {
        let err = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation, attempt);
                }
                return Ok(value);
            }
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => Error::CollaboratorTimeout {
                operation: operation.to_string(),
                timeout_ms: policy.timeout.as_millis() as u64,
            },
        };

        warn!("{} attempt {}/{} failed: {}", operation, attempt, attempts, err);
        last = Some(err);

        if attempt < attempts {
            tokio::time::sleep(policy.jittered_backoff(attempt)).await;
        }
    }

    Err(match last {
        Some(e @ Error::CollaboratorTimeout { .. }) => e,
        Some(e) => Error::Collaborator(format!(
            "{} failed after {} attempts: {}",
            operation, attempts, e
        )),
        None => Error::Collaborator(format!("{} was never attempted", operation)),
    })
}
