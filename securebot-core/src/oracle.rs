//! The code-rewriting oracle capability.
//!
//! The autofix engine only ever sees this trait, so the retry policy lives
//! here as a decorator around it and the engine is testable with a fake.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failure taxonomy for a rewrite call.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The provider rejected the call for quota or rate-limit reasons.
    #[error("AI service rate limit exceeded: {0}")]
    RateLimited(String),
    /// Transport failure or provider-side outage; worth retrying.
    #[error("AI service unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Other(String),
}

/// A generative model that rewrites file content from a prompt.
#[async_trait]
pub trait RewriteOracle: Send + Sync {
    async fn rewrite(&self, prompt: &str) -> Result<String, OracleError>;
}

pub const MAX_REWRITE_ATTEMPTS: u32 = 3;
pub const REWRITE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Call the oracle with bounded retry: up to [`MAX_REWRITE_ATTEMPTS`]
/// attempts with a fixed [`REWRITE_RETRY_DELAY`] between them, propagating
/// the final error once attempts are exhausted.
pub async fn rewrite_with_retry(
    oracle: &dyn RewriteOracle,
    prompt: &str,
) -> Result<String, OracleError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match oracle.rewrite(prompt).await {
            Ok(text) => return Ok(text),
            Err(err) => {
                warn!("oracle attempt {} failed: {}", attempt, err);
                if attempt >= MAX_REWRITE_ATTEMPTS {
                    return Err(err);
                }
                tokio::time::sleep(REWRITE_RETRY_DELAY).await;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeOracle;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let oracle = FakeOracle::new(vec![
            Err(OracleError::Unavailable("connection reset".to_string())),
            Err(OracleError::Unavailable("connection reset".to_string())),
            Ok("fixed content".to_string()),
        ]);

        let result = rewrite_with_retry(&oracle, "prompt").await;
        assert_eq!(result.expect("third attempt succeeds"), "fixed content");
        assert_eq!(oracle.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_propagates_error_after_exhaustion() {
        let oracle = FakeOracle::new(vec![
            Err(OracleError::RateLimited("quota exceeded".to_string())),
            Err(OracleError::RateLimited("quota exceeded".to_string())),
            Err(OracleError::RateLimited("quota exceeded".to_string())),
        ]);

        let err = rewrite_with_retry(&oracle, "prompt")
            .await
            .expect_err("all attempts fail");
        assert!(matches!(err, OracleError::RateLimited(_)));
        assert_eq!(oracle.call_count(), 3);
    }

    #[tokio::test]
    async fn test_first_success_makes_single_call() {
        let oracle = FakeOracle::new(vec![Ok("done".to_string())]);
        let result = rewrite_with_retry(&oracle, "prompt").await;
        assert_eq!(result.expect("first attempt succeeds"), "done");
        assert_eq!(oracle.call_count(), 1);
    }
}
