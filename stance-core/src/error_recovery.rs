//! Recovery strategies consulted by the pull pipeline.
//!
//! A failure inside one unit of work (a submission, a placeholder batch, an
//! escalation call, a stance row) is mapped to a strategy here so the caller
//! can decide whether to skip the unit, fall back to a cheaper result, retry,
//! or abort the whole run.

use crate::{CoreError, ErrorExt};
use std::time::Duration;

/// Recovery strategy for handling errors
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    /// Retry the operation with exponential backoff
    RetryWithBackoff {
        max_attempts: usize,
        initial_delay: Duration,
        max_delay: Duration,
    },
    /// Keep the result produced by the cheaper stage
    Fallback,
    /// Skip the unit and record a partial failure
    Skip,
    /// Abort the run
    Fail,
}

pub struct ErrorRecovery;

impl ErrorRecovery {
    /// Determine the appropriate recovery strategy for a given error
    pub fn determine_strategy(error: &CoreError) -> RecoveryStrategy {
        match error {
            // Retries were already spent by the fetch layer
            CoreError::TransientFetch { .. } => RecoveryStrategy::Skip,

            // Escalation is optional, the base label stands
            CoreError::Llm(_) => RecoveryStrategy::Fallback,

            // One bad row never poisons the bucket
            CoreError::Aggregation(_) => RecoveryStrategy::Skip,

            CoreError::Credential { .. } | CoreError::Config(_) => RecoveryStrategy::Fail,

            CoreError::RedditApi(api_error) => {
                if api_error.is_retryable() {
                    RecoveryStrategy::RetryWithBackoff {
                        max_attempts: 3,
                        initial_delay: api_error
                            .retry_after()
                            .unwrap_or_else(|| Duration::from_secs(2)),
                        max_delay: Duration::from_secs(60),
                    }
                } else {
                    match api_error {
                        crate::RedditApiError::AuthenticationFailed { .. }
                        | crate::RedditApiError::InvalidToken => RecoveryStrategy::Fail,
                        _ => RecoveryStrategy::Skip,
                    }
                }
            }

            CoreError::Database(db_error) => match db_error {
                crate::DatabaseError::DatabaseLocked => RecoveryStrategy::RetryWithBackoff {
                    max_attempts: 5,
                    initial_delay: Duration::from_millis(100),
                    max_delay: Duration::from_secs(5),
                },
                _ => RecoveryStrategy::Fail,
            },

            CoreError::Network(_) | CoreError::Timeout { .. } => {
                RecoveryStrategy::RetryWithBackoff {
                    max_attempts: 3,
                    initial_delay: Duration::from_secs(1),
                    max_delay: Duration::from_secs(30),
                }
            }

            CoreError::InvalidInput { .. }
            | CoreError::NotFound { .. }
            | CoreError::Serialization(_) => RecoveryStrategy::Skip,

            CoreError::Io(_) | CoreError::Internal { .. } => RecoveryStrategy::Fail,
        }
    }
}
