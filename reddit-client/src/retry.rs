use stance_core::{CoreError, RedditApiError, RedditConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_base: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay_ms: 1250,
            max_delay_ms: 30_000,
            backoff_base: 2.0,
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn from_reddit_config(config: &RedditConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay_ms: config.backoff_initial_ms,
            max_delay_ms: config.backoff_max_ms,
            backoff_base: config.backoff_base,
            jitter_factor: config.backoff_jitter,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Retry strategy based on error type
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after the server-supplied delay
    RetryWithDelay(Duration),
    /// Don't retry (for permanent failures)
    NoRetry,
}

/// Determine retry strategy based on error type
pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::RedditApi(reddit_error) => match reddit_error {
            RedditApiError::RateLimitExceeded { retry_after } => match retry_after {
                Some(seconds) => RetryStrategy::RetryWithDelay(Duration::from_secs(*seconds)),
                None => RetryStrategy::Retry,
            },
            RedditApiError::ServerError { retry_after, .. } => match retry_after {
                Some(seconds) => RetryStrategy::RetryWithDelay(Duration::from_secs(*seconds)),
                None => RetryStrategy::Retry,
            },
            RedditApiError::RequestTimeout => RetryStrategy::Retry,
            RedditApiError::InvalidResponse { .. } => RetryStrategy::Retry,
            // The cached token is dropped on 401, the next attempt re-authenticates
            RedditApiError::InvalidToken => RetryStrategy::Retry,
            RedditApiError::AuthenticationFailed { .. } => RetryStrategy::NoRetry,
            RedditApiError::Forbidden { .. } => RetryStrategy::NoRetry,
            RedditApiError::SubredditNotFound { .. } => RetryStrategy::NoRetry,
            RedditApiError::PostNotFound { .. } => RetryStrategy::NoRetry,
            RedditApiError::UnsupportedSort { .. } => RetryStrategy::NoRetry,
        },
        CoreError::Network(reqwest_error) => {
            if reqwest_error.is_timeout() || reqwest_error.is_connect() {
                RetryStrategy::Retry
            } else {
                RetryStrategy::NoRetry
            }
        }
        CoreError::Timeout { .. } => RetryStrategy::Retry,
        _ => RetryStrategy::NoRetry,
    }
}

/// `initial · base^attempt`, capped, plus up to `jitter_factor` of random jitter.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let multiplier = config.backoff_base.powi(attempt.min(i32::MAX as u32) as i32);
    let delay_ms = (config.initial_delay_ms as f64 * multiplier).min(config.max_delay_ms as f64);
    let exponential_delay = Duration::from_millis(delay_ms.max(0.0) as u64);

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = if jitter_range > 0 {
        fastrand::u64(0..=jitter_range)
    } else {
        0
    };

    (exponential_delay + Duration::from_millis(jitter)).min(max_delay)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryMetrics {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub exhausted: u64,
}

/// Retry executor that wraps operations with retry logic
#[derive(Debug, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
    total_retries: AtomicU64,
    successful_retries: AtomicU64,
    exhausted: AtomicU64,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    ///
    /// Permanent failures are returned unchanged. Running out of retries on a
    /// transient failure yields [`CoreError::TransientFetch`].
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let max_attempts = self.config.max_attempts();
        let mut total_delay = Duration::ZERO;
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, operation_name);
            }

            let error = match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        self.total_retries
                            .fetch_add(attempt as u64, Ordering::Relaxed);
                        self.successful_retries.fetch_add(1, Ordering::Relaxed);
                        info!(
                            "Operation {} succeeded after {} retries (total delay: {:?})",
                            operation_name, attempt, total_delay
                        );
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            let delay = match get_retry_strategy(&error) {
                RetryStrategy::NoRetry => {
                    debug!(
                        "Not retrying {} due to error type: {}",
                        operation_name, error
                    );
                    return Err(error);
                }
                RetryStrategy::Retry => calculate_delay(attempt, &self.config),
                RetryStrategy::RetryWithDelay(delay) => delay,
            };

            attempt += 1;
            if attempt >= max_attempts {
                self.total_retries
                    .fetch_add((attempt - 1) as u64, Ordering::Relaxed);
                self.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Operation {} failed after {} attempts: {}",
                    operation_name, attempt, error
                );
                return Err(CoreError::TransientFetch {
                    operation: operation_name.to_string(),
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            info!(
                "Retrying {} in {:?} due to: {}",
                operation_name, delay, error
            );
            total_delay += delay;
            sleep(delay).await;
        }
    }

    pub fn get_metrics(&self) -> RetryMetrics {
        RetryMetrics {
            total_retries: self.total_retries.load(Ordering::Relaxed),
            successful_retries: self.successful_retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_base: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let config = fast_config();
        assert_eq!(calculate_delay(0, &config), Duration::from_millis(10));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(20));
        assert_eq!(calculate_delay(2, &config), Duration::from_millis(40));
        // Capped
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let config = RetryConfig {
            jitter_factor: 0.5,
            max_delay_ms: 10_000,
            ..fast_config()
        };
        for _ in 0..50 {
            let delay = calculate_delay(2, &config);
            assert!(delay >= Duration::from_millis(40));
            assert!(delay <= Duration::from_millis(60));
        }
    }

    #[test]
    fn test_retry_strategy_for_errors() {
        let with_hint = CoreError::RedditApi(RedditApiError::RateLimitExceeded {
            retry_after: Some(7),
        });
        assert_eq!(
            get_retry_strategy(&with_hint),
            RetryStrategy::RetryWithDelay(Duration::from_secs(7))
        );

        let server = CoreError::RedditApi(RedditApiError::ServerError {
            status_code: 503,
            retry_after: None,
        });
        assert_eq!(get_retry_strategy(&server), RetryStrategy::Retry);

        let forbidden = CoreError::RedditApi(RedditApiError::Forbidden {
            resource: "/r/private/top".to_string(),
        });
        assert_eq!(get_retry_strategy(&forbidden), RetryStrategy::NoRetry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_executor_success_after_retries() {
        let executor = RetryExecutor::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));

        let result = executor
            .execute("flaky", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CoreError::RedditApi(RedditApiError::RequestTimeout))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let metrics = executor.get_metrics();
        assert_eq!(metrics.total_retries, 2);
        assert_eq!(metrics.successful_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_yields_transient_fetch() {
        let executor = RetryExecutor::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), CoreError> = executor
            .execute("comments abc", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::RedditApi(RedditApiError::ServerError {
                        status_code: 502,
                        retry_after: None,
                    }))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(CoreError::TransientFetch {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "comments abc");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected TransientFetch, got {:?}", other),
        }
        assert_eq!(executor.get_metrics().exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_takes_precedence() {
        let executor = RetryExecutor::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result = executor
            .execute("listing", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                            retry_after: Some(5),
                        }))
                    } else {
                        Ok(1)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        // Far above the 100ms computed cap
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_executor_no_retry_on_forbidden() {
        let executor = RetryExecutor::new(fast_config());
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), CoreError> = executor
            .execute("listing r/private", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::RedditApi(RedditApiError::Forbidden {
                        resource: "/r/private/top".to_string(),
                    }))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::Forbidden { .. }))
        ));
    }
}
