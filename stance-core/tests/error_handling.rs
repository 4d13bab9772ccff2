use stance_core::{
    AggregationError, ConfigError, CoreError, DatabaseError, ErrorExt, ErrorRecovery, LlmError,
    RecoveryStrategy, RedditApiError,
};
use std::time::Duration;

#[test]
fn test_error_codes() {
    let reddit_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    assert_eq!(reddit_error.error_code(), "REDDIT_API");

    let db_error = CoreError::Database(DatabaseError::DatabaseLocked);
    assert_eq!(db_error.error_code(), "DATABASE");

    let llm_error = CoreError::Llm(LlmError::InvalidApiKey {
        provider: "gemini".to_string(),
    });
    assert_eq!(llm_error.error_code(), "ESCALATION");

    let transient = CoreError::TransientFetch {
        operation: "listing r/stocks".to_string(),
        attempts: 5,
        message: "server error 503".to_string(),
    };
    assert_eq!(transient.error_code(), "TRANSIENT_FETCH");

    let credential = CoreError::Credential {
        field: "REDDIT_CLIENT_ID".to_string(),
    };
    assert_eq!(credential.error_code(), "CREDENTIAL");
}

#[test]
fn test_retryable_errors() {
    let rate_limited = CoreError::RedditApi(RedditApiError::RateLimitExceeded {
        retry_after: Some(60),
    });
    assert!(rate_limited.is_retryable());

    let server = CoreError::RedditApi(RedditApiError::ServerError {
        status_code: 502,
        retry_after: None,
    });
    assert!(server.is_retryable());

    let forbidden = CoreError::RedditApi(RedditApiError::Forbidden {
        resource: "r/private".to_string(),
    });
    assert!(!forbidden.is_retryable());

    let non_retryable_error = CoreError::Config(ConfigError::MissingField {
        field: "api_key".to_string(),
    });
    assert!(!non_retryable_error.is_retryable());

    let exhausted = CoreError::TransientFetch {
        operation: "comments t3_abc".to_string(),
        attempts: 5,
        message: "timeout".to_string(),
    };
    assert!(!exhausted.is_retryable());
}

#[test]
fn test_retry_after() {
    let rate_limit_error = CoreError::RedditApi(RedditApiError::RateLimitExceeded {
        retry_after: Some(60),
    });
    assert_eq!(
        rate_limit_error.retry_after(),
        Some(Duration::from_secs(60))
    );

    let without_hint = CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: None });
    assert_eq!(without_hint.retry_after(), None);

    let timeout_error = CoreError::Timeout { seconds: 30 };
    assert_eq!(timeout_error.retry_after(), Some(Duration::from_secs(30)));
}

#[test]
fn test_user_friendly_messages() {
    let reddit_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    let message = reddit_error.user_friendly_message();
    assert!(message.contains("authentication token is invalid"));

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "api_key".to_string(),
    });
    assert!(config_error.user_friendly_message().contains("api_key"));

    let credential = CoreError::Credential {
        field: "REDDIT_CLIENT_SECRET".to_string(),
    };
    assert!(credential
        .user_friendly_message()
        .contains("REDDIT_CLIENT_SECRET"));
}

#[test]
fn test_status_codes_from_api_errors() {
    assert_eq!(
        RedditApiError::RateLimitExceeded { retry_after: None }.status_code(),
        Some(429)
    );
    assert_eq!(
        RedditApiError::ServerError {
            status_code: 503,
            retry_after: Some(4)
        }
        .server_retry_after(),
        Some(4)
    );
    assert_eq!(RedditApiError::RequestTimeout.status_code(), None);
}

#[test]
fn test_pipeline_strategies() {
    let row = CoreError::from(AggregationError::InvalidWeight { weight: -1.0 });
    assert_eq!(ErrorRecovery::determine_strategy(&row), RecoveryStrategy::Skip);

    let escalation = CoreError::from(LlmError::ServiceUnavailable {
        provider: "gemini".to_string(),
        status_code: 503,
    });
    assert_eq!(
        ErrorRecovery::determine_strategy(&escalation),
        RecoveryStrategy::Fallback
    );

    let auth = CoreError::from(RedditApiError::AuthenticationFailed {
        reason: "bad secret".to_string(),
    });
    assert_eq!(ErrorRecovery::determine_strategy(&auth), RecoveryStrategy::Fail);
}

#[test]
fn test_error_conversion_with_question_mark() -> anyhow::Result<()> {
    fn parse(raw: &str) -> Result<stance_core::AppConfig, CoreError> {
        Ok(stance_core::AppConfig::from_toml_str(raw)?)
    }

    let err = parse("[reddit]\nmax_concurrency = 0").unwrap_err();
    assert_eq!(err.error_code(), "CONFIG");

    let config = parse("")?;
    assert_eq!(config.reddit.max_concurrency, 1);
    Ok(())
}
