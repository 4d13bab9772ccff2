use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Reddit API error: {0}")]
    RedditApi(#[from] RedditApiError),

    #[error("Transient fetch failure in {operation} after {attempts} attempts: {message}")]
    TransientFetch {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("Missing credential: {field}")]
    Credential { field: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Classification escalation error: {0}")]
    Llm(#[from] LlmError),

    #[error("Aggregation consistency error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum RedditApiError {
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Rate limit exceeded (retry after {retry_after:?} seconds)")]
    RateLimitExceeded { retry_after: Option<u64> },

    #[error("Forbidden access to resource: {resource}")]
    Forbidden { resource: String },

    #[error("Subreddit not found: {subreddit}")]
    SubredditNotFound { subreddit: String },

    #[error("Post not found: {post_id}")]
    PostNotFound { post_id: String },

    #[error("Invalid OAuth token")]
    InvalidToken,

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },

    #[error("Server error: {status_code}")]
    ServerError {
        status_code: u16,
        retry_after: Option<u64>,
    },

    #[error("Unsupported listing sort: {sort}")]
    UnsupportedSort { sort: String },
}

impl RedditApiError {
    /// HTTP status the error was derived from, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RedditApiError::RateLimitExceeded { .. } => Some(429),
            RedditApiError::ServerError { status_code, .. } => Some(*status_code),
            RedditApiError::InvalidToken => Some(401),
            RedditApiError::Forbidden { .. } => Some(403),
            RedditApiError::SubredditNotFound { .. } | RedditApiError::PostNotFound { .. } => {
                Some(404)
            }
            _ => None,
        }
    }

    pub fn server_retry_after(&self) -> Option<u64> {
        match self {
            RedditApiError::RateLimitExceeded { retry_after } => *retry_after,
            RedditApiError::ServerError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Migration failed: {migration}")]
    MigrationFailed { migration: String },

    #[error("Query execution failed: {query}")]
    QueryFailed { query: String },

    #[error("Constraint violation: {constraint}")]
    ConstraintViolation { constraint: String },

    #[error("Database locked")]
    DatabaseLocked,

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API key invalid or missing for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Rate limit exceeded for {provider}")]
    RateLimitExceeded { provider: String },

    #[error("Provider service unavailable: {provider} ({status_code})")]
    ServiceUnavailable { provider: String, status_code: u16 },

    #[error("Request timeout for {provider}")]
    RequestTimeout { provider: String },

    #[error("Invalid response format from {provider}: {details}")]
    InvalidResponseFormat { provider: String, details: String },

    #[error("Transport failure for {provider}: {details}")]
    Transport { provider: String, details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("Stance score {score} is outside [-1, 1]")]
    ScoreOutOfRange { score: f64 },

    #[error("Weight {weight} is negative or not finite")]
    InvalidWeight { weight: f64 },

    #[error("Confidence {confidence} is outside [0, 1]")]
    ConfidenceOutOfRange { confidence: f64 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
