use crate::auth::AppAuthenticator;
use crate::rate_limiter::{GovernorStatus, RateGovernor};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use stance_core::{CoreError, RedditApiError, RedditConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// One governed GET against the Reddit API. Retrying is the caller's job.
#[async_trait]
pub trait RedditTransport: Send + Sync {
    async fn get_json(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value, CoreError>;

    /// Full request URL, used as the in-run cache key.
    fn request_url(&self, endpoint: &str, query: &[(String, String)]) -> String {
        request_url("", endpoint, query)
    }
}

pub fn request_url(base_url: &str, endpoint: &str, query: &[(String, String)]) -> String {
    let mut url = format!("{}{}", base_url.trim_end_matches('/'), endpoint);
    if !query.is_empty() {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        url.push('?');
        url.push_str(&encoded);
    }
    url
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    governor: Arc<RateGovernor>,
    auth: AppAuthenticator,
    base_url: String,
    user_agent: String,
}

impl RedditApiClient {
    /// Credentials must already be validated; see `AppConfig::require_credentials`.
    pub fn new(
        config: &RedditConfig,
        client_id: String,
        client_secret: String,
        governor: Arc<RateGovernor>,
    ) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout())
            .build()?;

        let auth = AppAuthenticator::new(
            client_id,
            client_secret,
            &config.token_url,
            config.user_agent.clone(),
            http_client.clone(),
            governor.clone(),
        )?;

        Ok(Self {
            http_client,
            governor,
            auth,
            base_url: config.api_base_url.clone(),
            user_agent: config.user_agent.clone(),
        })
    }

    pub async fn get_rate_limit_status(&self) -> GovernorStatus {
        self.governor.status().await
    }

    fn map_status(&self, status: StatusCode, endpoint: &str, retry_after: Option<u64>) -> CoreError {
        let code = status.as_u16();
        let api_error = match code {
            429 => RedditApiError::RateLimitExceeded { retry_after },
            401 => RedditApiError::InvalidToken,
            403 => RedditApiError::Forbidden {
                resource: endpoint.to_string(),
            },
            404 => match endpoint.strip_prefix("/r/") {
                Some(rest) => RedditApiError::SubredditNotFound {
                    subreddit: rest.split('/').next().unwrap_or(rest).to_string(),
                },
                None => RedditApiError::PostNotFound {
                    post_id: endpoint.to_string(),
                },
            },
            408 => RedditApiError::RequestTimeout,
            _ if status.is_server_error() => RedditApiError::ServerError {
                status_code: code,
                retry_after,
            },
            _ => RedditApiError::InvalidResponse {
                details: format!("unexpected status {} for {}", code, endpoint),
            },
        };
        CoreError::RedditApi(api_error)
    }
}

#[async_trait]
impl RedditTransport for RedditApiClient {
    async fn get_json(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value, CoreError> {
        let access_token = self.auth.access_token().await?;
        let url = request_url(&self.base_url, endpoint, &[]);

        let permit = self.governor.acquire().await?;
        debug!(
            "Acquired rate governor permit for {} after {:?}",
            endpoint, permit.queue_wait_time
        );

        let sent = self
            .http_client
            .get(&url)
            .bearer_auth(&access_token)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(query)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.governor.release(permit);
                error!("Network error for GET {}: {}", endpoint, e);
                if e.is_timeout() {
                    return Err(CoreError::RedditApi(RedditApiError::RequestTimeout));
                }
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        self.governor
            .record_response(status.as_u16(), retry_after.map(Duration::from_secs))
            .await;

        if !status.is_success() {
            self.governor.release(permit);
            warn!("Request failed with status: {} for {}", status, endpoint);
            if status == StatusCode::UNAUTHORIZED {
                self.auth.invalidate().await;
            }
            return Err(self.map_status(status, endpoint, retry_after));
        }

        let body = response.json::<Value>().await;
        self.governor.release(permit);
        body.map_err(|e| {
            error!("Failed to parse response for {}: {}", endpoint, e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("invalid JSON from {}: {}", endpoint, e),
            })
        })
    }

    fn request_url(&self, endpoint: &str, query: &[(String, String)]) -> String {
        request_url(&self.base_url, endpoint, query)
    }
}

/// Delta-seconds form of `Retry-After`; fractional values round up.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let seconds: f64 = raw.parse().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(seconds.ceil() as u64)
    } else {
        None
    }
}
