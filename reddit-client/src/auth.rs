//! App-only OAuth2 (client credentials) for the Reddit API.

use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, Scope, TokenResponse, TokenUrl};
use crate::api::parse_retry_after;
use crate::rate_limiter::RateGovernor;
use stance_core::{CoreError, RedditApiError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

const AUTHORIZE_URL: &str = "https://www.reddit.com/api/v1/authorize";
/// Refresh this long before the server-side expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct AppAuthenticator {
    oauth: BasicClient,
    http: reqwest::Client,
    user_agent: String,
    governor: Arc<RateGovernor>,
    token: Mutex<Option<CachedToken>>,
}

impl AppAuthenticator {
    pub fn new(
        client_id: String,
        client_secret: String,
        token_url: &str,
        user_agent: String,
        http: reqwest::Client,
        governor: Arc<RateGovernor>,
    ) -> Result<Self, CoreError> {
        let auth_url = AuthUrl::new(AUTHORIZE_URL.to_string()).map_err(|e| invalid_url(AUTHORIZE_URL, e))?;
        let token_url = TokenUrl::new(token_url.to_string()).map_err(|e| invalid_url(token_url, e))?;

        let oauth = BasicClient::new(
            ClientId::new(client_id),
            Some(ClientSecret::new(client_secret)),
            auth_url,
            Some(token_url),
        );

        Ok(Self {
            oauth,
            http,
            user_agent,
            governor,
            token: Mutex::new(None),
        })
    }

    /// Current bearer token, fetching a fresh one when missing or near expiry.
    ///
    /// The token request counts against the rate governor like any API call.
    pub async fn access_token(&self) -> Result<String, CoreError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
            debug!("Reddit app token near expiry, refreshing");
        }

        let http = self.http.clone();
        let user_agent = self.user_agent.clone();
        let governor = self.governor.clone();
        let permit = self.governor.acquire().await?;
        let exchanged = self
            .oauth
            .exchange_client_credentials()
            .add_scope(Scope::new("read".to_string()))
            .request_async(move |request| send_token_request(http, user_agent, governor, request))
            .await;
        self.governor.release(permit);

        let response = exchanged.map_err(|e| {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: e.to_string(),
            })
        })?;

        let lifetime = response
            .expires_in()
            .unwrap_or_else(|| Duration::from_secs(3600));
        let token = CachedToken {
            access_token: response.access_token().secret().clone(),
            expires_at: Instant::now() + lifetime,
        };
        info!("Obtained Reddit app token valid for {:?}", lifetime);

        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token after the API rejected it.
    pub async fn invalidate(&self) {
        *self.token.lock().await = None;
    }
}

/// Reddit rejects token requests without a descriptive User-Agent, so the
/// exchange goes through our own reqwest client instead of the stock helper.
async fn send_token_request(
    client: reqwest::Client,
    user_agent: String,
    governor: Arc<RateGovernor>,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let mut builder = client
        .request(request.method, request.url.as_str())
        .body(request.body);
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    builder = builder.header(reqwest::header::USER_AGENT, user_agent);

    let response = builder.send().await?;
    let status_code = response.status();
    let headers = response.headers().clone();
    governor
        .record_response(
            status_code.as_u16(),
            parse_retry_after(&headers).map(Duration::from_secs),
        )
        .await;
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

fn invalid_url(url: &str, error: impl std::fmt::Display) -> CoreError {
    CoreError::InvalidInput {
        message: format!("invalid OAuth URL {}: {}", url, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimitConfig;

    fn governor() -> Arc<RateGovernor> {
        Arc::new(RateGovernor::new(RateLimitConfig {
            max_concurrency: 2,
            max_requests: 10,
            time_window: Duration::from_secs(60),
            min_interval: Duration::ZERO,
        }))
    }

    fn authenticator(token_url: &str, governor: Arc<RateGovernor>) -> Result<AppAuthenticator, CoreError> {
        AppAuthenticator::new(
            "id".to_string(),
            "secret".to_string(),
            token_url,
            "ticker-stance-test/0.1".to_string(),
            reqwest::Client::new(),
            governor,
        )
    }

    #[test]
    fn test_rejects_malformed_token_url() {
        let result = authenticator("not a url", governor());
        assert!(matches!(result, Err(CoreError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_token_request_goes_through_governor() {
        let governor = governor();
        // Nothing listens on the discard port, the exchange fails fast.
        let auth = authenticator("http://127.0.0.1:9/api/v1/access_token", governor.clone()).unwrap();

        let result = auth.access_token().await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed { .. }))
        ));

        let status = governor.status().await;
        assert_eq!(status.current_window_requests, 1);
        assert_eq!(status.available_permits, 2);
    }

    #[tokio::test]
    async fn test_cached_token_skips_governor() {
        let governor = governor();
        let auth = authenticator("https://www.reddit.com/api/v1/access_token", governor.clone()).unwrap();
        *auth.token.lock().await = Some(CachedToken {
            access_token: "cached".to_string(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        });

        assert_eq!(auth.access_token().await.unwrap(), "cached");
        assert_eq!(governor.status().await.current_window_requests, 0);
    }

    #[tokio::test]
    async fn test_invalidate_clears_cache() {
        let auth = authenticator("https://www.reddit.com/api/v1/access_token", governor()).unwrap();

        *auth.token.lock().await = Some(CachedToken {
            access_token: "cached".to_string(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        });
        assert_eq!(auth.access_token().await.unwrap(), "cached");

        auth.invalidate().await;
        assert!(auth.token.lock().await.is_none());
    }
}
