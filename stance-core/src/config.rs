//! Typed configuration for a pull deployment.
//!
//! Every section is defaulted so an empty TOML document yields a usable
//! configuration; secrets normally arrive through environment variables.

use crate::error::{ConfigError, CoreError};
use crate::types::{ListingSort, TimeWindow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub reddit: RedditConfig,
    pub pull: PullConfig,
    pub extraction: ExtractionConfig,
    pub classifier: ClassifierConfig,
    pub aggregation: AggregationConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub api_base_url: String,
    pub token_url: String,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
    pub max_concurrency: usize,
    pub min_request_interval_ms: u64,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_base: f64,
    pub backoff_max_ms: u64,
    /// Fraction of the computed delay added as random jitter.
    pub backoff_jitter: f64,
    pub thread_limit: u32,
    pub thread_depth: u32,
    pub morechildren_batch_size: usize,
    /// 0 means unbounded.
    pub morechildren_max_batches: usize,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: "ticker-stance/0.1 (by /u/ticker-stance)".to_string(),
            api_base_url: "https://oauth.reddit.com".to_string(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            request_timeout_secs: 20,
            requests_per_minute: 90,
            max_concurrency: 1,
            min_request_interval_ms: 700,
            max_retries: 4,
            backoff_initial_ms: 1250,
            backoff_base: 2.0,
            backoff_max_ms: 30_000,
            backoff_jitter: 0.25,
            thread_limit: 500,
            thread_depth: 32,
            morechildren_batch_size: 100,
            morechildren_max_batches: 40,
        }
    }
}

impl RedditConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    pub sources: Vec<String>,
    pub sort: ListingSort,
    pub window: TimeWindow,
    pub page_limit: u32,
    pub max_pages: u32,
    pub source_pause_ms: u64,
    pub analysis_concurrency: usize,
    pub job_retention_secs: u64,
    pub stale_after_secs: u64,
    pub timezone: String,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                "wallstreetbets".to_string(),
                "stocks".to_string(),
                "investing".to_string(),
                "finance".to_string(),
            ],
            sort: ListingSort::Top,
            window: TimeWindow::Day,
            page_limit: 20,
            max_pages: 1,
            source_pause_ms: 2000,
            analysis_concurrency: 1,
            job_retention_secs: 3600,
            stale_after_secs: 120,
            timezone: "Europe/Berlin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoplistMode {
    #[default]
    Strict,
    Cashtag,
    Context,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub ticker_master_path: Option<PathBuf>,
    pub synonyms_path: Option<PathBuf>,
    pub stoplist_path: Option<PathBuf>,
    pub stoplist_mode: StoplistMode,
    pub inherit_parent_tickers: bool,
    pub inherit_title_tickers: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ticker_master_path: None,
            synonyms_path: None,
            stoplist_path: None,
            stoplist_mode: StoplistMode::Strict,
            inherit_parent_tickers: false,
            inherit_title_tickers: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub unclear_threshold: f64,
    pub unclear_short_text_len: usize,
    pub allow_context_label_inference: bool,
    pub escalation_enabled: bool,
    pub escalation_threshold: f64,
    pub sarcasm_trigger: bool,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub gemini_timeout_secs: u64,
    pub gemini_max_retries: u32,
    pub gemini_temperature: f64,
    pub gemini_max_output_tokens: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            unclear_threshold: 0.55,
            unclear_short_text_len: 20,
            allow_context_label_inference: false,
            escalation_enabled: false,
            escalation_threshold: 0.65,
            sarcasm_trigger: true,
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_timeout_secs: 12,
            gemini_max_retries: 2,
            gemini_temperature: 0.0,
            gemini_max_output_tokens: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub use_depth_decay: bool,
    pub lambda_depth: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            use_depth_decay: false,
            lambda_depth: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/ticker_stance.db".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        debug!("Loading configuration from {}", path.display());
        Self::from_toml_str(&raw)
    }

    /// Overlay secrets and the database location from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an explicit lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = non_empty("REDDIT_CLIENT_ID") {
            self.reddit.client_id = Some(value);
        }
        if let Some(value) = non_empty("REDDIT_CLIENT_SECRET") {
            self.reddit.client_secret = Some(value);
        }
        if let Some(value) = non_empty("REDDIT_USER_AGENT") {
            self.reddit.user_agent = value;
        }
        if let Some(value) = non_empty("GEMINI_API_KEY") {
            self.classifier.gemini_api_key = Some(value);
        }
        if let Some(value) = non_empty("DATABASE_URL") {
            self.database.url = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let reddit = &self.reddit;
        if reddit.requests_per_minute == 0 {
            return Err(invalid("reddit.requests_per_minute", reddit.requests_per_minute));
        }
        if reddit.max_concurrency == 0 {
            return Err(invalid("reddit.max_concurrency", reddit.max_concurrency));
        }
        if !(reddit.backoff_base >= 1.0 && reddit.backoff_base.is_finite()) {
            return Err(invalid("reddit.backoff_base", reddit.backoff_base));
        }
        if !(0.0..=1.0).contains(&reddit.backoff_jitter) {
            return Err(invalid("reddit.backoff_jitter", reddit.backoff_jitter));
        }
        if reddit.morechildren_batch_size == 0 {
            return Err(invalid(
                "reddit.morechildren_batch_size",
                reddit.morechildren_batch_size,
            ));
        }
        if reddit.user_agent.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "reddit.user_agent".to_string(),
            });
        }

        if self.pull.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(invalid("pull.timezone", &self.pull.timezone));
        }
        if self.pull.analysis_concurrency == 0 {
            return Err(invalid(
                "pull.analysis_concurrency",
                self.pull.analysis_concurrency,
            ));
        }
        if self.pull.max_pages == 0 {
            return Err(invalid("pull.max_pages", self.pull.max_pages));
        }

        let classifier = &self.classifier;
        for (field, value) in [
            ("classifier.unclear_threshold", classifier.unclear_threshold),
            ("classifier.escalation_threshold", classifier.escalation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, value));
            }
        }

        if !(self.aggregation.lambda_depth >= 0.0 && self.aggregation.lambda_depth.is_finite()) {
            return Err(invalid("aggregation.lambda_depth", self.aggregation.lambda_depth));
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "database.url".to_string(),
            });
        }
        Ok(())
    }

    /// Reddit app credentials; a pull cannot start without them.
    pub fn require_credentials(&self) -> Result<(String, String), CoreError> {
        let id = self
            .reddit
            .client_id
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| CoreError::Credential {
                field: "REDDIT_CLIENT_ID".to_string(),
            })?;
        let secret = self
            .reddit
            .client_secret
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| CoreError::Credential {
                field: "REDDIT_CLIENT_SECRET".to_string(),
            })?;
        Ok((id, secret))
    }

    pub fn timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.pull
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| invalid("pull.timezone", &self.pull.timezone))
    }
}

fn invalid(field: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}
