//! Gemini `generateContent` client used as the escalation model.

use crate::escalation::RemoteStanceModel;
use crate::lexicon::StanceProbabilities;
use async_trait::async_trait;
use serde_json::{json, Value};
use stance_core::{ClassifierConfig, CoreError, LlmError, StanceLabel};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "gemini";
const DEFAULT_CONFIDENCE: f64 = 0.75;
const MAX_CONTEXT_CHARS: usize = 4000;

/// Token counts reported by the most recent call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

pub struct GeminiModel {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f64,
    max_output_tokens: u32,
    last_usage: Mutex<TokenUsage>,
}

impl GeminiModel {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, CoreError> {
        let api_key = config
            .gemini_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| CoreError::Credential {
                field: "GEMINI_API_KEY".to_string(),
            })?
            .to_string();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gemini_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http,
            api_key,
            model: config.gemini_model.trim().to_string(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            temperature: config.gemini_temperature.max(0.0),
            max_output_tokens: config.gemini_max_output_tokens.max(32),
            last_usage: Mutex::new(TokenUsage::default()),
        })
    }

    pub fn last_usage(&self) -> TokenUsage {
        self.last_usage
            .lock()
            .map(|usage| *usage)
            .unwrap_or_default()
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn payload(&self, input: &str) -> Value {
        let ticker = ticker_of(input).unwrap_or("UNKNOWN");
        let system_prompt = format!(
            "You are a financial social media sentiment analyst. Read the comment in the \
             context of its title and parent comment. Is the stance towards {} BULLISH, \
             BEARISH or NEUTRAL? Watch for sarcasm and trading slang. Answer with JSON only.",
            ticker
        );
        let context: String = input.chars().take(MAX_CONTEXT_CHARS).collect();
        let user_prompt = format!(
            "Use exactly this JSON shape:\n{{\"label\":\"BULLISH|BEARISH|NEUTRAL|UNCLEAR\",\"confidence\":0.0-1.0}}\n\nContext:\n{}",
            context
        );

        json!({
            "systemInstruction": {"parts": [{"text": system_prompt}]},
            "contents": [{"role": "user", "parts": [{"text": user_prompt}]}],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
                "responseMimeType": "application/json",
                "responseJsonSchema": {
                    "type": "object",
                    "properties": {
                        "label": {"type": "string", "enum": ["BULLISH", "BEARISH", "NEUTRAL", "UNCLEAR"]},
                        "confidence": {"type": "number"}
                    },
                    "required": ["label"]
                }
            }
        })
    }
}

#[async_trait]
impl RemoteStanceModel for GeminiModel {
    fn version(&self) -> String {
        format!("gemini-{}", self.model)
    }

    async fn predict(&self, input: &str) -> Result<StanceProbabilities, CoreError> {
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.payload(input))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::RequestTimeout {
                        provider: PROVIDER.to_string(),
                    }
                } else {
                    LlmError::Transport {
                        provider: PROVIDER.to_string(),
                        details: e.to_string(),
                    }
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(map_status(status).into());
        }

        let body: Value = response.json().await.map_err(|e| LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
            details: e.to_string(),
        })?;

        if let Ok(mut usage) = self.last_usage.lock() {
            *usage = extract_usage(&body);
        }
        let probs = parse_response(&body)?;
        debug!("Gemini answered {:?}", probs);
        Ok(probs)
    }
}

fn map_status(status: u16) -> LlmError {
    match status {
        401 | 403 => LlmError::InvalidApiKey {
            provider: PROVIDER.to_string(),
        },
        429 => LlmError::RateLimitExceeded {
            provider: PROVIDER.to_string(),
        },
        408 => LlmError::RequestTimeout {
            provider: PROVIDER.to_string(),
        },
        code => LlmError::ServiceUnavailable {
            provider: PROVIDER.to_string(),
            status_code: code,
        },
    }
}

fn ticker_of(input: &str) -> Option<&str> {
    input
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix("TICKER:"))
        .map(str::trim)
        .filter(|ticker| !ticker.is_empty())
}

fn invalid(details: impl Into<String>) -> LlmError {
    LlmError::InvalidResponseFormat {
        provider: PROVIDER.to_string(),
        details: details.into(),
    }
}

/// First non-empty text part of any candidate.
fn response_text(body: &Value) -> Option<&str> {
    body.get("candidates")?
        .as_array()?
        .iter()
        .filter_map(|candidate| candidate.pointer("/content/parts")?.as_array())
        .flatten()
        .filter_map(|part| part.get("text")?.as_str())
        .map(str::trim)
        .find(|text| !text.is_empty())
}

fn parse_response(body: &Value) -> Result<StanceProbabilities, LlmError> {
    let text = response_text(body).ok_or_else(|| invalid("response has no text output"))?;

    let unfenced = strip_code_fence(text);
    let parsed: Value = serde_json::from_str(unfenced).map_err(|e| invalid(e.to_string()))?;
    let object = parsed
        .as_object()
        .ok_or_else(|| invalid("output is not a JSON object"))?;

    let label_text = object
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_ascii_uppercase();
    let label = label_text
        .parse::<StanceLabel>()
        .map_err(|_| invalid(format!("invalid label '{}'", label_text)))?;

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);

    Ok(StanceProbabilities::from_label(label, confidence))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let inner = trimmed.trim_matches('`').trim();
    inner
        .strip_prefix("json")
        .or_else(|| inner.strip_prefix("JSON"))
        .unwrap_or(inner)
        .trim()
}

fn extract_usage(body: &Value) -> TokenUsage {
    let Some(usage) = body.get("usageMetadata") else {
        return TokenUsage::default();
    };
    let count = |field: &str| usage.get(field).and_then(Value::as_u64);

    let prompt = count("promptTokenCount");
    let mut output = count("candidatesTokenCount");
    let mut total = count("totalTokenCount");
    if let (None, Some(p), Some(o)) = (total, prompt, output) {
        total = Some(p + o);
    }
    if let (None, Some(t), Some(p)) = (output, total, prompt) {
        if t >= p {
            output = Some(t - p);
        }
    }

    TokenUsage {
        prompt_tokens: prompt,
        output_tokens: output,
        total_tokens: total,
    }
}
