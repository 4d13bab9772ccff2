//! Escalation of uncertain or sarcastic cases to a remote model.

use crate::classifier::{ClassifyRequest, LabelRules, StanceClassifier};
use crate::context::model_input;
use crate::lexicon::StanceProbabilities;
use async_trait::async_trait;
use regex::Regex;
use stance_core::{ClassifierConfig, CoreError, ErrorExt, LlmError, Stance};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SARCASM_PATTERN: &str = r"(?i)(?:^|\s)/s\b|\byeah,? right\b|\bsure,? buddy\b|\bwhat could (?:possibly )?go wrong\b|\btotally not\b|🙃|🤡";
const MAX_RETRY_DELAY_SECS: f64 = 6.0;

#[async_trait]
pub trait RemoteStanceModel: Send + Sync {
    /// Suffix appended to the base classifier version, e.g. `gemini-<model>`.
    fn version(&self) -> String;
    async fn predict(&self, input: &str) -> Result<StanceProbabilities, CoreError>;
}

#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    pub threshold: f64,
    pub sarcasm_trigger: bool,
    pub attempt_timeout: Duration,
    pub max_retries: u32,
}

impl EscalationPolicy {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            threshold: config.escalation_threshold,
            sarcasm_trigger: config.sarcasm_trigger,
            attempt_timeout: Duration::from_secs(config.gemini_timeout_secs.max(1)),
            max_retries: config.gemini_max_retries,
        }
    }

    /// Pause after failed attempt `attempt` (0-based).
    pub fn retry_delay(attempt: u32) -> Duration {
        let secs = 1.5 * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(MAX_RETRY_DELAY_SECS))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationStats {
    pub attempted: u64,
    pub escalated: u64,
    pub fallbacks: u64,
}

/// Wraps any classifier; asks the remote model only when the wrapped result
/// is weak or the text reads as sarcastic.
pub struct EscalatingClassifier<C> {
    inner: C,
    remote: Arc<dyn RemoteStanceModel>,
    rules: LabelRules,
    policy: EscalationPolicy,
    sarcasm: Option<Regex>,
    attempted: AtomicU64,
    escalated: AtomicU64,
    fallbacks: AtomicU64,
}

impl<C: StanceClassifier> EscalatingClassifier<C> {
    pub fn new(
        inner: C,
        remote: Arc<dyn RemoteStanceModel>,
        rules: LabelRules,
        policy: EscalationPolicy,
    ) -> Result<Self, CoreError> {
        let sarcasm = if policy.sarcasm_trigger {
            Some(Regex::new(SARCASM_PATTERN).map_err(|e| CoreError::Internal {
                message: format!("sarcasm pattern does not compile: {}", e),
            })?)
        } else {
            None
        };

        Ok(Self {
            inner,
            remote,
            rules,
            policy,
            sarcasm,
            attempted: AtomicU64::new(0),
            escalated: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> EscalationStats {
        EscalationStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn is_sarcastic(&self, text: &str) -> bool {
        self.sarcasm
            .as_ref()
            .map_or(false, |pattern| pattern.is_match(text))
    }

    async fn predict_remote(&self, input: &str) -> Result<StanceProbabilities, CoreError> {
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(self.policy.attempt_timeout, self.remote.predict(input))
                .await
                .unwrap_or_else(|_| {
                    Err(CoreError::Llm(LlmError::RequestTimeout {
                        provider: self.remote.version(),
                    }))
                });

            match outcome {
                Ok(probs) => return Ok(probs),
                Err(e) if attempt < self.policy.max_retries && e.is_retryable() => {
                    let delay = EscalationPolicy::retry_delay(attempt);
                    debug!(
                        "Remote stance attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<C: StanceClassifier> StanceClassifier for EscalatingClassifier<C> {
    async fn classify(&self, request: &ClassifyRequest<'_>) -> Stance {
        let base = self.inner.classify(request).await;
        if self.rules.is_forced_unclear(request.mention) {
            return base;
        }

        let sarcastic = self.is_sarcastic(request.text);
        if base.confidence >= self.policy.threshold && !sarcastic {
            return base;
        }

        self.attempted.fetch_add(1, Ordering::Relaxed);
        let input = model_input(request.context, &request.mention.ticker);
        match self.predict_remote(&input).await {
            Ok(probs) => {
                self.escalated.fetch_add(1, Ordering::Relaxed);
                let version = format!("{}+{}", base.classifier_version, self.remote.version());
                self.rules.stance(request, &probs, &version)
            }
            Err(e) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Escalation for {} fell back to {}: {}",
                    request.mention.ticker,
                    base.classifier_version,
                    e.user_friendly_message()
                );
                base
            }
        }
    }
}
