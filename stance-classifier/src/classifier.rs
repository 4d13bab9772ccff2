use crate::context::{model_input, normalize_text};
use crate::lexicon::{StanceModel, StanceProbabilities};
use async_trait::async_trait;
use stance_core::{ClassifierConfig, Mention, Stance, StanceLabel};
use std::sync::Arc;

/// One mention in one text unit, ready to classify.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRequest<'a> {
    pub mention: &'a Mention,
    /// Full TITLE/SELF/PARENT/TEXT context string.
    pub context: &'a str,
    /// The unit's own text.
    pub text: &'a str,
}

#[async_trait]
pub trait StanceClassifier: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest<'_>) -> Stance;
}

/// Turns probabilities into a label, applying the UNCLEAR overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRules {
    pub unclear_threshold: f64,
    pub short_text_len: usize,
    pub allow_context_inference: bool,
}

impl Default for LabelRules {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}

impl LabelRules {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            unclear_threshold: config.unclear_threshold,
            short_text_len: config.unclear_short_text_len,
            allow_context_inference: config.allow_context_label_inference,
        }
    }

    /// Inherited mentions are UNCLEAR regardless of what any model says.
    pub fn is_forced_unclear(&self, mention: &Mention) -> bool {
        mention.is_inherited() && !self.allow_context_inference
    }

    pub fn stance(
        &self,
        request: &ClassifyRequest<'_>,
        probs: &StanceProbabilities,
        classifier_version: &str,
    ) -> Stance {
        let (dominant, confidence) = probs.dominant();
        let score = probs.score();

        let short_text = normalize_text(request.text).chars().count() < self.short_text_len;
        let ticker_in_text = !request.mention.is_inherited();

        let label = if self.is_forced_unclear(request.mention)
            || confidence < self.unclear_threshold
            || (short_text && !ticker_in_text)
        {
            StanceLabel::Unclear
        } else {
            match dominant {
                StanceLabel::Bullish if score <= 0.0 => StanceLabel::Unclear,
                StanceLabel::Bearish if score >= 0.0 => StanceLabel::Unclear,
                other => other,
            }
        };

        Stance {
            ticker: request.mention.ticker.clone(),
            label,
            stance_score: score,
            confidence,
            classifier_version: classifier_version.to_string(),
            context_text: request.context.to_string(),
        }
    }
}

/// Local model plus label rules.
pub struct BaseClassifier {
    model: Arc<dyn StanceModel>,
    rules: LabelRules,
}

impl BaseClassifier {
    pub fn new(model: Arc<dyn StanceModel>, rules: LabelRules) -> Self {
        Self { model, rules }
    }

    pub fn rules(&self) -> &LabelRules {
        &self.rules
    }

    pub fn version(&self) -> &str {
        self.model.version()
    }
}

#[async_trait]
impl StanceClassifier for BaseClassifier {
    async fn classify(&self, request: &ClassifyRequest<'_>) -> Stance {
        let probs = self
            .model
            .predict(&model_input(request.context, &request.mention.ticker));
        self.rules.stance(request, &probs, self.model.version())
    }
}
