//! Per-mention stance classification.
//!
//! [`BaseClassifier`] runs the local word-list model and applies the UNCLEAR
//! rules. When escalation is enabled it is wrapped by
//! [`EscalatingClassifier`], which consults Gemini for weak or sarcastic cases
//! and silently keeps the base result if that fails.

pub mod classifier;
pub mod context;
pub mod escalation;
pub mod gemini;
pub mod lexicon;

pub use classifier::{BaseClassifier, ClassifyRequest, LabelRules, StanceClassifier};
pub use context::{build_context, model_input, normalize_text, ContextParts};
pub use escalation::{EscalatingClassifier, EscalationPolicy, EscalationStats, RemoteStanceModel};
pub use gemini::{GeminiModel, TokenUsage};
pub use lexicon::{DeterministicModel, StanceModel, StanceProbabilities, DETERMINISTIC_VERSION};

use stance_core::{ClassifierConfig, CoreError};
use std::sync::Arc;
use tracing::info;

/// The classifier stack described by `config`.
///
/// Enabling escalation without a Gemini key is a credential error.
pub fn build_classifier(config: &ClassifierConfig) -> Result<Arc<dyn StanceClassifier>, CoreError> {
    let rules = LabelRules::from_config(config);
    let base = BaseClassifier::new(Arc::new(DeterministicModel::new()?), rules.clone());

    if !config.escalation_enabled {
        info!("Stance classifier: {}", base.version());
        return Ok(Arc::new(base));
    }

    let remote = Arc::new(GeminiModel::from_config(config)?);
    info!(
        "Stance classifier: {} escalating to {}",
        base.version(),
        remote.version()
    );
    let escalating =
        EscalatingClassifier::new(base, remote, rules, EscalationPolicy::from_config(config))?;
    Ok(Arc::new(escalating))
}
