//! Word-list stance model used as the always-available base.

use regex::Regex;
use stance_core::{CoreError, StanceLabel};
use std::collections::HashSet;

pub const DETERMINISTIC_VERSION: &str = "deterministic-v1";

const BULLISH_WORDS: &[&str] = &[
    "bull",
    "bullish",
    "buy",
    "long",
    "moon",
    "pump",
    "beat",
    "upside",
    "rally",
    "undervalued",
    "strong",
    "calls",
];
const BEARISH_WORDS: &[&str] = &[
    "bear",
    "bearish",
    "sell",
    "short",
    "dump",
    "miss",
    "downside",
    "crash",
    "overvalued",
    "weak",
    "puts",
];
const NEUTRAL_WORDS: &[&str] = &["neutral", "hold", "wait", "sideways", "flat", "mixed"];

/// Probabilities over the four labels.
///
/// The word-list model has no cue for UNCLEAR and always leaves `unclear`
/// at 0; the label rules derive UNCLEAR from low confidence instead. A
/// remote model answering UNCLEAR puts its confidence there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StanceProbabilities {
    pub bullish: f64,
    pub bearish: f64,
    pub neutral: f64,
    pub unclear: f64,
}

impl StanceProbabilities {
    /// Highest-probability label, earlier labels winning ties.
    pub fn dominant(&self) -> (StanceLabel, f64) {
        let mut best = (StanceLabel::Bullish, self.bullish);
        for candidate in [
            (StanceLabel::Bearish, self.bearish),
            (StanceLabel::Neutral, self.neutral),
            (StanceLabel::Unclear, self.unclear),
        ] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }
        best
    }

    pub fn score(&self) -> f64 {
        (self.bullish - self.bearish).clamp(-1.0, 1.0)
    }

    /// Spread a remote label and its confidence: the label gets the clamped
    /// confidence, the other directions share the remainder.
    pub fn from_label(label: StanceLabel, confidence: f64) -> Self {
        let dominant = confidence.clamp(0.51, 0.99);
        let rest = (1.0 - dominant) / 2.0;
        match label {
            StanceLabel::Bullish => Self {
                bullish: dominant,
                bearish: rest,
                neutral: rest,
                unclear: 0.0,
            },
            StanceLabel::Bearish => Self {
                bullish: rest,
                bearish: dominant,
                neutral: rest,
                unclear: 0.0,
            },
            StanceLabel::Neutral => Self {
                bullish: rest,
                bearish: rest,
                neutral: dominant,
                unclear: 0.0,
            },
            StanceLabel::Unclear => {
                let rest = (1.0 - dominant) / 3.0;
                Self {
                    bullish: rest,
                    bearish: rest,
                    neutral: rest,
                    unclear: dominant,
                }
            }
        }
    }
}

/// A synchronous local model.
pub trait StanceModel: Send + Sync {
    fn version(&self) -> &str;
    fn predict(&self, input: &str) -> StanceProbabilities;
}

#[derive(Debug)]
pub struct DeterministicModel {
    words: Regex,
    bullish: HashSet<&'static str>,
    bearish: HashSet<&'static str>,
    neutral: HashSet<&'static str>,
}

impl DeterministicModel {
    pub fn new() -> Result<Self, CoreError> {
        let words = Regex::new(r"[a-z']+").map_err(|e| CoreError::Internal {
            message: format!("word pattern does not compile: {}", e),
        })?;
        Ok(Self {
            words,
            bullish: BULLISH_WORDS.iter().copied().collect(),
            bearish: BEARISH_WORDS.iter().copied().collect(),
            neutral: NEUTRAL_WORDS.iter().copied().collect(),
        })
    }
}

impl StanceModel for DeterministicModel {
    fn version(&self) -> &str {
        DETERMINISTIC_VERSION
    }

    fn predict(&self, input: &str) -> StanceProbabilities {
        let lowered = input.to_lowercase();
        let (mut bullish, mut bearish, mut neutral) = (0u32, 0u32, 0u32);
        for word in self.words.find_iter(&lowered).map(|m| m.as_str()) {
            if self.bullish.contains(word) {
                bullish += 1;
            } else if self.bearish.contains(word) {
                bearish += 1;
            } else if self.neutral.contains(word) {
                neutral += 1;
            }
        }

        if bullish + bearish + neutral == 0 {
            return StanceProbabilities {
                bullish: 0.22,
                bearish: 0.22,
                neutral: 0.56,
                unclear: 0.0,
            };
        }

        let total = f64::from(bullish + bearish + neutral + 1);
        StanceProbabilities {
            bullish: (f64::from(bullish) + 0.2) / total,
            bearish: (f64::from(bearish) + 0.2) / total,
            neutral: (f64::from(neutral) + 0.6) / total,
            unclear: 0.0,
        }
    }
}
