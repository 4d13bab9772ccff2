use crate::symbols::Vocabulary;
use regex::{Regex, RegexBuilder};
use stance_core::{
    CoreError, DetectionSource, ExtractionConfig, MatchKind, Mention, StoplistMode, TargetType,
};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const CASHTAG_PATTERN: &str = r"\$([A-Z][A-Z.]{0,4})\b";
const TOKEN_PATTERN: &str = r"\b([A-Z]{1,5}(?:\.[A-Z])?)\b";

const CASHTAG_BASE: f64 = 0.85;
const TOKEN_BASE: f64 = 0.65;
const SYNONYM_BASE: f64 = 0.70;
const CUE_BONUS: f64 = 0.10;
const CUE_WINDOW: usize = 24;
const MAX_CONFIDENCE: f64 = 0.99;
pub const INHERITED_CONFIDENCE: f64 = 0.40;

const FINANCE_CUES: [&str; 12] = [
    "stock",
    "shares",
    "earnings",
    "guidance",
    "short",
    "options",
    "call",
    "put",
    "price",
    "valuation",
    "profit",
    "revenue",
];

/// Where a comment without direct mentions may borrow tickers from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InheritanceFlags {
    pub from_parent: bool,
    pub from_title: bool,
}

#[derive(Debug)]
pub struct MentionExtractor {
    vocabulary: Vocabulary,
    cashtag: Regex,
    token: Regex,
    synonym_patterns: Vec<(Regex, String)>,
    mode: StoplistMode,
    inheritance: InheritanceFlags,
}

impl MentionExtractor {
    pub fn new(
        vocabulary: Vocabulary,
        mode: StoplistMode,
        inheritance: InheritanceFlags,
    ) -> Result<Self, CoreError> {
        let cashtag = compile(CASHTAG_PATTERN)?;
        let token = compile(TOKEN_PATTERN)?;

        let mut synonym_patterns = Vec::new();
        for (phrase, ticker) in vocabulary.synonyms.longest_first() {
            let pattern = RegexBuilder::new(&regex::escape(phrase))
                .case_insensitive(true)
                .build()
                .map_err(|e| CoreError::InvalidInput {
                    message: format!("synonym '{}' does not compile: {}", phrase, e),
                })?;
            synonym_patterns.push((pattern, ticker.to_string()));
        }

        Ok(Self {
            vocabulary,
            cashtag,
            token,
            synonym_patterns,
            mode,
            inheritance,
        })
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self, CoreError> {
        Self::new(
            Vocabulary::load(config)?,
            config.stoplist_mode,
            InheritanceFlags {
                from_parent: config.inherit_parent_tickers,
                from_title: config.inherit_title_tickers,
            },
        )
    }

    /// Direct mentions in `text`, one per (ticker, span), ordered by position.
    pub fn extract(&self, text: &str) -> Vec<Mention> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<Mention> = Vec::new();

        for caps in self.cashtag.captures_iter(text) {
            let (Some(whole), Some(symbol)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            self.consider(
                text,
                symbol.as_str(),
                MatchKind::Cashtag,
                whole.start(),
                whole.end(),
                &mut candidates,
            );
        }

        for caps in self.token.captures_iter(text) {
            let Some(symbol) = caps.get(1) else {
                continue;
            };
            // `$AAPL` is a cashtag, not also a token
            if text[..symbol.start()].ends_with('$') {
                continue;
            }
            self.consider(
                text,
                symbol.as_str(),
                MatchKind::Token,
                symbol.start(),
                symbol.end(),
                &mut candidates,
            );
        }

        for (pattern, ticker) in &self.synonym_patterns {
            let mut at = 0;
            while let Some(found) = pattern.find_at(text, at) {
                if is_whole_word(text, found.start(), found.end()) {
                    self.consider(
                        text,
                        ticker,
                        MatchKind::Synonym,
                        found.start(),
                        found.end(),
                        &mut candidates,
                    );
                    at = found.end();
                } else {
                    at = next_char_boundary(text, found.start() + 1);
                }
                if at >= text.len() {
                    break;
                }
            }
        }

        let mut mentions = dedupe_by_span(candidates);
        mentions.sort_by(|a, b| a.span.cmp(&b.span).then_with(|| a.ticker.cmp(&b.ticker)));
        mentions
    }

    pub fn extract_tickers(&self, text: &str) -> BTreeSet<String> {
        self.extract(text).into_iter().map(|m| m.ticker).collect()
    }

    /// Mentions for one text unit: direct ones, or for a comment without any,
    /// tickers inherited from the parent text and/or the submission title.
    pub fn extract_for(
        &self,
        target_type: TargetType,
        text: &str,
        title: &str,
        parent_text: &str,
    ) -> Vec<Mention> {
        let direct = self.extract(text);
        if !direct.is_empty() || target_type != TargetType::Comment {
            return direct;
        }

        let mut inherited: BTreeSet<String> = BTreeSet::new();
        if self.inheritance.from_parent {
            inherited.extend(self.extract_tickers(parent_text));
        }
        if self.inheritance.from_title {
            inherited.extend(self.extract_tickers(title));
        }
        if !inherited.is_empty() {
            debug!("Comment inherits tickers {:?}", inherited);
        }

        inherited
            .into_iter()
            .map(|ticker| Mention {
                ticker,
                confidence: INHERITED_CONFIDENCE,
                detection: DetectionSource::ContextInherited,
                match_kind: MatchKind::Context,
                span: None,
            })
            .collect()
    }

    fn consider(
        &self,
        text: &str,
        symbol: &str,
        kind: MatchKind,
        start: usize,
        end: usize,
        candidates: &mut Vec<Mention>,
    ) {
        let ticker = symbol.to_ascii_uppercase();
        if !self.vocabulary.symbols.contains(&ticker) {
            return;
        }

        let has_cue = has_finance_cue(text, start, end);
        if self.vocabulary.stoplist.contains(&ticker) {
            let let_through = match self.mode {
                StoplistMode::Strict => false,
                StoplistMode::Cashtag => kind == MatchKind::Cashtag,
                StoplistMode::Context => kind == MatchKind::Cashtag || has_cue,
            };
            if !let_through {
                return;
            }
        }

        let base = match kind {
            MatchKind::Cashtag => CASHTAG_BASE,
            MatchKind::Token => TOKEN_BASE,
            MatchKind::Synonym | MatchKind::Context => SYNONYM_BASE,
        };
        let bonus = if has_cue { CUE_BONUS } else { 0.0 };

        candidates.push(Mention {
            ticker,
            confidence: (base + bonus).min(MAX_CONFIDENCE),
            detection: DetectionSource::Direct,
            match_kind: kind,
            span: Some((start, end)),
        });
    }
}

/// The single best mention per ticker, ordered by ticker.
///
/// Ranking is confidence, then match kind, then span length.
pub fn merge_per_ticker(mentions: &[Mention]) -> Vec<Mention> {
    let mut best: HashMap<&str, &Mention> = HashMap::new();
    for mention in mentions {
        let replace = match best.get(mention.ticker.as_str()) {
            None => true,
            Some(current) => is_better(mention, current),
        };
        if replace {
            best.insert(mention.ticker.as_str(), mention);
        }
    }

    let mut merged: Vec<Mention> = best.into_values().cloned().collect();
    merged.sort_by(|a, b| a.ticker.cmp(&b.ticker));
    merged
}

fn is_better(candidate: &Mention, current: &Mention) -> bool {
    let key = |m: &Mention| (m.confidence, m.match_kind.rank(), m.span_len());
    let (c_conf, c_rank, c_len) = key(candidate);
    let (o_conf, o_rank, o_len) = key(current);
    match c_conf.partial_cmp(&o_conf) {
        Some(std::cmp::Ordering::Greater) => true,
        Some(std::cmp::Ordering::Less) => false,
        _ => (c_rank, c_len) > (o_rank, o_len),
    }
}

fn dedupe_by_span(candidates: Vec<Mention>) -> Vec<Mention> {
    let mut kept: Vec<Mention> = Vec::with_capacity(candidates.len());
    let mut index: HashMap<(String, Option<(usize, usize)>), usize> = HashMap::new();

    for candidate in candidates {
        let key = (candidate.ticker.clone(), candidate.span);
        match index.get(&key) {
            Some(&position) => {
                if candidate.confidence > kept[position].confidence {
                    kept[position] = candidate;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(candidate);
            }
        }
    }
    kept
}

fn has_finance_cue(text: &str, start: usize, end: usize) -> bool {
    let from = prev_char_boundary(text, start.saturating_sub(CUE_WINDOW));
    let to = next_char_boundary(text, (end + CUE_WINDOW).min(text.len()));
    let window = text[from..to].to_lowercase();
    FINANCE_CUES.iter().any(|cue| window.contains(cue))
}

fn is_whole_word(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.map_or(false, |c| c.is_ascii_alphanumeric())
        && !after.map_or(false, |c| c.is_ascii_alphanumeric())
}

fn prev_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn next_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index.min(text.len())
}

fn compile(pattern: &str) -> Result<Regex, CoreError> {
    Regex::new(pattern).map_err(|e| CoreError::Internal {
        message: format!("pattern {} does not compile: {}", pattern, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{Stoplist, SymbolTable, SynonymTable};

    fn vocabulary() -> Vocabulary {
        Vocabulary {
            symbols: SymbolTable::new(["AAPL", "TSLA", "META", "CEO", "YOLO", "BRK.B", "DD", "A"]),
            synonyms: SynonymTable::new([("apple", "AAPL"), ("apple inc", "AAPL"), ("meta", "META")]),
            stoplist: Stoplist::new(["CEO", "YOLO", "DD", "A"]),
        }
    }

    fn extractor(mode: StoplistMode) -> MentionExtractor {
        MentionExtractor::new(vocabulary(), mode, InheritanceFlags::default()).unwrap()
    }

    #[test]
    fn test_filters_stoplist_and_supports_synonyms() {
        let text = "Apple looks strong. $AAPL calls are up. CEO talked. YOLO TSLA stock.";
        let mentions = extractor(StoplistMode::Strict).extract(text);
        let tickers: BTreeSet<&str> = mentions.iter().map(|m| m.ticker.as_str()).collect();

        assert!(tickers.contains("AAPL"));
        assert!(tickers.contains("TSLA"));
        assert!(!tickers.contains("CEO"));
        assert!(!tickers.contains("YOLO"));
        assert!(mentions
            .iter()
            .any(|m| m.match_kind == MatchKind::Synonym && m.ticker == "AAPL"));
        assert!(mentions
            .iter()
            .any(|m| m.match_kind == MatchKind::Cashtag && m.ticker == "AAPL"));
    }

    #[test]
    fn test_cashtag_is_not_double_counted() {
        let mentions = extractor(StoplistMode::Strict).extract("$AAPL to the moon");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].match_kind, MatchKind::Cashtag);
        assert_eq!(mentions[0].span, Some((0, 5)));
        assert_eq!(mentions[0].confidence, CASHTAG_BASE);
    }

    #[test]
    fn test_synonyms_need_whole_words() {
        let mentions = extractor(StoplistMode::Strict).extract("metaphor pineapple");
        assert!(mentions.is_empty());

        let mentions = extractor(StoplistMode::Strict).extract("pineapple, then Apple Inc.");
        let spans: Vec<_> = mentions.iter().map(|m| m.span).collect();
        // "apple inc" and "apple" both match at the same start
        assert_eq!(spans, vec![Some((16, 21)), Some((16, 25))]);
    }

    #[test]
    fn test_class_suffix_tokens() {
        let mentions = extractor(StoplistMode::Strict).extract("Holding BRK.B forever");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].ticker, "BRK.B");
        assert_eq!(mentions[0].match_kind, MatchKind::Token);
    }

    #[test]
    fn test_finance_cue_bonus() {
        let mentions = extractor(StoplistMode::Strict).extract("TSLA earnings next week");
        assert!((mentions[0].confidence - (TOKEN_BASE + CUE_BONUS)).abs() < 1e-9);

        let far = format!("TSLA{}earnings", " ".repeat(30));
        let mentions = extractor(StoplistMode::Strict).extract(&far);
        assert!((mentions[0].confidence - TOKEN_BASE).abs() < 1e-9);
    }

    #[test]
    fn test_stoplist_modes() {
        let text = "$DD is up. DD looks fine. DD shares rallied.";

        let strict = extractor(StoplistMode::Strict).extract(text);
        assert!(strict.is_empty());

        let cashtag = extractor(StoplistMode::Cashtag).extract(text);
        assert_eq!(cashtag.len(), 1);
        assert_eq!(cashtag[0].match_kind, MatchKind::Cashtag);

        let context = extractor(StoplistMode::Context).extract(text);
        let kinds: Vec<MatchKind> = context.iter().map(|m| m.match_kind).collect();
        // The middle "DD" is within 24 chars of "shares" too
        assert!(kinds.contains(&MatchKind::Cashtag));
        assert!(context.iter().any(|m| m.span == Some((26, 28))));
    }

    #[test]
    fn test_unknown_symbols_are_ignored() {
        let mentions = extractor(StoplistMode::Context).extract("NVDA and $AMD up");
        assert!(mentions.is_empty());
    }

    #[test]
    fn test_inheritance_flags_are_independent() {
        let parent = "TSLA is going to moon";
        let title = "Thoughts on AAPL?";

        let none = extractor(StoplistMode::Strict);
        assert!(none
            .extract_for(TargetType::Comment, "agreed", title, parent)
            .is_empty());

        let title_only = MentionExtractor::new(
            vocabulary(),
            StoplistMode::Strict,
            InheritanceFlags {
                from_parent: false,
                from_title: true,
            },
        )
        .unwrap();
        let inherited = title_only.extract_for(TargetType::Comment, "agreed", title, parent);
        assert_eq!(inherited.len(), 1);
        assert_eq!(inherited[0].ticker, "AAPL");
        assert_eq!(inherited[0].detection, DetectionSource::ContextInherited);
        assert_eq!(inherited[0].span, None);
        assert_eq!(inherited[0].confidence, INHERITED_CONFIDENCE);

        let both = MentionExtractor::new(
            vocabulary(),
            StoplistMode::Strict,
            InheritanceFlags {
                from_parent: true,
                from_title: true,
            },
        )
        .unwrap();
        let tickers: Vec<String> = both
            .extract_for(TargetType::Comment, "agreed", title, parent)
            .into_iter()
            .map(|m| m.ticker)
            .collect();
        assert_eq!(tickers, vec!["AAPL", "TSLA"]);

        // Direct mentions win and submissions never inherit
        assert_eq!(
            both.extract_for(TargetType::Comment, "META though", title, parent)[0].ticker,
            "META"
        );
        assert!(both
            .extract_for(TargetType::Submission, "agreed", title, parent)
            .is_empty());
    }

    #[test]
    fn test_merge_per_ticker_prefers_confidence_then_kind() {
        let text = "$AAPL vs apple vs TSLA";
        let mentions = extractor(StoplistMode::Strict).extract(text);
        let merged = merge_per_ticker(&mentions);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].ticker, "AAPL");
        assert_eq!(merged[0].match_kind, MatchKind::Cashtag);
        assert_eq!(merged[1].ticker, "TSLA");

        let tie = vec![
            Mention {
                ticker: "AAPL".to_string(),
                confidence: 0.75,
                detection: DetectionSource::Direct,
                match_kind: MatchKind::Synonym,
                span: Some((0, 9)),
            },
            Mention {
                ticker: "AAPL".to_string(),
                confidence: 0.75,
                detection: DetectionSource::Direct,
                match_kind: MatchKind::Token,
                span: Some((12, 16)),
            },
        ];
        assert_eq!(merge_per_ticker(&tie)[0].match_kind, MatchKind::Token);
    }
}
