//! Sufficient statistics for one (day bucket, source, ticker) cell.
//!
//! Everything a daily score reports is derived from a handful of sums, so two
//! cells combine by adding their fields and the result is the same as folding
//! the union of their rows.

use serde::{Deserialize, Serialize};
use stance_core::{AggregationConfig, AggregationError, StanceLabel};

const Z_95: f64 = 1.96;

/// One classified mention as the aggregator sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StanceRow {
    pub label: StanceLabel,
    pub score: f64,
    pub confidence: f64,
    /// Platform score of the submission or comment that holds the mention.
    pub upvotes: i64,
    /// 0 for submissions.
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightPolicy {
    pub use_depth_decay: bool,
    pub lambda_depth: f64,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        Self::from_config(&AggregationConfig::default())
    }
}

impl WeightPolicy {
    pub fn from_config(config: &AggregationConfig) -> Self {
        Self {
            use_depth_decay: config.use_depth_decay,
            lambda_depth: config.lambda_depth,
        }
    }

    /// `ln(1 + max(upvotes, 0))`, times `exp(-λ·depth)` with depth decay on.
    pub fn weight(&self, upvotes: i64, depth: u32) -> f64 {
        let base = (upvotes.max(0) as f64).ln_1p();
        if self.use_depth_decay {
            base * (-self.lambda_depth * f64::from(depth)).exp()
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SufficientStats {
    pub valid_count: i64,
    pub score_sum: f64,
    pub weighted_numerator: f64,
    pub weighted_denominator: f64,
    /// Σ score², a raw moment.
    pub sum_of_squares: f64,
    pub mention_count: i64,
    pub bullish_count: i64,
    pub bearish_count: i64,
    pub neutral_count: i64,
    pub unclear_count: i64,
    /// False once anything reconstructed from legacy means was merged in.
    pub stats_exact: bool,
}

impl Default for SufficientStats {
    fn default() -> Self {
        Self {
            valid_count: 0,
            score_sum: 0.0,
            weighted_numerator: 0.0,
            weighted_denominator: 0.0,
            sum_of_squares: 0.0,
            mention_count: 0,
            bullish_count: 0,
            bearish_count: 0,
            neutral_count: 0,
            unclear_count: 0,
            stats_exact: true,
        }
    }
}

/// Scores derived from [`SufficientStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedScores {
    pub score_unweighted: f64,
    pub score_weighted: f64,
    pub stddev: f64,
    pub ci95_low: f64,
    pub ci95_high: f64,
    pub unclear_rate: f64,
}

impl SufficientStats {
    /// Add one row with `weight`. A rejected row leaves `self` untouched.
    pub fn fold(&mut self, row: &StanceRow, weight: f64) -> Result<(), AggregationError> {
        *self = fold(self, row, weight)?;
        Ok(())
    }

    pub fn merge(&self, other: &SufficientStats) -> SufficientStats {
        merge(self, other)
    }

    pub fn derive(&self) -> DerivedScores {
        derive(self)
    }

    pub fn is_empty(&self) -> bool {
        self.mention_count == 0
    }
}

pub fn validate(row: &StanceRow, weight: f64) -> Result<(), AggregationError> {
    if !row.score.is_finite() || !(-1.0..=1.0).contains(&row.score) {
        return Err(AggregationError::ScoreOutOfRange { score: row.score });
    }
    if !weight.is_finite() || weight < 0.0 {
        return Err(AggregationError::InvalidWeight { weight });
    }
    if !row.confidence.is_finite() || !(0.0..=1.0).contains(&row.confidence) {
        return Err(AggregationError::ConfidenceOutOfRange {
            confidence: row.confidence,
        });
    }
    Ok(())
}

pub fn fold(
    existing: &SufficientStats,
    row: &StanceRow,
    weight: f64,
) -> Result<SufficientStats, AggregationError> {
    validate(row, weight)?;

    let mut next = *existing;
    next.mention_count += 1;
    match row.label {
        StanceLabel::Bullish => next.bullish_count += 1,
        StanceLabel::Bearish => next.bearish_count += 1,
        StanceLabel::Neutral => next.neutral_count += 1,
        StanceLabel::Unclear => {
            next.unclear_count += 1;
            return Ok(next);
        }
    }

    next.valid_count += 1;
    next.score_sum += row.score;
    next.sum_of_squares += row.score * row.score;
    next.weighted_numerator += weight * row.score;
    next.weighted_denominator += weight;
    Ok(next)
}

pub fn merge(a: &SufficientStats, b: &SufficientStats) -> SufficientStats {
    SufficientStats {
        valid_count: a.valid_count + b.valid_count,
        score_sum: a.score_sum + b.score_sum,
        weighted_numerator: a.weighted_numerator + b.weighted_numerator,
        weighted_denominator: a.weighted_denominator + b.weighted_denominator,
        sum_of_squares: a.sum_of_squares + b.sum_of_squares,
        mention_count: a.mention_count + b.mention_count,
        bullish_count: a.bullish_count + b.bullish_count,
        bearish_count: a.bearish_count + b.bearish_count,
        neutral_count: a.neutral_count + b.neutral_count,
        unclear_count: a.unclear_count + b.unclear_count,
        stats_exact: a.stats_exact && b.stats_exact,
    }
}

pub fn derive(stats: &SufficientStats) -> DerivedScores {
    let n = stats.valid_count;
    let mean = if n > 0 {
        stats.score_sum / n as f64
    } else {
        0.0
    };

    let score_weighted = if stats.weighted_denominator > 0.0 {
        stats.weighted_numerator / stats.weighted_denominator
    } else {
        mean
    };

    let stddev = if n >= 2 {
        let nf = n as f64;
        let variance = (stats.sum_of_squares - nf * mean * mean) / (nf - 1.0);
        variance.max(0.0).sqrt()
    } else {
        0.0
    };

    let (ci95_low, ci95_high) = if n >= 2 {
        let half_width = Z_95 * stddev / (n as f64).sqrt();
        (
            (mean - half_width).clamp(-1.0, 1.0),
            (mean + half_width).clamp(-1.0, 1.0),
        )
    } else {
        (mean, mean)
    };

    let unclear_rate = if stats.mention_count > 0 {
        stats.unclear_count as f64 / stats.mention_count as f64
    } else {
        0.0
    };

    DerivedScores {
        score_unweighted: mean,
        score_weighted,
        stddev,
        ci95_low,
        ci95_high,
        unclear_rate,
    }
}

/// A stored row written before sums were kept: counts and means only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyScore {
    pub score_unweighted: f64,
    pub score_weighted: f64,
    pub mention_count: i64,
    pub bullish_count: i64,
    pub bearish_count: i64,
    pub neutral_count: i64,
    pub unclear_count: i64,
}

impl LegacyScore {
    /// Best-effort sums; the result is flagged inexact.
    ///
    /// Each valid row is treated as unit weight at the mean, so the spread is
    /// lost and reads as zero.
    pub fn coalesce(&self) -> SufficientStats {
        let valid_count = (self.mention_count - self.unclear_count).max(0);
        let n = valid_count as f64;
        SufficientStats {
            valid_count,
            score_sum: self.score_unweighted * n,
            weighted_numerator: self.score_weighted * n,
            weighted_denominator: n,
            sum_of_squares: self.score_unweighted * self.score_unweighted * n,
            mention_count: self.mention_count,
            bullish_count: self.bullish_count,
            bearish_count: self.bearish_count,
            neutral_count: self.neutral_count,
            unclear_count: self.unclear_count,
            stats_exact: false,
        }
    }
}
