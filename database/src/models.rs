//! Row types read back with `query_as`, and their domain conversions.

use aggregator::{DailyScore, LegacyScore, SufficientStats};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use stance_core::{
    Comment, CoreError, Mention, PullCounters, PullRun, Stance, Submission, TargetRef,
};

#[derive(Debug, sqlx::FromRow)]
pub struct PullRunRow {
    pub id: i64,
    pub source: String,
    pub pulled_at: DateTime<Utc>,
    pub day_bucket: NaiveDate,
    pub sort: String,
    pub time_window: String,
    pub page_limit: i64,
    pub status: String,
    pub note: Option<String>,
    pub submissions: i64,
    pub comments: i64,
    pub mentions: i64,
    pub stance_rows: i64,
}

impl TryFrom<PullRunRow> for PullRun {
    type Error = CoreError;

    fn try_from(row: PullRunRow) -> Result<Self, Self::Error> {
        Ok(PullRun {
            id: Some(row.id),
            source: row.source,
            pulled_at: row.pulled_at,
            day_bucket: row.day_bucket,
            sort: row.sort.parse()?,
            window: row.time_window.parse()?,
            limit: u32::try_from(row.page_limit).unwrap_or_default(),
            status: row.status.parse()?,
            note: row.note,
            counters: PullCounters {
                submissions: row.submissions,
                comments: row.comments,
                mentions: row.mentions,
                stance_rows: row.stance_rows,
            },
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: String,
    pub pull_run_id: i64,
    pub source: String,
    pub created_utc: DateTime<Utc>,
    pub title: String,
    pub selftext: String,
    pub score: i64,
    pub num_comments: i64,
    pub permalink: String,
    pub url: Option<String>,
    pub incomplete: bool,
    pub failed_batches: i64,
}

impl SubmissionRow {
    pub fn to_submission(&self) -> Submission {
        Submission {
            id: self.id.clone(),
            source: self.source.clone(),
            created_utc: self.created_utc,
            title: self.title.clone(),
            selftext: self.selftext.clone(),
            score: self.score,
            num_comments: self.num_comments,
            permalink: self.permalink.clone(),
            url: self.url.clone(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct CommentRow {
    pub id: String,
    pub submission_id: String,
    pub parent_id: Option<String>,
    pub depth: i64,
    pub author: Option<String>,
    pub body: String,
    pub score: i64,
    pub permalink: Option<String>,
    pub created_utc: Option<DateTime<Utc>>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: row.id,
            submission_id: row.submission_id,
            parent_id: row.parent_id,
            depth: u32::try_from(row.depth).unwrap_or_default(),
            author: row.author,
            body: row.body,
            score: row.score,
            permalink: row.permalink,
            created_utc: row.created_utc,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct MentionRow {
    pub target_type: String,
    pub target_id: String,
    pub ticker: String,
    pub confidence: f64,
    pub detection: String,
    pub match_kind: String,
    pub span_start: Option<i64>,
    pub span_end: Option<i64>,
}

impl TryFrom<MentionRow> for StoredMention {
    type Error = CoreError;

    fn try_from(row: MentionRow) -> Result<Self, Self::Error> {
        let span = match (row.span_start, row.span_end) {
            (Some(start), Some(end)) if start >= 0 && end >= start => {
                Some((start as usize, end as usize))
            }
            _ => None,
        };
        Ok(StoredMention {
            target: TargetRef {
                target_type: row.target_type.parse()?,
                target_id: row.target_id,
            },
            mention: Mention {
                ticker: row.ticker,
                confidence: row.confidence,
                detection: row.detection.parse()?,
                match_kind: row.match_kind.parse()?,
                span,
            },
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct StanceRowRecord {
    pub target_type: String,
    pub target_id: String,
    pub ticker: String,
    pub label: String,
    pub stance_score: f64,
    pub confidence: f64,
    pub classifier_version: String,
    pub context_text: String,
}

impl TryFrom<StanceRowRecord> for StoredStance {
    type Error = CoreError;

    fn try_from(row: StanceRowRecord) -> Result<Self, Self::Error> {
        Ok(StoredStance {
            target: TargetRef {
                target_type: row.target_type.parse()?,
                target_id: row.target_id,
            },
            stance: Stance {
                ticker: row.ticker,
                label: row.label.parse()?,
                stance_score: row.stance_score,
                confidence: row.confidence,
                classifier_version: row.classifier_version,
                context_text: row.context_text,
            },
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DailyScoreRow {
    pub day_bucket: NaiveDate,
    pub source: String,
    pub ticker: String,
    pub valid_count: Option<i64>,
    pub score_sum: Option<f64>,
    pub weighted_numerator: Option<f64>,
    pub weighted_denominator: Option<f64>,
    pub sum_of_squares: Option<f64>,
    pub mention_count: i64,
    pub bullish_count: i64,
    pub bearish_count: i64,
    pub neutral_count: i64,
    pub unclear_count: i64,
    pub score_unweighted: f64,
    pub score_weighted: f64,
}

impl From<DailyScoreRow> for DailyScore {
    /// Rows missing any sufficient statistic are rebuilt from their means.
    fn from(row: DailyScoreRow) -> Self {
        let stats = match (
            row.valid_count,
            row.score_sum,
            row.weighted_numerator,
            row.weighted_denominator,
            row.sum_of_squares,
        ) {
            (
                Some(valid_count),
                Some(score_sum),
                Some(weighted_numerator),
                Some(weighted_denominator),
                Some(sum_of_squares),
            ) => SufficientStats {
                valid_count,
                score_sum,
                weighted_numerator,
                weighted_denominator,
                sum_of_squares,
                mention_count: row.mention_count,
                bullish_count: row.bullish_count,
                bearish_count: row.bearish_count,
                neutral_count: row.neutral_count,
                unclear_count: row.unclear_count,
                stats_exact: true,
            },
            _ => LegacyScore {
                score_unweighted: row.score_unweighted,
                score_weighted: row.score_weighted,
                mention_count: row.mention_count,
                bullish_count: row.bullish_count,
                bearish_count: row.bearish_count,
                neutral_count: row.neutral_count,
                unclear_count: row.unclear_count,
            }
            .coalesce(),
        };
        DailyScore::new(row.day_bucket, row.source, row.ticker, stats)
    }
}

/// A stance together with the platform context it was aggregated with.
#[derive(Debug, sqlx::FromRow)]
pub struct AggregationInputRow {
    pub ticker: String,
    pub label: String,
    pub stance_score: f64,
    pub confidence: f64,
    pub upvotes: i64,
    pub depth: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ExampleRow {
    pub target_type: String,
    pub target_id: String,
    pub submission_id: String,
    pub label: String,
    pub stance_score: f64,
    pub upvotes: i64,
    pub text: String,
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMention {
    pub target: TargetRef,
    pub mention: Mention,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredStance {
    pub target: TargetRef,
    pub stance: Stance,
}

/// A submission as stored, with its comment tree in pre-order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredThread {
    pub submission: Submission,
    pub pull_run_id: i64,
    pub incomplete: bool,
    pub failed_batches: i64,
    pub comments: Vec<Comment>,
    pub mentions: Vec<StoredMention>,
    pub stances: Vec<StoredStance>,
}

/// A stored mention used to illustrate a ticker's stance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExampleMention {
    pub target: TargetRef,
    pub submission_id: String,
    pub label: stance_core::StanceLabel,
    pub stance_score: f64,
    pub upvotes: i64,
    pub text: String,
    pub permalink: Option<String>,
}

impl TryFrom<ExampleRow> for ExampleMention {
    type Error = CoreError;

    fn try_from(row: ExampleRow) -> Result<Self, Self::Error> {
        Ok(ExampleMention {
            target: TargetRef {
                target_type: row.target_type.parse()?,
                target_id: row.target_id,
            },
            submission_id: row.submission_id,
            label: row.label.parse()?,
            stance_score: row.stance_score,
            upvotes: row.upvotes,
            text: row.text,
            permalink: row.permalink,
        })
    }
}
