use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, RedditApiError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub source: String,
    pub created_utc: DateTime<Utc>,
    pub title: String,
    pub selftext: String,
    pub score: i64,
    pub num_comments: i64,
    pub permalink: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub submission_id: String,
    /// `None` for top-level comments. A parent that was never fetched is kept
    /// here as a reference even though the comment is treated as a root.
    pub parent_id: Option<String>,
    pub depth: u32,
    pub author: Option<String>,
    pub body: String,
    pub score: i64,
    pub permalink: Option<String>,
    pub created_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Submission,
    Comment,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Submission => "submission",
            TargetType::Comment => "comment",
        }
    }
}

impl FromStr for TargetType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submission" => Ok(TargetType::Submission),
            "comment" => Ok(TargetType::Comment),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown target type '{}'", other),
            }),
        }
    }
}

/// The text unit a mention or stance belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub target_type: TargetType,
    pub target_id: String,
}

impl TargetRef {
    pub fn submission(id: impl Into<String>) -> Self {
        Self {
            target_type: TargetType::Submission,
            target_id: id.into(),
        }
    }

    pub fn comment(id: impl Into<String>) -> Self {
        Self {
            target_type: TargetType::Comment,
            target_id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionSource {
    Direct,
    ContextInherited,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Direct => "direct",
            DetectionSource::ContextInherited => "context-inherited",
        }
    }
}

impl FromStr for DetectionSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(DetectionSource::Direct),
            "context-inherited" => Ok(DetectionSource::ContextInherited),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown detection source '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Cashtag,
    Token,
    Synonym,
    Context,
}

impl MatchKind {
    /// Tie-break rank when several matches for one ticker compete.
    pub fn rank(&self) -> u8 {
        match self {
            MatchKind::Cashtag => 4,
            MatchKind::Token => 3,
            MatchKind::Synonym => 2,
            MatchKind::Context => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Cashtag => "cashtag",
            MatchKind::Token => "token",
            MatchKind::Synonym => "synonym",
            MatchKind::Context => "context",
        }
    }
}

impl FromStr for MatchKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cashtag" => Ok(MatchKind::Cashtag),
            "token" => Ok(MatchKind::Token),
            "synonym" => Ok(MatchKind::Synonym),
            "context" => Ok(MatchKind::Context),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown match kind '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub ticker: String,
    pub confidence: f64,
    pub detection: DetectionSource,
    pub match_kind: MatchKind,
    /// Byte offsets into the source text; absent for inherited mentions.
    pub span: Option<(usize, usize)>,
}

impl Mention {
    pub fn is_inherited(&self) -> bool {
        self.detection == DetectionSource::ContextInherited
    }

    pub fn span_len(&self) -> usize {
        self.span.map(|(start, end)| end.saturating_sub(start)).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StanceLabel {
    Bullish,
    Bearish,
    Neutral,
    Unclear,
}

impl StanceLabel {
    pub const ALL: [StanceLabel; 4] = [
        StanceLabel::Bullish,
        StanceLabel::Bearish,
        StanceLabel::Neutral,
        StanceLabel::Unclear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StanceLabel::Bullish => "BULLISH",
            StanceLabel::Bearish => "BEARISH",
            StanceLabel::Neutral => "NEUTRAL",
            StanceLabel::Unclear => "UNCLEAR",
        }
    }
}

impl fmt::Display for StanceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StanceLabel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BULLISH" => Ok(StanceLabel::Bullish),
            "BEARISH" => Ok(StanceLabel::Bearish),
            "NEUTRAL" => Ok(StanceLabel::Neutral),
            "UNCLEAR" => Ok(StanceLabel::Unclear),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown stance label '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stance {
    pub ticker: String,
    pub label: StanceLabel,
    pub stance_score: f64,
    pub confidence: f64,
    pub classifier_version: String,
    pub context_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSort {
    Top,
    Controversial,
    New,
    Hot,
    Rising,
}

impl ListingSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingSort::Top => "top",
            ListingSort::Controversial => "controversial",
            ListingSort::New => "new",
            ListingSort::Hot => "hot",
            ListingSort::Rising => "rising",
        }
    }

    /// Only `top` and `controversial` listings take a time window.
    pub fn takes_window(&self) -> bool {
        matches!(self, ListingSort::Top | ListingSort::Controversial)
    }
}

impl FromStr for ListingSort {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(ListingSort::Top),
            "controversial" => Ok(ListingSort::Controversial),
            "new" => Ok(ListingSort::New),
            "hot" => Ok(ListingSort::Hot),
            "rising" => Ok(ListingSort::Rising),
            other => Err(RedditApiError::UnsupportedSort {
                sort: other.to_string(),
            }
            .into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }
}

impl FromStr for TimeWindow {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(TimeWindow::Hour),
            "day" => Ok(TimeWindow::Day),
            "week" => Ok(TimeWindow::Week),
            "month" => Ok(TimeWindow::Month),
            "year" => Ok(TimeWindow::Year),
            "all" => Ok(TimeWindow::All),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown time window '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullStatus {
    Running,
    Success,
    PartialSuccess,
    Failed,
}

impl PullStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullStatus::Running => "running",
            PullStatus::Success => "success",
            PullStatus::PartialSuccess => "partial_success",
            PullStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PullStatus::Running)
    }
}

impl FromStr for PullStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(PullStatus::Running),
            "success" => Ok(PullStatus::Success),
            "partial_success" => Ok(PullStatus::PartialSuccess),
            "failed" => Ok(PullStatus::Failed),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown pull status '{}'", other),
            }),
        }
    }
}

/// Result counters recorded on each PullRun.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullCounters {
    pub submissions: i64,
    pub comments: i64,
    pub mentions: i64,
    pub stance_rows: i64,
}

/// Append-only audit record of one source pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRun {
    pub id: Option<i64>,
    pub source: String,
    pub pulled_at: DateTime<Utc>,
    pub day_bucket: NaiveDate,
    pub sort: ListingSort,
    pub window: TimeWindow,
    pub limit: u32,
    pub status: PullStatus,
    pub note: Option<String>,
    pub counters: PullCounters,
}
