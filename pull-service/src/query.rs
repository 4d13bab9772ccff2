//! Read side: aggregated results, per-ticker series, analytics, stored threads.
//!
//! Storage errors are logged and answered with empty results.

use aggregator::{
    build_report, daily_series, rollup, AnalyticsReport, DailyScore, DerivedScores, SufficientStats,
};
use chrono::{Duration, NaiveDate};
use database::{Database, ExampleMention, StoredThread};
use serde::Serialize;
use stance_core::{CoreError, PullRun, StanceLabel};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::warn;

pub const EXAMPLES_PER_LABEL: u32 = 5;
pub const MAX_SERIES_DAYS: u32 = 365;
pub const MIN_ANALYTICS_DAYS: u32 = 3;
pub const DEFAULT_ANALYTICS_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultsWindow {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
}

impl ResultsWindow {
    pub fn days(&self) -> i64 {
        match self {
            ResultsWindow::Day => 1,
            ResultsWindow::Week => 7,
        }
    }

    /// Inclusive day range ending at `day`, `None` past the calendar's start.
    pub fn range(&self, day: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        days_ending_at(day, self.days())
    }
}

/// Inclusive range of `days` days ending at `to`.
fn days_ending_at(to: NaiveDate, days: i64) -> Option<(NaiveDate, NaiveDate)> {
    let from = to.checked_sub_signed(Duration::days(days.max(1) - 1))?;
    Some((from, to))
}

/// Series length clamped to `1..=MAX_SERIES_DAYS`.
pub fn series_range(to: NaiveDate, days: u32) -> Option<(NaiveDate, NaiveDate)> {
    days_ending_at(to, i64::from(days.clamp(1, MAX_SERIES_DAYS)))
}

/// Analytics window clamped to `MIN_ANALYTICS_DAYS..=MAX_SERIES_DAYS`.
pub fn analytics_range(to: NaiveDate, days: u32) -> Option<(NaiveDate, NaiveDate)> {
    days_ending_at(to, i64::from(days.clamp(MIN_ANALYTICS_DAYS, MAX_SERIES_DAYS)))
}

impl FromStr for ResultsWindow {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "24h" | "1d" | "day" => Ok(ResultsWindow::Day),
            "7d" | "week" => Ok(ResultsWindow::Week),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown results window '{}'", other),
            }),
        }
    }
}

/// One ticker over the requested window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerResult {
    pub ticker: String,
    pub stats: SufficientStats,
    #[serde(flatten)]
    pub derived: DerivedScores,
    /// False when any contributing row predates exact statistics.
    pub stats_exact: bool,
    pub days: BTreeSet<NaiveDate>,
    pub sources: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsView {
    pub day: NaiveDate,
    pub window: ResultsWindow,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub source: Option<String>,
    pub tickers: Vec<TickerResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub day: NaiveDate,
    pub stats: SufficientStats,
    #[serde(flatten)]
    pub derived: DerivedScores,
    pub stats_exact: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerSeries {
    pub ticker: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub source: Option<String>,
    pub points: Vec<SeriesPoint>,
    pub bullish_examples: Vec<ExampleMention>,
    pub bearish_examples: Vec<ExampleMention>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsView {
    pub days: u32,
    pub source: Option<String>,
    #[serde(flatten)]
    pub report: AnalyticsReport,
}

#[derive(Clone)]
pub struct ResultsReader {
    db: Database,
}

impl ResultsReader {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Per-ticker scores for the window ending at `day`, most mentioned first.
    pub async fn results(
        &self,
        day: NaiveDate,
        window: ResultsWindow,
        source: Option<&str>,
    ) -> ResultsView {
        let Some((from, to)) = window.range(day) else {
            warn!("No {:?} window ends at {}", window, day);
            return ResultsView {
                day,
                window,
                from: day,
                to: day,
                source: source.map(str::to_string),
                tickers: Vec::new(),
            };
        };
        let rows = self.scores(from, to, source, None).await;

        let tickers = rollup(&rows)
            .into_iter()
            .map(|r| TickerResult {
                stats_exact: r.stats.stats_exact,
                ticker: r.ticker,
                stats: r.stats,
                derived: r.derived,
                days: r.days,
                sources: r.sources,
            })
            .collect();

        ResultsView {
            day,
            window,
            from,
            to,
            source: source.map(str::to_string),
            tickers,
        }
    }

    /// Daily points for `ticker` over `days` days ending at `to`, with the
    /// most upvoted bullish and bearish mentions. `days` is clamped to
    /// `1..=MAX_SERIES_DAYS`.
    pub async fn ticker_series(
        &self,
        ticker: &str,
        to: NaiveDate,
        days: u32,
        source: Option<&str>,
    ) -> TickerSeries {
        let ticker = ticker.trim().to_ascii_uppercase();
        let Some((from, to)) = series_range(to, days) else {
            warn!("No {} day series ends at {}", days, to);
            return TickerSeries {
                ticker,
                from: to,
                to,
                source: source.map(str::to_string),
                points: Vec::new(),
                bullish_examples: Vec::new(),
                bearish_examples: Vec::new(),
            };
        };
        let rows = self.scores(from, to, source, Some(&ticker)).await;

        let points = daily_series(&rows, &ticker)
            .into_iter()
            .map(|(day, stats)| SeriesPoint {
                day,
                derived: stats.derive(),
                stats_exact: stats.stats_exact,
                stats,
            })
            .collect();

        let bullish_examples = self
            .examples(&ticker, StanceLabel::Bullish, from, to, source)
            .await;
        let bearish_examples = self
            .examples(&ticker, StanceLabel::Bearish, from, to, source)
            .await;

        TickerSeries {
            ticker,
            from,
            to,
            source: source.map(str::to_string),
            points,
            bullish_examples,
            bearish_examples,
        }
    }

    /// Trend, regime, correlation and mover views over `days` days ending
    /// at `to`.
    pub async fn analytics(&self, to: NaiveDate, days: u32, source: Option<&str>) -> AnalyticsView {
        let days = days.clamp(MIN_ANALYTICS_DAYS, MAX_SERIES_DAYS);
        let source = source.map(str::to_string);
        let Some((from, to)) = analytics_range(to, days) else {
            warn!("No {} day analytics window ends at {}", days, to);
            return AnalyticsView {
                days,
                source,
                report: build_report(&[], to, to),
            };
        };

        let rows = self.scores(from, to, source.as_deref(), None).await;
        AnalyticsView {
            days,
            source,
            report: build_report(&rows, from, to),
        }
    }

    pub async fn thread(&self, submission_id: &str) -> Option<StoredThread> {
        match self.db.thread(submission_id).await {
            Ok(thread) => thread,
            Err(e) => {
                warn!("Reading thread {} failed: {}", submission_id, e);
                None
            }
        }
    }

    pub async fn pull_runs(&self, day: Option<NaiveDate>, source: Option<&str>) -> Vec<PullRun> {
        self.db.pull_runs(day, source).await.unwrap_or_else(|e| {
            warn!("Reading pull runs failed: {}", e);
            Vec::new()
        })
    }

    async fn scores(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        source: Option<&str>,
        ticker: Option<&str>,
    ) -> Vec<DailyScore> {
        self.db
            .daily_scores(from, to, source, ticker)
            .await
            .unwrap_or_else(|e| {
                warn!("Reading daily scores {}..{} failed: {}", from, to, e);
                Vec::new()
            })
    }

    async fn examples(
        &self,
        ticker: &str,
        label: StanceLabel,
        from: NaiveDate,
        to: NaiveDate,
        source: Option<&str>,
    ) -> Vec<ExampleMention> {
        self.db
            .example_mentions(ticker, label, from, to, source, EXAMPLES_PER_LABEL)
            .await
            .unwrap_or_else(|e| {
                warn!("Reading {} examples for {} failed: {}", label.as_str(), ticker, e);
                Vec::new()
            })
    }
}
