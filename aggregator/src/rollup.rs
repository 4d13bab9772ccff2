use crate::stats::{DerivedScores, StanceRow, SufficientStats, WeightPolicy};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use stance_core::AggregationError;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Stored per-(day bucket, source, ticker) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyScore {
    pub day: NaiveDate,
    pub source: String,
    pub ticker: String,
    pub stats: SufficientStats,
    pub derived: DerivedScores,
}

impl DailyScore {
    pub fn new(day: NaiveDate, source: impl Into<String>, ticker: impl Into<String>, stats: SufficientStats) -> Self {
        Self {
            day,
            source: source.into(),
            ticker: ticker.into(),
            derived: stats.derive(),
            stats,
        }
    }
}

/// Per-ticker statistics for one (day bucket, source).
#[derive(Debug, Clone)]
pub struct BucketAccumulator {
    day: NaiveDate,
    source: String,
    policy: WeightPolicy,
    cells: BTreeMap<String, SufficientStats>,
    rejected: usize,
}

impl BucketAccumulator {
    pub fn new(day: NaiveDate, source: impl Into<String>, policy: WeightPolicy) -> Self {
        Self {
            day,
            source: source.into(),
            policy,
            cells: BTreeMap::new(),
            rejected: 0,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fold `row` under the bucket's weight policy.
    ///
    /// Rejected rows are counted and leave the ticker's statistics unchanged.
    pub fn fold(&mut self, ticker: &str, row: &StanceRow) -> Result<(), AggregationError> {
        let weight = self.policy.weight(row.upvotes, row.depth);
        let cell = self.cells.entry(ticker.to_string()).or_default();
        match cell.fold(row, weight) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.rejected += 1;
                warn!("Rejected {} row for r/{} {}: {}", ticker, self.source, self.day, e);
                if cell.is_empty() {
                    self.cells.remove(ticker);
                }
                Err(e)
            }
        }
    }

    pub fn merge_stats(&mut self, ticker: &str, stats: &SufficientStats) {
        let cell = self.cells.entry(ticker.to_string()).or_default();
        *cell = cell.merge(stats);
    }

    pub fn merge(&mut self, other: &BucketAccumulator) {
        for (ticker, stats) in &other.cells {
            self.merge_stats(ticker, stats);
        }
        self.rejected += other.rejected;
    }

    pub fn get(&self, ticker: &str) -> Option<&SufficientStats> {
        self.cells.get(ticker)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// One row per ticker, ordered by ticker.
    pub fn into_scores(self) -> Vec<DailyScore> {
        let day = self.day;
        let source = self.source;
        self.cells
            .into_iter()
            .map(|(ticker, stats)| DailyScore::new(day, source.clone(), ticker, stats))
            .collect()
    }
}

/// One ticker merged across several days and/or sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerRollup {
    pub ticker: String,
    pub stats: SufficientStats,
    pub derived: DerivedScores,
    pub days: BTreeSet<NaiveDate>,
    pub sources: BTreeSet<String>,
}

/// Merge rows by ticker, most-mentioned first.
pub fn rollup<'a, I>(rows: I) -> Vec<TickerRollup>
where
    I: IntoIterator<Item = &'a DailyScore>,
{
    let mut by_ticker: BTreeMap<&str, TickerRollup> = BTreeMap::new();
    for row in rows {
        let entry = by_ticker
            .entry(row.ticker.as_str())
            .or_insert_with(|| TickerRollup {
                ticker: row.ticker.clone(),
                stats: SufficientStats::default(),
                derived: SufficientStats::default().derive(),
                days: BTreeSet::new(),
                sources: BTreeSet::new(),
            });
        entry.stats = entry.stats.merge(&row.stats);
        entry.days.insert(row.day);
        entry.sources.insert(row.source.clone());
    }

    let mut rollups: Vec<TickerRollup> = by_ticker
        .into_values()
        .map(|mut rollup| {
            rollup.derived = rollup.stats.derive();
            rollup
        })
        .collect();
    rollups.sort_by(|a, b| {
        b.stats
            .mention_count
            .cmp(&a.stats.mention_count)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
    rollups
}

/// Per-day statistics of one ticker with sources merged, oldest day first.
pub fn daily_series<'a, I>(rows: I, ticker: &str) -> Vec<(NaiveDate, SufficientStats)>
where
    I: IntoIterator<Item = &'a DailyScore>,
{
    let mut by_day: BTreeMap<NaiveDate, SufficientStats> = BTreeMap::new();
    for row in rows.into_iter().filter(|row| row.ticker == ticker) {
        let cell = by_day.entry(row.day).or_default();
        *cell = cell.merge(&row.stats);
    }
    by_day.into_iter().collect()
}
