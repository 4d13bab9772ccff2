//! Market-level analytics over stored daily scores.
//!
//! Every view starts from the per-(day, source, ticker) sufficient statistics,
//! so sources and tickers are combined exactly before any ratio is taken. A
//! day is *active* when it has at least one mention; averages that would be
//! dragged toward zero by quiet days only look at active days.

use crate::rollup::DailyScore;
use crate::stats::SufficientStats;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Weighted scores at or beyond ±this are risk-on / risk-off days.
pub const REGIME_THRESHOLD: f64 = 0.15;
pub const MAX_MOVERS: usize = 8;
pub const MAX_TICKER_INSIGHTS: usize = 18;

const WEEKDAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// All tickers of one calendar day, sources merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayPoint {
    pub day: NaiveDate,
    pub weighted_score: f64,
    pub unweighted_score: f64,
    pub mention_count: i64,
    pub valid_count: i64,
    pub unclear_rate: f64,
    /// Shares of the directional labels; unclear mentions are left out.
    pub bullish_share: f64,
    pub bearish_share: f64,
    pub neutral_share: f64,
    /// Herfindahl index of the day's mention shares per ticker.
    pub concentration_hhi: f64,
    pub top_ticker_share: f64,
}

impl DayPoint {
    pub fn is_active(&self) -> bool {
        self.mention_count > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketSummary {
    pub avg_weighted_score: f64,
    pub score_volatility: f64,
    pub avg_unclear_rate: f64,
    pub avg_valid_ratio: f64,
    pub avg_bullish_share: f64,
    pub avg_bearish_share: f64,
    pub avg_neutral_share: f64,
    pub avg_concentration_hhi: f64,
    pub avg_top_ticker_share: f64,
    pub effective_ticker_count: f64,
    pub active_days: usize,
    pub total_mentions: i64,
    /// Least-squares slope per active day.
    pub score_trend_slope: f64,
    pub mention_trend_slope: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingPoint {
    pub day: NaiveDate,
    pub weighted_score: f64,
    pub weighted_ma7: f64,
    pub weighted_ma14: f64,
    pub mention_count: i64,
    pub mentions_ma7: f64,
    pub unclear_rate: f64,
    pub unclear_ma7: f64,
    pub volatility_ma7: f64,
    pub momentum_7d: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Regime {
    RiskOn,
    Balanced,
    RiskOff,
}

impl Regime {
    pub fn classify(weighted_score: f64) -> Self {
        if weighted_score >= REGIME_THRESHOLD {
            Regime::RiskOn
        } else if weighted_score <= -REGIME_THRESHOLD {
            Regime::RiskOff
        } else {
            Regime::Balanced
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegimeBreakdown {
    pub risk_on_days: usize,
    pub balanced_days: usize,
    pub risk_off_days: usize,
    pub risk_on_share: f64,
    pub balanced_share: f64,
    pub risk_off_share: f64,
    /// Changes of regime between consecutive active days.
    pub regime_switches: usize,
    /// `None` when the window has no active day.
    pub current_regime: Option<Regime>,
}

/// Pearson coefficients across active days, 0 when undefined.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Correlations {
    pub mentions_vs_abs_score: f64,
    pub unclear_vs_abs_score: f64,
    pub concentration_vs_unclear: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mover {
    pub ticker: String,
    pub current_mentions: i64,
    pub current_weighted_score: f64,
    pub previous_weighted_score: f64,
    pub score_delta: f64,
    pub mention_delta: i64,
}

/// Tickers whose score moved most between the last two active days.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Movers {
    pub up: Vec<Mover>,
    pub down: Vec<Mover>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerInsight {
    pub ticker: String,
    pub mention_count: i64,
    pub mention_share: f64,
    pub avg_weighted_score: f64,
    pub score_volatility: f64,
    pub latest_score: f64,
    pub previous_score: f64,
    pub momentum: f64,
    pub active_days: usize,
    pub unclear_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekdayPoint {
    /// 0 is Monday.
    pub weekday: u32,
    pub label: &'static str,
    pub avg_weighted_score: f64,
    pub avg_mentions: f64,
    pub avg_unclear_rate: f64,
    pub samples: usize,
}

/// One source on the last day of the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcePoint {
    pub source: String,
    pub mention_count: i64,
    pub weighted_score: f64,
    pub unclear_rate: f64,
    pub bullish_share: f64,
    pub bearish_share: f64,
    pub neutral_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub trend: Vec<DayPoint>,
    pub rolling_trend: Vec<RollingPoint>,
    pub market_summary: MarketSummary,
    pub regime_breakdown: RegimeBreakdown,
    pub correlations: Correlations,
    pub movers: Movers,
    pub ticker_insights: Vec<TickerInsight>,
    pub weekday_profile: Vec<WeekdayPoint>,
    pub source_snapshot: Vec<SourcePoint>,
}

/// Every analytics view of `rows` over the inclusive range `from..=to`.
pub fn build_report(rows: &[DailyScore], from: NaiveDate, to: NaiveDate) -> AnalyticsReport {
    let grid = TickerGrid::new(rows, from, to);
    let trend = grid.trend();
    AnalyticsReport {
        from,
        to,
        rolling_trend: rolling_trend(&trend),
        market_summary: market_summary(&trend),
        regime_breakdown: regime_breakdown(&trend),
        correlations: correlations(&trend),
        movers: grid.movers(&trend),
        ticker_insights: grid.ticker_insights(&trend),
        weekday_profile: weekday_profile(&trend),
        source_snapshot: source_snapshot(rows, to),
        trend,
    }
}

/// Statistics per day and ticker with sources merged. Every day of the range
/// is present, quiet days with no tickers.
#[derive(Debug, Clone, Default)]
pub struct TickerGrid {
    days: BTreeMap<NaiveDate, BTreeMap<String, SufficientStats>>,
}

impl TickerGrid {
    /// Rows outside `from..=to` are ignored.
    pub fn new(rows: &[DailyScore], from: NaiveDate, to: NaiveDate) -> Self {
        let mut days: BTreeMap<NaiveDate, BTreeMap<String, SufficientStats>> =
            days_between(from, to).map(|day| (day, BTreeMap::new())).collect();
        for row in rows.iter().filter(|row| row.day >= from && row.day <= to) {
            let cell = days
                .entry(row.day)
                .or_default()
                .entry(row.ticker.clone())
                .or_default();
            *cell = cell.merge(&row.stats);
        }
        Self { days }
    }

    /// One point per day, oldest first.
    pub fn trend(&self) -> Vec<DayPoint> {
        self.days
            .iter()
            .map(|(day, tickers)| day_point(*day, tickers))
            .collect()
    }

    pub fn movers(&self, trend: &[DayPoint]) -> Movers {
        let active: Vec<&DayPoint> = trend.iter().filter(|p| p.is_active()).collect();
        let [.., previous, current] = active.as_slice() else {
            return Movers::default();
        };

        let empty = BTreeMap::new();
        let now = self.days.get(&current.day).unwrap_or(&empty);
        let before = self.days.get(&previous.day).unwrap_or(&empty);
        let tickers: BTreeSet<&String> = now.keys().chain(before.keys()).collect();

        let mut down: Vec<Mover> = tickers
            .into_iter()
            .map(|ticker| {
                let curr = now.get(ticker).copied().unwrap_or_default();
                let prev = before.get(ticker).copied().unwrap_or_default();
                let current_weighted_score = curr.derive().score_weighted;
                let previous_weighted_score = prev.derive().score_weighted;
                Mover {
                    ticker: ticker.clone(),
                    current_mentions: curr.mention_count,
                    current_weighted_score,
                    previous_weighted_score,
                    score_delta: current_weighted_score - previous_weighted_score,
                    mention_delta: curr.mention_count - prev.mention_count,
                }
            })
            .collect();

        let mut up = down.clone();
        up.sort_by(|a, b| {
            b.score_delta
                .total_cmp(&a.score_delta)
                .then_with(|| b.current_mentions.cmp(&a.current_mentions))
        });
        up.truncate(MAX_MOVERS);

        down.sort_by(|a, b| {
            a.score_delta
                .total_cmp(&b.score_delta)
                .then_with(|| b.current_mentions.cmp(&a.current_mentions))
        });
        down.truncate(MAX_MOVERS);

        Movers { up, down }
    }

    /// Busiest tickers of the window with their day-to-day momentum.
    pub fn ticker_insights(&self, trend: &[DayPoint]) -> Vec<TickerInsight> {
        let window_mentions = trend.iter().map(|p| p.mention_count).sum::<i64>().max(1);

        let mut active_days: BTreeMap<&str, Vec<SufficientStats>> = BTreeMap::new();
        for tickers in self.days.values() {
            for (ticker, stats) in tickers.iter().filter(|(_, s)| !s.is_empty()) {
                active_days.entry(ticker.as_str()).or_default().push(*stats);
            }
        }

        let mut insights: Vec<TickerInsight> = active_days
            .into_iter()
            .map(|(ticker, days)| {
                let total = days
                    .iter()
                    .fold(SufficientStats::default(), |acc, s| acc.merge(s));
                let derived = total.derive();
                let day_scores: Vec<f64> = days.iter().map(|s| s.derive().score_weighted).collect();
                let latest_score = day_scores.last().copied().unwrap_or(0.0);
                let previous_score = day_scores.iter().rev().nth(1).copied().unwrap_or(latest_score);

                TickerInsight {
                    ticker: ticker.to_string(),
                    mention_count: total.mention_count,
                    mention_share: total.mention_count as f64 / window_mentions as f64,
                    avg_weighted_score: derived.score_weighted,
                    score_volatility: sample_stddev(&day_scores),
                    latest_score,
                    previous_score,
                    momentum: latest_score - previous_score,
                    active_days: day_scores.len(),
                    unclear_rate: derived.unclear_rate,
                }
            })
            .collect();

        insights.sort_by(|a, b| {
            b.mention_count
                .cmp(&a.mention_count)
                .then_with(|| b.momentum.abs().total_cmp(&a.momentum.abs()))
                .then_with(|| b.avg_weighted_score.abs().total_cmp(&a.avg_weighted_score.abs()))
        });
        insights.truncate(MAX_TICKER_INSIGHTS);
        insights
    }
}

fn day_point(day: NaiveDate, tickers: &BTreeMap<String, SufficientStats>) -> DayPoint {
    let total = tickers
        .values()
        .fold(SufficientStats::default(), |acc, s| acc.merge(s));
    let derived = total.derive();
    let labelled = (total.bullish_count + total.bearish_count + total.neutral_count) as f64;

    let (concentration_hhi, top_ticker_share) = if total.mention_count > 0 {
        let mentions = total.mention_count as f64;
        tickers
            .values()
            .filter(|s| !s.is_empty())
            .map(|s| s.mention_count as f64 / mentions)
            .fold((0.0, 0.0f64), |(hhi, top), share| (hhi + share * share, top.max(share)))
    } else {
        (0.0, 0.0)
    };

    DayPoint {
        day,
        weighted_score: derived.score_weighted,
        unweighted_score: derived.score_unweighted,
        mention_count: total.mention_count,
        valid_count: total.valid_count,
        unclear_rate: derived.unclear_rate,
        bullish_share: ratio(total.bullish_count as f64, labelled),
        bearish_share: ratio(total.bearish_count as f64, labelled),
        neutral_share: ratio(total.neutral_count as f64, labelled),
        concentration_hhi,
        top_ticker_share,
    }
}

/// Averages over active days; a window with none falls back to every day.
pub fn market_summary(trend: &[DayPoint]) -> MarketSummary {
    let active: Vec<&DayPoint> = trend.iter().filter(|p| p.is_active()).collect();
    let relevant = if active.is_empty() {
        trend.iter().collect()
    } else {
        active
    };
    if relevant.is_empty() {
        return MarketSummary::default();
    }

    let n = relevant.len() as f64;
    let avg = |field: fn(&DayPoint) -> f64| relevant.iter().map(|p| field(*p)).sum::<f64>() / n;
    let scores: Vec<f64> = relevant.iter().map(|p| p.weighted_score).collect();
    let mentions: Vec<f64> = relevant.iter().map(|p| p.mention_count as f64).collect();
    let avg_concentration_hhi = avg(|p| p.concentration_hhi);

    MarketSummary {
        avg_weighted_score: avg(|p| p.weighted_score),
        score_volatility: sample_stddev(&scores),
        avg_unclear_rate: avg(|p| p.unclear_rate),
        avg_valid_ratio: avg(|p| ratio(p.valid_count as f64, p.mention_count as f64)),
        avg_bullish_share: avg(|p| p.bullish_share),
        avg_bearish_share: avg(|p| p.bearish_share),
        avg_neutral_share: avg(|p| p.neutral_share),
        avg_concentration_hhi,
        avg_top_ticker_share: avg(|p| p.top_ticker_share),
        effective_ticker_count: ratio(1.0, avg_concentration_hhi),
        active_days: trend.iter().filter(|p| p.is_active()).count(),
        total_mentions: trend.iter().map(|p| p.mention_count).sum(),
        score_trend_slope: linear_slope(&scores),
        mention_trend_slope: linear_slope(&mentions),
    }
}

/// Trailing 7 and 14 day windows ending at each day.
///
/// Score and unclear averages skip quiet days and fall back to the day's own
/// value when the window has no active day; mention averages count every day.
pub fn rolling_trend(trend: &[DayPoint]) -> Vec<RollingPoint> {
    trend
        .iter()
        .enumerate()
        .map(|(idx, point)| {
            let week = &trend[idx.saturating_sub(6)..=idx];
            let fortnight = &trend[idx.saturating_sub(13)..=idx];
            let week_scores = active_values(week, |p| p.weighted_score);
            let week_mentions: Vec<f64> = week.iter().map(|p| p.mention_count as f64).collect();

            let weighted_ma7 = mean_or(&week_scores, point.weighted_score);
            RollingPoint {
                day: point.day,
                weighted_score: point.weighted_score,
                weighted_ma7,
                weighted_ma14: mean_or(
                    &active_values(fortnight, |p| p.weighted_score),
                    point.weighted_score,
                ),
                mention_count: point.mention_count,
                mentions_ma7: mean_or(&week_mentions, point.mention_count as f64),
                unclear_rate: point.unclear_rate,
                unclear_ma7: mean_or(&active_values(week, |p| p.unclear_rate), point.unclear_rate),
                volatility_ma7: sample_stddev(&week_scores),
                momentum_7d: point.weighted_score - weighted_ma7,
            }
        })
        .collect()
}

pub fn regime_breakdown(trend: &[DayPoint]) -> RegimeBreakdown {
    let regimes: Vec<Regime> = trend
        .iter()
        .filter(|p| p.is_active())
        .map(|p| Regime::classify(p.weighted_score))
        .collect();
    let Some(current) = regimes.last().copied() else {
        return RegimeBreakdown::default();
    };

    let n = regimes.len() as f64;
    let count = |regime: Regime| regimes.iter().filter(|r| **r == regime).count();
    let (risk_on_days, balanced_days, risk_off_days) = (
        count(Regime::RiskOn),
        count(Regime::Balanced),
        count(Regime::RiskOff),
    );

    RegimeBreakdown {
        risk_on_days,
        balanced_days,
        risk_off_days,
        risk_on_share: risk_on_days as f64 / n,
        balanced_share: balanced_days as f64 / n,
        risk_off_share: risk_off_days as f64 / n,
        regime_switches: regimes.windows(2).filter(|pair| pair[0] != pair[1]).count(),
        current_regime: Some(current),
    }
}

pub fn correlations(trend: &[DayPoint]) -> Correlations {
    let active: Vec<&DayPoint> = trend.iter().filter(|p| p.is_active()).collect();
    if active.len() < 2 {
        return Correlations::default();
    }

    let abs_scores: Vec<f64> = active.iter().map(|p| p.weighted_score.abs()).collect();
    let mentions: Vec<f64> = active.iter().map(|p| p.mention_count as f64).collect();
    let unclear: Vec<f64> = active.iter().map(|p| p.unclear_rate).collect();
    let concentration: Vec<f64> = active.iter().map(|p| p.concentration_hhi).collect();

    Correlations {
        mentions_vs_abs_score: pearson(&mentions, &abs_scores),
        unclear_vs_abs_score: pearson(&unclear, &abs_scores),
        concentration_vs_unclear: pearson(&concentration, &unclear),
    }
}

/// Averages per weekday over active days, Monday first.
pub fn weekday_profile(trend: &[DayPoint]) -> Vec<WeekdayPoint> {
    let mut sums = [(0.0f64, 0.0f64, 0.0f64, 0usize); 7];
    for point in trend.iter().filter(|p| p.is_active()) {
        let slot = &mut sums[point.day.weekday().num_days_from_monday() as usize];
        slot.0 += point.weighted_score;
        slot.1 += point.mention_count as f64;
        slot.2 += point.unclear_rate;
        slot.3 += 1;
    }

    sums.iter()
        .zip(WEEKDAY_LABELS)
        .enumerate()
        .map(|(idx, ((score, mentions, unclear, samples), label))| {
            let n = *samples as f64;
            WeekdayPoint {
                weekday: idx as u32,
                label,
                avg_weighted_score: ratio(*score, n),
                avg_mentions: ratio(*mentions, n),
                avg_unclear_rate: ratio(*unclear, n),
                samples: *samples,
            }
        })
        .collect()
}

/// Per-source totals on `day`, most mentioned first.
pub fn source_snapshot(rows: &[DailyScore], day: NaiveDate) -> Vec<SourcePoint> {
    let mut by_source: BTreeMap<&str, SufficientStats> = BTreeMap::new();
    for row in rows.iter().filter(|row| row.day == day) {
        let cell = by_source.entry(row.source.as_str()).or_default();
        *cell = cell.merge(&row.stats);
    }

    let mut points: Vec<SourcePoint> = by_source
        .into_iter()
        .map(|(source, stats)| {
            let derived = stats.derive();
            let labelled = (stats.bullish_count + stats.bearish_count + stats.neutral_count) as f64;
            SourcePoint {
                source: source.to_string(),
                mention_count: stats.mention_count,
                weighted_score: derived.score_weighted,
                unclear_rate: derived.unclear_rate,
                bullish_share: ratio(stats.bullish_count as f64, labelled),
                bearish_share: ratio(stats.bearish_count as f64, labelled),
                neutral_share: ratio(stats.neutral_count as f64, labelled),
            }
        })
        .collect();
    points.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
    points
}

fn days_between(from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    std::iter::successors(Some(from), |day| day.succ_opt()).take_while(move |day| *day <= to)
}

fn active_values(points: &[DayPoint], field: impl Fn(&DayPoint) -> f64) -> Vec<f64> {
    points.iter().filter(|p| p.is_active()).map(field).collect()
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn mean_or(values: &[f64], default: f64) -> f64 {
    if values.is_empty() {
        default
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_or(values, 0.0);
    let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (squares / (values.len() - 1) as f64).sqrt()
}

/// Least-squares slope against the index 0, 1, 2, ...
fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean_or(values, 0.0);
    let (numerator, denominator) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (idx, y)| {
            let dx = idx as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    ratio(numerator, denominator)
}

/// Clamped to [-1, 1]; 0 when either side is constant.
fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let (x_mean, y_mean) = (mean_or(x, 0.0), mean_or(y, 0.0));
    let (mut covariance, mut x_var, mut y_var) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        covariance += (a - x_mean) * (b - y_mean);
        x_var += (a - x_mean).powi(2);
        y_var += (b - y_mean).powi(2);
    }
    if x_var <= 0.0 || y_var <= 0.0 {
        return 0.0;
    }
    (covariance / (x_var * y_var).sqrt()).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StanceRow;
    use stance_core::StanceLabel;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    /// Unit-weight scores plus `unclear` unclear mentions.
    fn score(d: u32, source: &str, ticker: &str, scores: &[f64], unclear: usize) -> DailyScore {
        let mut stats = SufficientStats::default();
        let labelled = scores.iter().map(|s| {
            let label = if *s > 0.0 {
                StanceLabel::Bullish
            } else if *s < 0.0 {
                StanceLabel::Bearish
            } else {
                StanceLabel::Neutral
            };
            (label, *s)
        });
        let unclear = std::iter::repeat((StanceLabel::Unclear, 0.0)).take(unclear);
        for (label, score) in labelled.chain(unclear) {
            let row = StanceRow {
                label,
                score,
                confidence: 0.8,
                upvotes: 1,
                depth: 0,
            };
            stats.fold(&row, 1.0).unwrap();
        }
        DailyScore::new(day(d), source, ticker, stats)
    }

    fn point(d: u32, weighted_score: f64, mention_count: i64) -> DayPoint {
        DayPoint {
            day: day(d),
            weighted_score,
            unweighted_score: weighted_score,
            mention_count,
            valid_count: mention_count,
            unclear_rate: 0.0,
            bullish_share: 0.0,
            bearish_share: 0.0,
            neutral_share: 0.0,
            concentration_hhi: 0.0,
            top_ticker_share: 0.0,
        }
    }

    #[test]
    fn test_trend_fills_quiet_days_and_merges_sources() {
        let rows = vec![
            score(4, "stocks", "AAPL", &[0.5, 0.25], 1),
            score(4, "investing", "AAPL", &[0.0], 0),
            score(4, "stocks", "TSLA", &[-0.75], 0),
            score(6, "stocks", "NVDA", &[1.0], 0),
            score(9, "stocks", "NVDA", &[1.0], 0),
        ];
        let trend = TickerGrid::new(&rows, day(4), day(6)).trend();

        assert_eq!(trend.len(), 3);
        assert_eq!(trend[1].day, day(5));
        assert!(!trend[1].is_active());
        assert_eq!(trend[1].weighted_score, 0.0);

        let first = &trend[0];
        assert_eq!(first.mention_count, 5);
        assert_eq!(first.valid_count, 4);
        assert!(close(first.unclear_rate, 0.2));
        assert!(close(first.weighted_score, 0.0));
        assert!(close(first.bullish_share, 0.5));
        assert!(close(first.neutral_share, 0.25));
        // AAPL holds 4 of 5 mentions, TSLA 1.
        assert!(close(first.concentration_hhi, 0.64 + 0.04));
        assert!(close(first.top_ticker_share, 0.8));

        assert_eq!(trend[2].mention_count, 1);
        assert!(close(trend[2].concentration_hhi, 1.0));
    }

    #[test]
    fn test_rolling_trend_skips_quiet_days_for_scores() {
        let trend = vec![point(1, 0.2, 4), point(2, 0.0, 0), point(3, 0.6, 2)];
        let rolling = rolling_trend(&trend);

        assert!(close(rolling[0].weighted_ma7, 0.2));
        assert_eq!(rolling[0].volatility_ma7, 0.0);

        // The quiet day keeps the score average but halves the mention average.
        assert!(close(rolling[1].weighted_ma7, 0.2));
        assert!(close(rolling[1].mentions_ma7, 2.0));
        assert!(close(rolling[1].momentum_7d, -0.2));

        assert!(close(rolling[2].weighted_ma7, 0.4));
        assert!(close(rolling[2].weighted_ma14, 0.4));
        assert!(close(rolling[2].mentions_ma7, 2.0));
        assert!(close(rolling[2].momentum_7d, 0.2));
        assert!(close(rolling[2].volatility_ma7, 0.08f64.sqrt()));
    }

    #[test]
    fn test_rolling_windows_are_trailing() {
        let trend: Vec<DayPoint> = (1..=15).map(|d| point(d, f64::from(d) / 100.0, 1)).collect();
        let last = rolling_trend(&trend).pop().unwrap();
        // Days 9..=15 and 2..=15.
        assert!(close(last.weighted_ma7, 0.12));
        assert!(close(last.weighted_ma14, 0.085));
    }

    #[test]
    fn test_regime_breakdown() {
        let trend = vec![
            point(1, 0.2, 3),
            point(2, 0.15, 1),
            point(3, 0.9, 0),
            point(4, -0.15, 2),
            point(5, 0.1, 5),
        ];
        let regimes = regime_breakdown(&trend);

        assert_eq!(regimes.risk_on_days, 2);
        assert_eq!(regimes.risk_off_days, 1);
        assert_eq!(regimes.balanced_days, 1);
        assert!(close(regimes.risk_on_share, 0.5));
        assert_eq!(regimes.regime_switches, 2);
        assert_eq!(regimes.current_regime, Some(Regime::Balanced));

        let quiet = regime_breakdown(&[point(1, 0.0, 0)]);
        assert_eq!(quiet.current_regime, None);
        assert_eq!(quiet.regime_switches, 0);
    }

    #[test]
    fn test_correlations() {
        let mut trend = vec![point(1, 0.1, 1), point(2, -0.2, 2), point(3, 0.3, 3), point(4, 0.9, 0)];
        for (p, unclear) in trend.iter_mut().zip([0.6, 0.4, 0.2, 0.0]) {
            p.unclear_rate = unclear;
            p.concentration_hhi = 0.5;
        }
        let corr = correlations(&trend);

        assert!(close(corr.mentions_vs_abs_score, 1.0));
        assert!(close(corr.unclear_vs_abs_score, -1.0));
        // Constant concentration has no defined correlation.
        assert_eq!(corr.concentration_vs_unclear, 0.0);

        assert_eq!(correlations(&trend[..1]), Correlations::default());
    }

    #[test]
    fn test_movers_compare_last_two_active_days() {
        let rows = vec![
            score(4, "stocks", "AAPL", &[-0.5], 0),
            score(4, "stocks", "TSLA", &[0.5, 0.5], 0),
            score(4, "stocks", "GME", &[0.25], 0),
            score(6, "stocks", "AAPL", &[0.5], 0),
            score(6, "stocks", "NVDA", &[0.25, 0.25, 0.25], 0),
            score(6, "stocks", "TSLA", &[-0.5], 0),
        ];
        let grid = TickerGrid::new(&rows, day(3), day(7));
        let movers = grid.movers(&grid.trend());

        let up: Vec<&str> = movers.up.iter().map(|m| m.ticker.as_str()).collect();
        assert_eq!(up, vec!["AAPL", "NVDA", "GME", "TSLA"]);
        assert!(close(movers.up[0].score_delta, 1.0));
        assert!(close(movers.up[0].previous_weighted_score, -0.5));
        assert_eq!(movers.up[1].mention_delta, 3);

        assert_eq!(movers.down[0].ticker, "TSLA");
        assert!(close(movers.down[0].score_delta, -1.0));
        assert_eq!(movers.down[0].mention_delta, -1);
        let gone = movers.down.iter().find(|m| m.ticker == "GME").unwrap();
        assert_eq!(gone.current_mentions, 0);
        assert!(close(gone.score_delta, -0.25));
    }

    #[test]
    fn test_movers_need_two_active_days() {
        let rows = vec![score(4, "stocks", "AAPL", &[0.5], 0)];
        let grid = TickerGrid::new(&rows, day(1), day(7));
        assert_eq!(grid.movers(&grid.trend()), Movers::default());
    }

    #[test]
    fn test_movers_are_capped() {
        let tickers: Vec<String> = (0..12).map(|i| format!("T{:02}", i)).collect();
        let rows: Vec<DailyScore> = tickers
            .iter()
            .flat_map(|t| [score(1, "stocks", t, &[0.1], 0), score(2, "stocks", t, &[0.2], 0)])
            .collect();
        let grid = TickerGrid::new(&rows, day(1), day(2));
        let movers = grid.movers(&grid.trend());
        assert_eq!(movers.up.len(), MAX_MOVERS);
        assert_eq!(movers.down.len(), MAX_MOVERS);
        assert_eq!(movers.up[0].ticker, "T00");
    }

    #[test]
    fn test_ticker_insights_track_momentum() {
        let rows = vec![
            score(1, "stocks", "AAPL", &[0.2], 0),
            score(2, "stocks", "AAPL", &[0.4], 1),
            score(3, "stocks", "AAPL", &[-0.2], 0),
            score(3, "stocks", "TSLA", &[0.5], 0),
        ];
        let grid = TickerGrid::new(&rows, day(1), day(3));
        let insights = grid.ticker_insights(&grid.trend());

        assert_eq!(insights.len(), 2);
        let aapl = &insights[0];
        assert_eq!(aapl.ticker, "AAPL");
        assert_eq!(aapl.mention_count, 4);
        assert!(close(aapl.mention_share, 0.8));
        assert_eq!(aapl.active_days, 3);
        assert!(close(aapl.latest_score, -0.2));
        assert!(close(aapl.previous_score, 0.4));
        assert!(close(aapl.momentum, -0.6));
        assert!(close(aapl.avg_weighted_score, 0.4 / 3.0));
        assert!(close(aapl.unclear_rate, 0.25));

        let tsla = &insights[1];
        assert_eq!(tsla.previous_score, tsla.latest_score);
        assert_eq!(tsla.momentum, 0.0);
        assert_eq!(tsla.score_volatility, 0.0);
    }

    #[test]
    fn test_market_summary() {
        let trend = vec![point(1, 0.1, 2), point(2, 0.0, 0), point(3, 0.3, 4), point(4, 0.5, 6)];
        let summary = market_summary(&trend);

        assert_eq!(summary.active_days, 3);
        assert_eq!(summary.total_mentions, 12);
        assert!(close(summary.avg_weighted_score, 0.3));
        assert!(close(summary.score_volatility, 0.2));
        assert!(close(summary.score_trend_slope, 0.2));
        assert!(close(summary.mention_trend_slope, 2.0));
        assert!(close(summary.avg_valid_ratio, 1.0));

        assert_eq!(market_summary(&[]), MarketSummary::default());
    }

    #[test]
    fn test_weekday_profile() {
        // 2024-03-04 is a Monday.
        let trend = vec![point(4, 0.2, 2), point(11, 0.4, 4), point(12, 0.9, 0), point(10, -0.1, 1)];
        let profile = weekday_profile(&trend);

        assert_eq!(profile.len(), 7);
        assert_eq!(profile[0].label, "Mon");
        assert_eq!(profile[0].samples, 2);
        assert!(close(profile[0].avg_weighted_score, 0.3));
        assert!(close(profile[0].avg_mentions, 3.0));
        assert_eq!(profile[1].samples, 0);
        assert_eq!(profile[6].label, "Sun");
        assert_eq!(profile[6].samples, 1);
    }

    #[test]
    fn test_source_snapshot_uses_last_day_only() {
        let rows = vec![
            score(5, "stocks", "AAPL", &[0.5], 0),
            score(5, "investing", "AAPL", &[0.5, -0.5], 1),
            score(5, "investing", "TSLA", &[1.0], 0),
            score(4, "wallstreetbets", "GME", &[1.0, 1.0, 1.0, 1.0, 1.0], 0),
        ];
        let snapshot = source_snapshot(&rows, day(5));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].source, "investing");
        assert_eq!(snapshot[0].mention_count, 4);
        assert!(close(snapshot[0].unclear_rate, 0.25));
        assert!(close(snapshot[0].weighted_score, 1.0 / 3.0));
        assert!(close(snapshot[0].bearish_share, 1.0 / 3.0));
        assert_eq!(snapshot[1].source, "stocks");
    }

    #[test]
    fn test_report_over_empty_window() {
        let report = build_report(&[], day(1), day(3));
        assert_eq!(report.trend.len(), 3);
        assert_eq!(report.rolling_trend.len(), 3);
        assert_eq!(report.market_summary.active_days, 0);
        assert_eq!(report.regime_breakdown.current_regime, None);
        assert!(report.movers.up.is_empty());
        assert!(report.ticker_insights.is_empty());
        assert!(report.source_snapshot.is_empty());
        assert_eq!(report.weekday_profile.len(), 7);
    }
}
