//! Daily per-ticker stance aggregation and the analytics built on it.

pub mod analytics;
pub mod rollup;
pub mod stats;

pub use analytics::{build_report, AnalyticsReport, Regime, TickerGrid};
pub use rollup::{daily_series, rollup, BucketAccumulator, DailyScore, TickerRollup};
pub use stats::{
    derive, fold, merge, validate, DerivedScores, LegacyScore, StanceRow, SufficientStats,
    WeightPolicy,
};
