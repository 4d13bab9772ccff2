//! SQLite persistence for pull runs, threads, mentions, stances and daily scores.

pub mod models;

#[cfg(test)]
mod tests;

pub use models::{ExampleMention, StoredMention, StoredStance, StoredThread};

use aggregator::{DailyScore, StanceRow};
use chrono::NaiveDate;
use models::{
    AggregationInputRow, CommentRow, DailyScoreRow, ExampleRow, MentionRow, PullRunRow,
    StanceRowRecord, SubmissionRow,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use stance_core::{
    Comment, CoreError, DatabaseError, Mention, PullCounters, PullRun, PullStatus, Stance,
    StanceLabel, Submission, TargetRef, TargetType,
};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Mentions and stances computed for one submission or comment.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetAnalysis {
    pub target: TargetRef,
    pub mentions: Vec<Mention>,
    pub stances: Vec<Stance>,
}

/// Everything stored for one processed submission.
#[derive(Debug, Clone, Copy)]
pub struct ThreadRecord<'a> {
    pub pull_run_id: i64,
    pub submission: &'a Submission,
    /// Pre-order, as built.
    pub comments: &'a [Comment],
    pub incomplete: bool,
    pub failed_batches: usize,
    pub analyses: &'a [TargetAnalysis],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub comments: usize,
    pub stale_comments_removed: usize,
    pub mentions: usize,
    pub stance_rows: usize,
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn sql_error(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.message().contains("database is locked") {
            return DatabaseError::DatabaseLocked.into();
        }
    }
    DatabaseError::Sql(e).into()
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        ensure_parent_dir(url)?;

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        debug!("Connected to {}", url);
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        Ok(())
    }

    /// Connect and bring the schema up to date.
    pub async fn open(url: &str) -> Result<Self, CoreError> {
        let db = Self::connect(url).await?;
        db.run_migrations().await?;
        info!("Database ready at {}", url);
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_pull_run(&self, run: &PullRun) -> Result<i64, CoreError> {
        let result = sqlx::query(
            "INSERT INTO pull_runs (
                source, pulled_at, day_bucket, sort, time_window, page_limit,
                status, note, submissions, comments, mentions, stance_rows
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.source)
        .bind(run.pulled_at)
        .bind(run.day_bucket)
        .bind(run.sort.as_str())
        .bind(run.window.as_str())
        .bind(i64::from(run.limit))
        .bind(run.status.as_str())
        .bind(&run.note)
        .bind(run.counters.submissions)
        .bind(run.counters.comments)
        .bind(run.counters.mentions)
        .bind(run.counters.stance_rows)
        .execute(&self.pool)
        .await
        .map_err(sql_error)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn finish_pull_run(
        &self,
        id: i64,
        status: PullStatus,
        note: Option<&str>,
        counters: &PullCounters,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE pull_runs
             SET status = ?, note = ?, submissions = ?, comments = ?, mentions = ?, stance_rows = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(note)
        .bind(counters.submissions)
        .bind(counters.comments)
        .bind(counters.mentions)
        .bind(counters.stance_rows)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(sql_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound {
                resource: format!("pull run {}", id),
            });
        }
        Ok(())
    }

    /// Audit rows, newest first.
    pub async fn pull_runs(
        &self,
        day: Option<NaiveDate>,
        source: Option<&str>,
    ) -> Result<Vec<PullRun>, CoreError> {
        let rows = sqlx::query_as::<_, PullRunRow>(
            "SELECT id, source, pulled_at, day_bucket, sort, time_window, page_limit, status,
                    note, submissions, comments, mentions, stance_rows
             FROM pull_runs
             WHERE (?1 IS NULL OR day_bucket = ?1) AND (?2 IS NULL OR source = ?2)
             ORDER BY id DESC",
        )
        .bind(day)
        .bind(source)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;

        rows.into_iter().map(PullRun::try_from).collect()
    }

    /// Store one processed submission atomically.
    ///
    /// Earlier mentions and stances of the submission and its comments are
    /// replaced, and comments no longer present in the thread are removed.
    pub async fn save_thread(&self, record: &ThreadRecord<'_>) -> Result<SaveSummary, CoreError> {
        let submission = record.submission;
        let mut tx = self.pool.begin().await.map_err(sql_error)?;

        sqlx::query(
            "INSERT INTO submissions (
                id, pull_run_id, source, created_utc, title, selftext, score,
                num_comments, permalink, url, incomplete, failed_batches
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                pull_run_id = excluded.pull_run_id,
                source = excluded.source,
                created_utc = excluded.created_utc,
                title = excluded.title,
                selftext = excluded.selftext,
                score = excluded.score,
                num_comments = excluded.num_comments,
                permalink = excluded.permalink,
                url = excluded.url,
                incomplete = excluded.incomplete,
                failed_batches = excluded.failed_batches",
        )
        .bind(&submission.id)
        .bind(record.pull_run_id)
        .bind(&submission.source)
        .bind(submission.created_utc)
        .bind(&submission.title)
        .bind(&submission.selftext)
        .bind(submission.score)
        .bind(submission.num_comments)
        .bind(&submission.permalink)
        .bind(&submission.url)
        .bind(record.incomplete)
        .bind(record.failed_batches as i64)
        .execute(&mut *tx)
        .await
        .map_err(sql_error)?;

        let existing: Vec<String> =
            sqlx::query_scalar("SELECT id FROM comments WHERE submission_id = ?")
                .bind(&submission.id)
                .fetch_all(&mut *tx)
                .await
                .map_err(sql_error)?;

        for table in ["mentions", "stances"] {
            sqlx::query(&format!(
                "DELETE FROM {table}
                 WHERE (target_type = 'submission' AND target_id = ?1)
                    OR (target_type = 'comment' AND target_id IN
                        (SELECT id FROM comments WHERE submission_id = ?1))"
            ))
            .bind(&submission.id)
            .execute(&mut *tx)
            .await
            .map_err(sql_error)?;
        }

        let fresh: HashSet<&str> = record.comments.iter().map(|c| c.id.as_str()).collect();
        let mut summary = SaveSummary::default();
        for stale in existing.iter().filter(|id| !fresh.contains(id.as_str())) {
            sqlx::query("DELETE FROM comments WHERE id = ?")
                .bind(stale)
                .execute(&mut *tx)
                .await
                .map_err(sql_error)?;
            summary.stale_comments_removed += 1;
        }

        for (position, comment) in record.comments.iter().enumerate() {
            sqlx::query(
                "INSERT INTO comments (
                    id, submission_id, parent_id, depth, author, body, score,
                    permalink, created_utc, position
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (id) DO UPDATE SET
                    submission_id = excluded.submission_id,
                    parent_id = excluded.parent_id,
                    depth = excluded.depth,
                    author = excluded.author,
                    body = excluded.body,
                    score = excluded.score,
                    permalink = excluded.permalink,
                    created_utc = excluded.created_utc,
                    position = excluded.position",
            )
            .bind(&comment.id)
            .bind(&comment.submission_id)
            .bind(&comment.parent_id)
            .bind(i64::from(comment.depth))
            .bind(&comment.author)
            .bind(&comment.body)
            .bind(comment.score)
            .bind(&comment.permalink)
            .bind(comment.created_utc)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(sql_error)?;
            summary.comments += 1;
        }

        for analysis in record.analyses {
            let target = &analysis.target;
            for mention in &analysis.mentions {
                sqlx::query(
                    "INSERT INTO mentions (
                        target_type, target_id, ticker, confidence, detection,
                        match_kind, span_start, span_end
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(target.target_type.as_str())
                .bind(&target.target_id)
                .bind(&mention.ticker)
                .bind(mention.confidence)
                .bind(mention.detection.as_str())
                .bind(mention.match_kind.as_str())
                .bind(mention.span.map(|(start, _)| start as i64))
                .bind(mention.span.map(|(_, end)| end as i64))
                .execute(&mut *tx)
                .await
                .map_err(sql_error)?;
                summary.mentions += 1;
            }

            for stance in &analysis.stances {
                sqlx::query(
                    "INSERT INTO stances (
                        target_type, target_id, ticker, label, stance_score,
                        confidence, classifier_version, context_text
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (target_type, target_id, ticker) DO UPDATE SET
                        label = excluded.label,
                        stance_score = excluded.stance_score,
                        confidence = excluded.confidence,
                        classifier_version = excluded.classifier_version,
                        context_text = excluded.context_text",
                )
                .bind(target.target_type.as_str())
                .bind(&target.target_id)
                .bind(&stance.ticker)
                .bind(stance.label.as_str())
                .bind(stance.stance_score)
                .bind(stance.confidence)
                .bind(&stance.classifier_version)
                .bind(&stance.context_text)
                .execute(&mut *tx)
                .await
                .map_err(sql_error)?;
                summary.stance_rows += 1;
            }
        }

        tx.commit().await.map_err(sql_error)?;

        if summary.stale_comments_removed > 0 {
            debug!(
                "Removed {} stale comments of submission {}",
                summary.stale_comments_removed, submission.id
            );
        }
        Ok(summary)
    }

    /// Stance rows of every submission in the (day, source) bucket whose
    /// latest pull is not `exclude_run`, with the upvotes and depth used for
    /// weighting.
    pub async fn bucket_stance_rows(
        &self,
        day: NaiveDate,
        source: &str,
        exclude_run: Option<i64>,
    ) -> Result<Vec<(String, StanceRow)>, CoreError> {
        let rows = sqlx::query_as::<_, AggregationInputRow>(
            "SELECT st.ticker, st.label, st.stance_score, st.confidence,
                    s.score AS upvotes, 0 AS depth
             FROM stances st
             JOIN submissions s ON st.target_type = 'submission' AND st.target_id = s.id
             JOIN pull_runs r ON r.id = s.pull_run_id
             WHERE r.day_bucket = ?1 AND r.source = ?2 AND (?3 IS NULL OR s.pull_run_id != ?3)
             UNION ALL
             SELECT st.ticker, st.label, st.stance_score, st.confidence,
                    c.score AS upvotes, c.depth AS depth
             FROM stances st
             JOIN comments c ON st.target_type = 'comment' AND st.target_id = c.id
             JOIN submissions s ON s.id = c.submission_id
             JOIN pull_runs r ON r.id = s.pull_run_id
             WHERE r.day_bucket = ?1 AND r.source = ?2 AND (?3 IS NULL OR s.pull_run_id != ?3)",
        )
        .bind(day)
        .bind(source)
        .bind(exclude_run)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let label = match row.label.parse::<StanceLabel>() {
                Ok(label) => label,
                Err(e) => {
                    warn!("Skipping stored stance for {}: {}", row.ticker, e);
                    continue;
                }
            };
            out.push((
                row.ticker,
                StanceRow {
                    label,
                    score: row.stance_score,
                    confidence: row.confidence,
                    upvotes: row.upvotes,
                    depth: u32::try_from(row.depth).unwrap_or_default(),
                },
            ));
        }
        Ok(out)
    }

    /// Replace every DailyScore row of one (day, source) bucket.
    pub async fn replace_daily_scores(
        &self,
        day: NaiveDate,
        source: &str,
        scores: &[DailyScore],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(sql_error)?;

        sqlx::query("DELETE FROM daily_scores WHERE day_bucket = ? AND source = ?")
            .bind(day)
            .bind(source)
            .execute(&mut *tx)
            .await
            .map_err(sql_error)?;

        for score in scores {
            let (stats, derived) = (&score.stats, &score.derived);
            sqlx::query(
                "INSERT INTO daily_scores (
                    day_bucket, source, ticker, valid_count, score_sum, weighted_numerator,
                    weighted_denominator, sum_of_squares, mention_count, bullish_count,
                    bearish_count, neutral_count, unclear_count, score_unweighted,
                    score_weighted, stddev, ci95_low, ci95_high, unclear_rate
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(day)
            .bind(source)
            .bind(&score.ticker)
            .bind(stats.valid_count)
            .bind(stats.score_sum)
            .bind(stats.weighted_numerator)
            .bind(stats.weighted_denominator)
            .bind(stats.sum_of_squares)
            .bind(stats.mention_count)
            .bind(stats.bullish_count)
            .bind(stats.bearish_count)
            .bind(stats.neutral_count)
            .bind(stats.unclear_count)
            .bind(derived.score_unweighted)
            .bind(derived.score_weighted)
            .bind(derived.stddev)
            .bind(derived.ci95_low)
            .bind(derived.ci95_high)
            .bind(derived.unclear_rate)
            .execute(&mut *tx)
            .await
            .map_err(sql_error)?;
        }

        tx.commit().await.map_err(sql_error)?;
        debug!("Stored {} daily scores for r/{} {}", scores.len(), source, day);
        Ok(())
    }

    /// DailyScore rows with `from <= day <= to`, legacy rows coalesced.
    pub async fn daily_scores(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        source: Option<&str>,
        ticker: Option<&str>,
    ) -> Result<Vec<DailyScore>, CoreError> {
        let rows = sqlx::query_as::<_, DailyScoreRow>(
            "SELECT day_bucket, source, ticker, valid_count, score_sum, weighted_numerator,
                    weighted_denominator, sum_of_squares, mention_count, bullish_count,
                    bearish_count, neutral_count, unclear_count, score_unweighted, score_weighted
             FROM daily_scores
             WHERE day_bucket BETWEEN ?1 AND ?2
               AND (?3 IS NULL OR source = ?3)
               AND (?4 IS NULL OR ticker = ?4)
             ORDER BY day_bucket, source, ticker",
        )
        .bind(from)
        .bind(to)
        .bind(source)
        .bind(ticker)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;

        Ok(rows.into_iter().map(DailyScore::from).collect())
    }

    /// A stored submission with its comments, mentions and stances.
    pub async fn thread(&self, submission_id: &str) -> Result<Option<StoredThread>, CoreError> {
        let Some(row) = sqlx::query_as::<_, SubmissionRow>(
            "SELECT id, pull_run_id, source, created_utc, title, selftext, score, num_comments,
                    permalink, url, incomplete, failed_batches
             FROM submissions WHERE id = ?",
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_error)?
        else {
            return Ok(None);
        };

        let comments = sqlx::query_as::<_, CommentRow>(
            "SELECT id, submission_id, parent_id, depth, author, body, score, permalink, created_utc
             FROM comments WHERE submission_id = ? ORDER BY position",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;

        let mentions = sqlx::query_as::<_, MentionRow>(
            "SELECT target_type, target_id, ticker, confidence, detection, match_kind,
                    span_start, span_end
             FROM mentions
             WHERE (target_type = 'submission' AND target_id = ?1)
                OR (target_type = 'comment' AND target_id IN
                    (SELECT id FROM comments WHERE submission_id = ?1))
             ORDER BY id",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;

        let stances = sqlx::query_as::<_, StanceRowRecord>(
            "SELECT target_type, target_id, ticker, label, stance_score, confidence,
                    classifier_version, context_text
             FROM stances
             WHERE (target_type = 'submission' AND target_id = ?1)
                OR (target_type = 'comment' AND target_id IN
                    (SELECT id FROM comments WHERE submission_id = ?1))
             ORDER BY target_type DESC, target_id, ticker",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;

        Ok(Some(StoredThread {
            submission: row.to_submission(),
            pull_run_id: row.pull_run_id,
            incomplete: row.incomplete,
            failed_batches: row.failed_batches,
            comments: comments.into_iter().map(Comment::from).collect(),
            mentions: mentions
                .into_iter()
                .map(StoredMention::try_from)
                .collect::<Result<_, _>>()?,
            stances: stances
                .into_iter()
                .map(StoredStance::try_from)
                .collect::<Result<_, _>>()?,
        }))
    }

    /// Highest-upvoted stored mentions of `ticker` with `label`.
    pub async fn example_mentions(
        &self,
        ticker: &str,
        label: StanceLabel,
        from: NaiveDate,
        to: NaiveDate,
        source: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ExampleMention>, CoreError> {
        let rows = sqlx::query_as::<_, ExampleRow>(
            "SELECT st.target_type, st.target_id, s.id AS submission_id, st.label,
                    st.stance_score, s.score AS upvotes,
                    trim(s.title || char(10) || s.selftext) AS text, s.permalink AS permalink
             FROM stances st
             JOIN submissions s ON st.target_type = 'submission' AND st.target_id = s.id
             JOIN pull_runs r ON r.id = s.pull_run_id
             WHERE st.ticker = ?1 AND st.label = ?2 AND r.day_bucket BETWEEN ?3 AND ?4
               AND (?5 IS NULL OR r.source = ?5)
             UNION ALL
             SELECT st.target_type, st.target_id, c.submission_id AS submission_id, st.label,
                    st.stance_score, c.score AS upvotes, c.body AS text, c.permalink AS permalink
             FROM stances st
             JOIN comments c ON st.target_type = 'comment' AND st.target_id = c.id
             JOIN submissions s ON s.id = c.submission_id
             JOIN pull_runs r ON r.id = s.pull_run_id
             WHERE st.ticker = ?1 AND st.label = ?2 AND r.day_bucket BETWEEN ?3 AND ?4
               AND (?5 IS NULL OR r.source = ?5)
             ORDER BY upvotes DESC, target_id
             LIMIT ?6",
        )
        .bind(ticker)
        .bind(label.as_str())
        .bind(from)
        .bind(to)
        .bind(source)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;

        rows.into_iter().map(ExampleMention::try_from).collect()
    }

    /// Ids of the comments stored for a submission, in tree order.
    pub async fn comment_ids(&self, submission_id: &str) -> Result<Vec<String>, CoreError> {
        sqlx::query_scalar("SELECT id FROM comments WHERE submission_id = ? ORDER BY position")
            .bind(submission_id)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_error)
    }

    pub async fn count_for_target(&self, target: &TargetRef) -> Result<(i64, i64), CoreError> {
        let mentions: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM mentions WHERE target_type = ? AND target_id = ?",
        )
        .bind(target.target_type.as_str())
        .bind(&target.target_id)
        .fetch_one(&self.pool)
        .await
        .map_err(sql_error)?;

        let stances: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stances WHERE target_type = ? AND target_id = ?",
        )
        .bind(target.target_type.as_str())
        .bind(&target.target_id)
        .fetch_one(&self.pool)
        .await
        .map_err(sql_error)?;

        Ok((mentions, stances))
    }
}

/// Create the directory of a file-backed SQLite url.
fn ensure_parent_dir(url: &str) -> Result<(), CoreError> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

impl TargetAnalysis {
    pub fn new(target: TargetRef) -> Self {
        Self {
            target,
            mentions: Vec::new(),
            stances: Vec::new(),
        }
    }

    pub fn is_submission(&self) -> bool {
        self.target.target_type == TargetType::Submission
    }
}
