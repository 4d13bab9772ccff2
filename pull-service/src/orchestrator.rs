//! Pull jobs: one runner task per job, sources pulled one after another.

use crate::job::{JobPhase, JobStatus, JobTracker, PullJobSnapshot};
use crate::pipeline::{AnalyzedThread, SubmissionPipeline};
use aggregator::{BucketAccumulator, WeightPolicy};
use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use database::Database;
use futures::stream::{self, StreamExt};
use reddit_client::{
    FetcherConfig, ListingRequest, RateGovernor, RateLimitConfig, RedditApiClient,
    RedditTransport, RetryConfig, RetryExecutor, ThreadFetcher,
};
use stance_core::{
    day_bucket, AppConfig, CoreError, ErrorExt, ErrorRecovery, PullCounters, PullRun, PullStatus,
    RecoveryStrategy, Submission,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

const ERROR_SAMPLE_SIZE: usize = 3;

/// Hands out the Reddit transport for a job.
///
/// Called once per job before anything is fetched.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    async fn transport(&self) -> Result<Arc<dyn RedditTransport>, CoreError>;
}

/// Authenticated Reddit API client behind the shared rate governor.
pub struct RedditTransportProvider {
    config: AppConfig,
    governor: Arc<RateGovernor>,
}

impl RedditTransportProvider {
    pub fn new(config: AppConfig) -> Self {
        let governor = Arc::new(RateGovernor::new(RateLimitConfig::from_reddit_config(
            &config.reddit,
        )));
        Self { config, governor }
    }

    pub fn governor(&self) -> Arc<RateGovernor> {
        self.governor.clone()
    }
}

#[async_trait]
impl TransportProvider for RedditTransportProvider {
    async fn transport(&self) -> Result<Arc<dyn RedditTransport>, CoreError> {
        let (client_id, client_secret) = self.config.require_credentials()?;
        let client = RedditApiClient::new(
            &self.config.reddit,
            client_id,
            client_secret,
            self.governor.clone(),
        )?;
        let transport: Arc<dyn RedditTransport> = Arc::new(client);
        Ok(transport)
    }
}

/// What one source produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub source: String,
    pub status: PullStatus,
    pub pull_run_id: Option<i64>,
    pub counters: PullCounters,
    pub note: Option<String>,
}

struct JobEntry {
    rx: watch::Receiver<PullJobSnapshot>,
    cancel: Arc<AtomicBool>,
}

/// Everything a runner task needs.
struct RunContext {
    config: AppConfig,
    timezone: Tz,
    db: Database,
    pipeline: SubmissionPipeline,
    transports: Arc<dyn TransportProvider>,
}

pub struct PullOrchestrator {
    ctx: Arc<RunContext>,
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
}

impl PullOrchestrator {
    pub fn new(
        config: AppConfig,
        db: Database,
        pipeline: SubmissionPipeline,
        transports: Arc<dyn TransportProvider>,
    ) -> Result<Self, CoreError> {
        let timezone = config.timezone()?;
        Ok(Self {
            ctx: Arc::new(RunContext {
                config,
                timezone,
                db,
                pipeline,
                transports,
            }),
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Start a pull of `source`, or of every configured source.
    ///
    /// When a running job already covers a requested source, that job's
    /// snapshot is returned instead of starting another one.
    pub async fn start_pull(&self, source: Option<&str>) -> Result<PullJobSnapshot, CoreError> {
        let sources = match source {
            Some(source) => vec![normalize_source(source)?],
            None => self.ctx.config.pull.sources.clone(),
        };
        if sources.is_empty() {
            return Err(CoreError::InvalidInput {
                message: "no sources configured".to_string(),
            });
        }

        let mut jobs = self.jobs.lock().await;
        self.prune(&mut jobs);

        for entry in jobs.values() {
            let snapshot = entry.rx.borrow();
            if !snapshot.status.is_terminal() && sources.iter().any(|s| snapshot.touches(s)) {
                info!("Coalescing pull of {:?} into running job {}", sources, snapshot.id);
                return Ok(snapshot.clone());
            }
        }

        let (tracker, rx) = JobTracker::new(PullJobSnapshot::queued(sources.clone()));
        let snapshot = tracker.snapshot();
        let cancel = Arc::new(AtomicBool::new(false));
        jobs.insert(
            snapshot.id,
            JobEntry {
                rx,
                cancel: cancel.clone(),
            },
        );

        info!("Starting pull job {} for {:?}", snapshot.id, sources);
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            run_job(ctx, tracker, sources, cancel).await;
        });

        Ok(snapshot)
    }

    pub async fn job_status(&self, id: Uuid) -> Option<PullJobSnapshot> {
        let mut jobs = self.jobs.lock().await;
        self.prune(&mut jobs);
        jobs.get(&id).map(|entry| entry.rx.borrow().clone())
    }

    /// A receiver that observes every state change of job `id`.
    pub async fn subscribe(&self, id: Uuid) -> Option<watch::Receiver<PullJobSnapshot>> {
        self.jobs.lock().await.get(&id).map(|entry| entry.rx.clone())
    }

    /// Request cooperative cancellation; the job stops before its next
    /// submission.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let jobs = self.jobs.lock().await;
        match jobs.get(&id) {
            Some(entry) if !entry.rx.borrow().status.is_terminal() => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub async fn jobs(&self) -> Vec<PullJobSnapshot> {
        let mut jobs = self.jobs.lock().await;
        self.prune(&mut jobs);
        let mut snapshots: Vec<PullJobSnapshot> =
            jobs.values().map(|entry| entry.rx.borrow().clone()).collect();
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    fn prune(&self, jobs: &mut HashMap<Uuid, JobEntry>) {
        let retention = chrono::Duration::seconds(
            i64::try_from(self.ctx.config.pull.job_retention_secs).unwrap_or(i64::MAX / 1000),
        );
        let now = Utc::now();
        jobs.retain(|_, entry| {
            let snapshot = entry.rx.borrow();
            match snapshot.finished_at {
                Some(finished) if snapshot.status.is_terminal() => now - finished <= retention,
                _ => true,
            }
        });
    }
}

fn normalize_source(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim();
    let source = trimmed
        .strip_prefix("r/")
        .or_else(|| trimmed.strip_prefix("/r/"))
        .unwrap_or(trimmed);
    let valid = !source.is_empty()
        && source.len() <= 21
        && source.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(CoreError::InvalidInput {
            message: format!("invalid source '{}'", raw),
        });
    }
    Ok(source.to_string())
}

async fn run_job(
    ctx: Arc<RunContext>,
    tracker: JobTracker,
    sources: Vec<String>,
    cancel: Arc<AtomicBool>,
) {
    tracker.start();
    let job_id = tracker.snapshot().id;

    let transport = match ctx.transports.transport().await {
        Ok(transport) => transport,
        Err(e) => {
            error!("Pull job {} cannot start: {}", job_id, e);
            tracker.finish(JobStatus::Failed, Some(e.user_friendly_message()));
            return;
        }
    };
    let fetcher = ThreadFetcher::new(
        transport,
        RetryExecutor::new(RetryConfig::from_reddit_config(&ctx.config.reddit)),
        FetcherConfig::from_reddit_config(&ctx.config.reddit),
    );
    let pause = Duration::from_millis(ctx.config.pull.source_pause_ms);

    let mut succeeded = 0;
    let mut failed = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        if index > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        fetcher.reset_run_cache().await;
        tracker.begin_source(source);
        let outcome = run_source(&ctx, &fetcher, &tracker, source, &cancel).await;
        tracker.update_source(|p| {
            p.status = outcome.status;
            p.pull_run_id = outcome.pull_run_id;
            p.counters = outcome.counters;
            p.note = outcome.note.clone();
        });
        tracker.skip_remaining_steps(index);

        if outcome.status == PullStatus::Failed {
            failed.push(format!(
                "r/{}: {}",
                source,
                outcome.note.as_deref().unwrap_or("failed")
            ));
        } else {
            succeeded += 1;
        }
    }

    let cancelled = cancel.load(Ordering::SeqCst);
    let status = JobStatus::from_sources(succeeded, failed.len());
    let mut problems = failed;
    if cancelled {
        tracker.request_cancel();
        problems.push("cancelled".to_string());
    }
    let error = (!problems.is_empty()).then(|| problems.join("; "));

    info!(
        "Pull job {} finished: {:?} ({} of {} sources succeeded)",
        job_id,
        status,
        succeeded,
        sources.len()
    );
    tracker.finish(status, error);
}

/// List, analyze, persist and aggregate one source under its own PullRun.
async fn run_source(
    ctx: &RunContext,
    fetcher: &ThreadFetcher,
    tracker: &JobTracker,
    source: &str,
    cancel: &AtomicBool,
) -> SourceOutcome {
    let pull = &ctx.config.pull;
    let pulled_at = Utc::now();
    let day = day_bucket(pulled_at, ctx.timezone);
    let run = PullRun {
        id: None,
        source: source.to_string(),
        pulled_at,
        day_bucket: day,
        sort: pull.sort,
        window: pull.window,
        limit: pull.page_limit,
        status: PullStatus::Running,
        note: None,
        counters: PullCounters::default(),
    };
    let mut outcome = SourceOutcome {
        source: source.to_string(),
        status: PullStatus::Failed,
        pull_run_id: None,
        counters: PullCounters::default(),
        note: None,
    };

    let run_id = match ctx.db.insert_pull_run(&run).await {
        Ok(id) => id,
        Err(e) => {
            error!("Cannot record pull run for r/{}: {}", source, e);
            outcome.note = Some(e.to_string());
            return outcome;
        }
    };
    outcome.pull_run_id = Some(run_id);
    tracker.update_source(|p| p.pull_run_id = Some(run_id));

    // Listing
    let request = ListingRequest {
        source: source.to_string(),
        sort: pull.sort,
        window: pull.window,
        page_limit: pull.page_limit,
        max_pages: pull.max_pages,
    };
    let listing = match fetcher.list_threads(&request).await {
        Ok(listing) => listing,
        Err(e) => {
            warn!("Listing r/{} failed: {}", source, e);
            outcome.note = Some(format!("listing failed: {}", e));
            finish_run(ctx, run_id, &outcome).await;
            return outcome;
        }
    };
    let submissions = listing.submissions;
    tracker.update_source(|p| p.submissions_total = Some(submissions.len()));
    tracker.complete_step();
    info!(
        "r/{}: {} submissions listed over {} pages",
        source,
        submissions.len(),
        listing.pages_fetched
    );

    // Processing
    tracker.set_phase(JobPhase::Processing);
    let mut accumulator = BucketAccumulator::new(
        day,
        source,
        WeightPolicy::from_config(&ctx.config.aggregation),
    );
    let mut failures: Vec<String> = Vec::new();
    let mut processed_ok = 0usize;

    let concurrency = pull.analysis_concurrency.max(1);
    let mut results = stream::iter(submissions.iter().cloned().map(|listed| async move {
        if cancel.load(Ordering::SeqCst) {
            return None;
        }
        let analyzed = ctx.pipeline.analyze(fetcher, &listed).await;
        Some((listed, analyzed))
    }))
    .buffer_unordered(concurrency);

    while let Some(result) = results.next().await {
        let Some((listed, analyzed)) = result else {
            continue;
        };
        match persist(ctx, run_id, analyzed).await {
            Ok(thread) => {
                processed_ok += 1;
                for (ticker, row) in &thread.rows {
                    // Rejected rows are logged and counted by the accumulator.
                    let _ = accumulator.fold(ticker, row);
                }
                outcome.counters.submissions += 1;
                outcome.counters.comments += thread.comments.len() as i64;
                outcome.counters.mentions += thread
                    .analyses
                    .iter()
                    .map(|a| a.mentions.len() as i64)
                    .sum::<i64>();
                outcome.counters.stance_rows += thread.rows.len() as i64;
            }
            Err(e) => {
                log_submission_failure(source, &listed, &e);
                failures.push(format!("{}: {}", listed.id, e));
            }
        }
        let counters = outcome.counters;
        let failure_count = failures.len();
        tracker.update_source(|p| {
            p.submissions_processed += 1;
            p.submission_failures = failure_count;
            p.counters = counters;
        });
    }
    drop(results);
    tracker.complete_step();

    // Aggregating
    tracker.set_phase(JobPhase::Aggregating);
    if let Err(e) = aggregate(ctx, run_id, accumulator).await {
        error!("Aggregation of r/{} {} failed: {}", source, day, e);
        failures.push(format!("aggregation: {}", e));
        outcome.note = partial_errors_note(&failures);
        finish_run(ctx, run_id, &outcome).await;
        return outcome;
    }
    tracker.complete_step();

    // Finalizing
    tracker.set_phase(JobPhase::Finalizing);
    let all_failed = !submissions.is_empty() && processed_ok == 0 && !failures.is_empty();
    outcome.status = if all_failed {
        PullStatus::Failed
    } else {
        PullStatus::Success
    };
    outcome.note = partial_errors_note(&failures);
    if cancel.load(Ordering::SeqCst) {
        let note = outcome.note.take();
        outcome.note = Some(match note {
            Some(note) => format!("{}; cancelled", note),
            None => "cancelled".to_string(),
        });
    }
    finish_run(ctx, run_id, &outcome).await;
    tracker.complete_step();

    info!(
        "r/{} done: {:?}, {} submissions, {} stance rows, {} failures",
        source,
        outcome.status,
        outcome.counters.submissions,
        outcome.counters.stance_rows,
        failures.len()
    );
    outcome
}

async fn persist(
    ctx: &RunContext,
    run_id: i64,
    analyzed: Result<AnalyzedThread, CoreError>,
) -> Result<AnalyzedThread, CoreError> {
    let thread = analyzed?;
    {
        let record = thread.record(run_id);
        with_recovery("saving thread", || ctx.db.save_thread(&record)).await?;
    }
    Ok(thread)
}

/// Merge this run's statistics with the untouched rows of the same bucket
/// and replace the bucket's DailyScore rows.
async fn aggregate(
    ctx: &RunContext,
    run_id: i64,
    mut accumulator: BucketAccumulator,
) -> Result<(), CoreError> {
    let day = accumulator.day();
    let source = accumulator.source().to_string();

    let mut untouched = BucketAccumulator::new(
        day,
        source.clone(),
        WeightPolicy::from_config(&ctx.config.aggregation),
    );
    for (ticker, row) in ctx.db.bucket_stance_rows(day, &source, Some(run_id)).await? {
        let _ = untouched.fold(&ticker, &row);
    }
    accumulator.merge(&untouched);

    let scores = accumulator.into_scores();
    with_recovery("replacing daily scores", || {
        ctx.db.replace_daily_scores(day, &source, &scores)
    })
    .await?;
    info!("r/{} {}: {} tickers aggregated", source, day, scores.len());
    Ok(())
}

async fn finish_run(ctx: &RunContext, run_id: i64, outcome: &SourceOutcome) {
    if let Err(e) = ctx
        .db
        .finish_pull_run(run_id, outcome.status, outcome.note.as_deref(), &outcome.counters)
        .await
    {
        error!("Cannot finalize pull run {}: {}", run_id, e);
    }
}

/// Run `op` again while its error maps to a backoff strategy.
async fn with_recovery<T, F, Fut>(what: &str, mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 1;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        match ErrorRecovery::determine_strategy(&error) {
            RecoveryStrategy::RetryWithBackoff {
                max_attempts,
                initial_delay,
                max_delay,
            } if attempt < max_attempts => {
                let factor = 2u32.saturating_pow(u32::try_from(attempt - 1).unwrap_or(u32::MAX));
                let delay = initial_delay.saturating_mul(factor).min(max_delay);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what, attempt, max_attempts, delay, error
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            _ => return Err(error),
        }
    }
}

fn log_submission_failure(source: &str, submission: &Submission, e: &CoreError) {
    match ErrorRecovery::determine_strategy(e) {
        RecoveryStrategy::Fail => error!(
            "Submission {} in r/{} failed [{}]: {}",
            submission.id,
            source,
            e.error_code(),
            e
        ),
        _ => warn!(
            "Skipping submission {} in r/{} [{}]: {}",
            submission.id,
            source,
            e.error_code(),
            e
        ),
    }
}

/// `partial errors: N; sample: a | b | c`, or nothing when all went well.
pub fn partial_errors_note(failures: &[String]) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    let sample: Vec<&str> = failures
        .iter()
        .take(ERROR_SAMPLE_SIZE)
        .map(String::as_str)
        .collect();
    Some(format!(
        "partial errors: {}; sample: {}",
        failures.len(),
        sample.join(" | ")
    ))
}
