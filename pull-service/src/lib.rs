//! Pull orchestration and the read/trigger surface.
//!
//! [`PullService`] wires the Reddit client, mention extractor, stance
//! classifier, aggregator and database together. Pulls run as background
//! jobs; results are read from the stored daily scores.

pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod query;

pub use job::{JobPhase, JobStatus, PullJobSnapshot, SourceProgress};
pub use orchestrator::{
    partial_errors_note, PullOrchestrator, RedditTransportProvider, SourceOutcome,
    TransportProvider,
};
pub use pipeline::{AnalyzedThread, SubmissionPipeline};
pub use query::{
    AnalyticsView, ResultsReader, ResultsView, ResultsWindow, SeriesPoint, TickerResult,
    TickerSeries,
};

use chrono::NaiveDate;
use database::{Database, StoredThread};
use mention_extractor::MentionExtractor;
use stance_core::{AppConfig, CoreError, PullRun};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

pub struct PullService {
    orchestrator: PullOrchestrator,
    reader: ResultsReader,
}

impl PullService {
    /// Open the database and build the production stack from `config`.
    ///
    /// Reddit credentials are checked when a pull starts, not here.
    pub async fn from_config(config: AppConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let db = Database::open(&config.database.url).await?;
        let extractor = Arc::new(MentionExtractor::from_config(&config.extraction)?);
        let classifier = stance_classifier::build_classifier(&config.classifier)?;
        let transports = Arc::new(RedditTransportProvider::new(config.clone()));

        info!("Pull service ready for {:?}", config.pull.sources);
        Self::with_parts(
            config,
            db,
            SubmissionPipeline::new(extractor, classifier),
            transports,
        )
    }

    pub fn with_parts(
        config: AppConfig,
        db: Database,
        pipeline: SubmissionPipeline,
        transports: Arc<dyn TransportProvider>,
    ) -> Result<Self, CoreError> {
        let reader = ResultsReader::new(db.clone());
        let orchestrator = PullOrchestrator::new(config, db, pipeline, transports)?;
        Ok(Self {
            orchestrator,
            reader,
        })
    }

    pub async fn start_pull(&self, source: Option<&str>) -> Result<PullJobSnapshot, CoreError> {
        self.orchestrator.start_pull(source).await
    }

    pub async fn job_status(&self, job_id: Uuid) -> Option<PullJobSnapshot> {
        self.orchestrator.job_status(job_id).await
    }

    pub async fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<PullJobSnapshot>> {
        self.orchestrator.subscribe(job_id).await
    }

    pub async fn cancel(&self, job_id: Uuid) -> bool {
        self.orchestrator.cancel(job_id).await
    }

    pub async fn jobs(&self) -> Vec<PullJobSnapshot> {
        self.orchestrator.jobs().await
    }

    pub async fn results(
        &self,
        day: NaiveDate,
        window: ResultsWindow,
        source: Option<&str>,
    ) -> ResultsView {
        self.reader.results(day, window, source).await
    }

    pub async fn ticker_series(
        &self,
        ticker: &str,
        to: NaiveDate,
        days: u32,
        source: Option<&str>,
    ) -> TickerSeries {
        self.reader.ticker_series(ticker, to, days, source).await
    }

    pub async fn analytics(&self, to: NaiveDate, days: u32, source: Option<&str>) -> AnalyticsView {
        self.reader.analytics(to, days, source).await
    }

    pub async fn thread(&self, submission_id: &str) -> Option<StoredThread> {
        self.reader.thread(submission_id).await
    }

    pub async fn pull_runs(&self, day: Option<NaiveDate>, source: Option<&str>) -> Vec<PullRun> {
        self.reader.pull_runs(day, source).await
    }
}
