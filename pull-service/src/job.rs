//! Pull job state.
//!
//! The runner task owns a [`JobTracker`] and is the only writer; everyone
//! else reads immutable [`PullJobSnapshot`]s from a `watch` channel.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use stance_core::{PullCounters, PullStatus};
use tokio::sync::watch;
use uuid::Uuid;

/// Phases run once per source.
pub const PHASES_PER_SOURCE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    PartialSuccess,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::PartialSuccess | JobStatus::Failed
        )
    }

    /// Overall status from the per-source outcomes.
    pub fn from_sources(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, _) => JobStatus::Failed,
            (_, 0) => JobStatus::Success,
            _ => JobStatus::PartialSuccess,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Listing,
    Processing,
    Aggregating,
    Finalizing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceProgress {
    pub source: String,
    pub status: PullStatus,
    pub pull_run_id: Option<i64>,
    /// Unknown until the listing returns.
    pub submissions_total: Option<usize>,
    pub submissions_processed: usize,
    pub submission_failures: usize,
    pub counters: PullCounters,
    pub note: Option<String>,
}

impl SourceProgress {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            status: PullStatus::Running,
            pull_run_id: None,
            submissions_total: None,
            submissions_processed: 0,
            submission_failures: 0,
            counters: PullCounters::default(),
            note: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullJobSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub sources: Vec<String>,
    pub current_source: Option<String>,
    pub source_progress: Vec<SourceProgress>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub heartbeat_at: DateTime<Utc>,
    pub cancel_requested: bool,
    pub error: Option<String>,
}

impl PullJobSnapshot {
    pub fn queued(sources: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            phase: JobPhase::Queued,
            total_steps: sources.len() * PHASES_PER_SOURCE,
            sources,
            current_source: None,
            source_progress: Vec::new(),
            completed_steps: 0,
            created_at: now,
            started_at: None,
            finished_at: None,
            heartbeat_at: now,
            cancel_requested: false,
            error: None,
        }
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.total_steps == 0 {
            return if self.status.is_terminal() { 1.0 } else { 0.0 };
        }
        (self.completed_steps as f64 / self.total_steps as f64).min(1.0)
    }

    /// processed/total for the source being worked on; `None` while the
    /// total is unknown.
    pub fn current_source_fraction(&self) -> Option<f64> {
        let current = self.current_source.as_deref()?;
        let progress = self
            .source_progress
            .iter()
            .rev()
            .find(|p| p.source == current)?;
        match progress.submissions_total? {
            0 => Some(1.0),
            total => Some((progress.submissions_processed as f64 / total as f64).min(1.0)),
        }
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.heartbeat_at
    }

    /// A job that is still running but has not reported for longer than
    /// `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        !self.status.is_terminal() && self.heartbeat_age(now) > threshold
    }

    pub fn touches(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s.eq_ignore_ascii_case(source))
    }
}

/// Single writer of one job's state.
pub struct JobTracker {
    tx: watch::Sender<PullJobSnapshot>,
}

impl JobTracker {
    pub fn new(snapshot: PullJobSnapshot) -> (Self, watch::Receiver<PullJobSnapshot>) {
        let (tx, rx) = watch::channel(snapshot);
        (Self { tx }, rx)
    }

    pub fn snapshot(&self) -> PullJobSnapshot {
        self.tx.borrow().clone()
    }

    fn update(&self, change: impl FnOnce(&mut PullJobSnapshot)) {
        self.tx.send_modify(|snapshot| {
            change(snapshot);
            snapshot.heartbeat_at = Utc::now();
        });
    }

    pub fn start(&self) {
        self.update(|s| {
            s.status = JobStatus::Running;
            s.started_at = Some(Utc::now());
        });
    }

    pub fn begin_source(&self, source: &str) {
        self.update(|s| {
            s.current_source = Some(source.to_string());
            s.phase = JobPhase::Listing;
            s.source_progress.push(SourceProgress::new(source));
        });
    }

    pub fn set_phase(&self, phase: JobPhase) {
        self.update(|s| s.phase = phase);
    }

    /// Mark one phase of the current source complete.
    pub fn complete_step(&self) {
        self.update(|s| s.completed_steps = (s.completed_steps + 1).min(s.total_steps));
    }

    /// Fast-forward past the phases a source will not run.
    pub fn skip_remaining_steps(&self, source_index: usize) {
        self.update(|s| {
            let target = ((source_index + 1) * PHASES_PER_SOURCE).min(s.total_steps);
            s.completed_steps = s.completed_steps.max(target);
        });
    }

    pub fn update_source(&self, change: impl FnOnce(&mut SourceProgress)) {
        self.update(|s| {
            if let Some(progress) = s.source_progress.last_mut() {
                change(progress);
            }
        });
    }

    pub fn request_cancel(&self) {
        self.update(|s| s.cancel_requested = true);
    }

    pub fn finish(&self, status: JobStatus, error: Option<String>) {
        self.update(|s| {
            s.status = status;
            s.phase = JobPhase::Done;
            s.current_source = None;
            s.finished_at = Some(Utc::now());
            s.error = error;
            if status != JobStatus::Failed {
                s.completed_steps = s.total_steps;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<String> {
        vec!["stocks".to_string(), "investing".to_string()]
    }

    #[test]
    fn test_job_status_from_sources() {
        assert_eq!(JobStatus::from_sources(2, 0), JobStatus::Success);
        assert_eq!(JobStatus::from_sources(1, 1), JobStatus::PartialSuccess);
        assert_eq!(JobStatus::from_sources(0, 2), JobStatus::Failed);
        assert_eq!(JobStatus::from_sources(0, 0), JobStatus::Failed);
    }

    #[test]
    fn test_progress_is_monotonic_and_bounded() {
        let (tracker, rx) = JobTracker::new(PullJobSnapshot::queued(sources()));
        assert_eq!(rx.borrow().total_steps, 8);

        tracker.start();
        tracker.begin_source("stocks");
        tracker.complete_step();
        tracker.complete_step();
        assert_eq!(rx.borrow().progress_fraction(), 0.25);

        tracker.skip_remaining_steps(0);
        assert_eq!(rx.borrow().completed_steps, 4);
        tracker.skip_remaining_steps(0);
        assert_eq!(rx.borrow().completed_steps, 4);

        for _ in 0..10 {
            tracker.complete_step();
        }
        assert_eq!(rx.borrow().completed_steps, 8);
    }

    #[test]
    fn test_current_source_fraction_unknown_until_listed() {
        let (tracker, rx) = JobTracker::new(PullJobSnapshot::queued(sources()));
        tracker.begin_source("stocks");
        assert_eq!(rx.borrow().current_source_fraction(), None);

        tracker.update_source(|p| {
            p.submissions_total = Some(4);
            p.submissions_processed = 1;
        });
        assert_eq!(rx.borrow().current_source_fraction(), Some(0.25));
    }

    #[test]
    fn test_staleness_is_an_observation() {
        let (tracker, rx) = JobTracker::new(PullJobSnapshot::queued(sources()));
        tracker.start();
        let snapshot = rx.borrow().clone();
        let later = snapshot.heartbeat_at + Duration::seconds(300);

        assert!(snapshot.is_stale(later, Duration::seconds(120)));
        assert!(!snapshot.is_stale(later, Duration::seconds(600)));
        assert_eq!(rx.borrow().status, JobStatus::Running);

        tracker.finish(JobStatus::Success, None);
        assert!(!rx.borrow().is_stale(later, Duration::seconds(120)));
        assert_eq!(rx.borrow().progress_fraction(), 1.0);
    }
}
