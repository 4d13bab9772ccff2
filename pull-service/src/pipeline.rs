//! Per-submission analysis: fetch, tree, mentions, stances.

use aggregator::StanceRow;
use database::{TargetAnalysis, ThreadRecord};
use mention_extractor::{merge_per_ticker, MentionExtractor};
use reddit_client::{tree, ThreadFetcher};
use stance_classifier::{build_context, ClassifyRequest, ContextParts, StanceClassifier};
use stance_core::{Comment, CoreError, Submission, TargetRef, TargetType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A submission ready to persist and fold.
#[derive(Debug, Clone)]
pub struct AnalyzedThread {
    pub submission: Submission,
    pub comments: Vec<Comment>,
    pub incomplete: bool,
    pub failed_batches: usize,
    pub analyses: Vec<TargetAnalysis>,
    /// Ticker and weighting inputs of every stance, for the run accumulator.
    pub rows: Vec<(String, StanceRow)>,
}

impl AnalyzedThread {
    pub fn record(&self, pull_run_id: i64) -> ThreadRecord<'_> {
        ThreadRecord {
            pull_run_id,
            submission: &self.submission,
            comments: &self.comments,
            incomplete: self.incomplete,
            failed_batches: self.failed_batches,
            analyses: &self.analyses,
        }
    }
}

#[derive(Clone)]
pub struct SubmissionPipeline {
    extractor: Arc<MentionExtractor>,
    classifier: Arc<dyn StanceClassifier>,
}

impl SubmissionPipeline {
    pub fn new(extractor: Arc<MentionExtractor>, classifier: Arc<dyn StanceClassifier>) -> Self {
        Self {
            extractor,
            classifier,
        }
    }

    pub async fn analyze(
        &self,
        fetcher: &ThreadFetcher,
        listed: &Submission,
    ) -> Result<AnalyzedThread, CoreError> {
        let fetched = fetcher.fetch_thread(listed).await?;
        let mut submission = fetched.submission.clone().unwrap_or_else(|| listed.clone());
        if submission.source.is_empty() {
            submission.source = listed.source.clone();
        }

        let built = tree::build(&submission.id, &fetched.forest);
        let comments = built.comments;
        debug!(
            "Submission {}: {} comments, {} batches ({} failed)",
            submission.id,
            comments.len(),
            fetched.batches,
            fetched.failed_batches
        );

        let mut analyses = Vec::with_capacity(comments.len() + 1);
        let mut rows = Vec::new();

        let body = format!("{}\n{}", submission.title, submission.selftext);
        let unit = self
            .analyze_unit(
                TargetRef::submission(submission.id.clone()),
                &body,
                ContextParts::submission(&submission.title, &submission.selftext, &body),
            )
            .await;
        push_rows(&unit, submission.score, 0, &mut rows);
        analyses.push(unit);

        let by_id: HashMap<&str, &Comment> = comments.iter().map(|c| (c.id.as_str(), c)).collect();
        for comment in &comments {
            let parent = comment
                .parent_id
                .as_deref()
                .and_then(|id| by_id.get(id))
                .map(|parent| parent.body.as_str())
                .unwrap_or("");
            let unit = self
                .analyze_unit(
                    TargetRef::comment(comment.id.clone()),
                    &comment.body,
                    ContextParts::comment(
                        &submission.title,
                        &submission.selftext,
                        parent,
                        &comment.body,
                    ),
                )
                .await;
            push_rows(&unit, comment.score, comment.depth, &mut rows);
            analyses.push(unit);
        }

        analyses.retain(|unit| !unit.mentions.is_empty());

        Ok(AnalyzedThread {
            submission,
            comments,
            incomplete: fetched.incomplete,
            failed_batches: fetched.failed_batches,
            analyses,
            rows,
        })
    }

    async fn analyze_unit(
        &self,
        target: TargetRef,
        text: &str,
        parts: ContextParts<'_>,
    ) -> TargetAnalysis {
        let mentions = self
            .extractor
            .extract_for(target.target_type, text, parts.title, parts.parent);
        let mut analysis = TargetAnalysis::new(target);
        if mentions.is_empty() {
            return analysis;
        }

        let context = build_context(&parts);
        for mention in merge_per_ticker(&mentions) {
            let stance = self
                .classifier
                .classify(&ClassifyRequest {
                    mention: &mention,
                    context: &context,
                    text,
                })
                .await;
            analysis.stances.push(stance);
        }
        analysis.mentions = mentions;
        analysis
    }
}

fn push_rows(unit: &TargetAnalysis, upvotes: i64, depth: u32, rows: &mut Vec<(String, StanceRow)>) {
    let depth = if unit.target.target_type == TargetType::Submission {
        0
    } else {
        depth
    };
    for stance in &unit.stances {
        rows.push((
            stance.ticker.clone(),
            StanceRow {
                label: stance.label,
                score: stance.stance_score,
                confidence: stance.confidence,
                upvotes,
                depth,
            },
        ));
    }
}
