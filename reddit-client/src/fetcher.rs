use crate::api::RedditTransport;
use crate::retry::RetryExecutor;
use crate::tree::{collect_comment_ids, collect_placeholders};
use crate::wire::{self, RawNode};
use serde_json::Value;
use stance_core::{CoreError, ListingSort, RedditConfig, Submission, TimeWindow};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub thread_limit: u32,
    pub thread_depth: u32,
    pub batch_size: usize,
    /// 0 means unbounded.
    pub max_batches: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self::from_reddit_config(&RedditConfig::default())
    }
}

impl FetcherConfig {
    pub fn from_reddit_config(config: &RedditConfig) -> Self {
        Self {
            thread_limit: config.thread_limit,
            thread_depth: config.thread_depth,
            batch_size: config.morechildren_batch_size.max(1),
            max_batches: config.morechildren_max_batches,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListingRequest {
    pub source: String,
    pub sort: ListingSort,
    pub window: TimeWindow,
    pub page_limit: u32,
    pub max_pages: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ListingResult {
    pub submissions: Vec<Submission>,
    pub pages_fetched: u32,
    /// A later page failed and the listing stops at the pages already read.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RawThread {
    /// Full submission from the thread payload, when present.
    pub submission: Option<Submission>,
    pub forest: Vec<RawNode>,
}

/// A thread with placeholders resolved as far as the batch budget allowed.
#[derive(Debug, Clone, Default)]
pub struct FetchedThread {
    pub submission: Option<Submission>,
    pub forest: Vec<RawNode>,
    pub batches: usize,
    pub failed_batches: usize,
    pub incomplete: bool,
}

pub struct ThreadFetcher {
    transport: Arc<dyn RedditTransport>,
    retry: RetryExecutor,
    config: FetcherConfig,
    cache: Mutex<HashMap<String, Value>>,
}

impl ThreadFetcher {
    pub fn new(transport: Arc<dyn RedditTransport>, retry: RetryExecutor, config: FetcherConfig) -> Self {
        Self {
            transport,
            retry,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Forget cached payloads; call between runs.
    pub async fn reset_run_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn get(&self, operation: &str, endpoint: &str, query: Vec<(String, String)>) -> Result<Value, CoreError> {
        let key = self.transport.request_url(endpoint, &query);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!("Run cache hit for {}", key);
            return Ok(hit.clone());
        }

        let transport = self.transport.clone();
        let payload = self
            .retry
            .execute(operation, || {
                let transport = transport.clone();
                let query = query.clone();
                async move { transport.get_json(endpoint, &query).await }
            })
            .await?;

        self.cache.lock().await.insert(key, payload.clone());
        Ok(payload)
    }

    pub async fn list_threads(&self, request: &ListingRequest) -> Result<ListingResult, CoreError> {
        let endpoint = format!("/r/{}/{}", request.source, request.sort.as_str());
        let page_limit = request.page_limit.clamp(1, 100);
        let max_pages = request.max_pages.max(1);

        let mut result = ListingResult::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut after: Option<String> = None;

        for page in 0..max_pages {
            let mut query = vec![
                ("limit".to_string(), page_limit.to_string()),
                ("raw_json".to_string(), "1".to_string()),
            ];
            if request.sort.takes_window() {
                query.push(("t".to_string(), request.window.as_str().to_string()));
            }
            if let Some(cursor) = &after {
                query.push(("after".to_string(), cursor.clone()));
            }

            let operation = format!("listing r/{} page {}", request.source, page + 1);
            let payload = match self.get(&operation, &endpoint, query).await {
                Ok(payload) => payload,
                Err(e) if result.pages_fetched > 0 => {
                    warn!(
                        "Listing r/{} truncated after {} pages: {}",
                        request.source, result.pages_fetched, e
                    );
                    result.truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            let (submissions, next) = wire::parse_listing(payload, &request.source)?;
            result.pages_fetched += 1;
            for submission in submissions {
                if seen.insert(submission.id.clone()) {
                    result.submissions.push(submission);
                }
            }

            match next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        info!(
            "Listed {} submissions from r/{} ({} pages)",
            result.submissions.len(),
            request.source,
            result.pages_fetched
        );
        Ok(result)
    }

    pub async fn fetch_comments(&self, submission_id: &str, source: &str) -> Result<RawThread, CoreError> {
        let endpoint = format!("/comments/{}", submission_id);
        let query = vec![
            ("limit".to_string(), self.config.thread_limit.to_string()),
            ("depth".to_string(), self.config.thread_depth.to_string()),
            ("raw_json".to_string(), "1".to_string()),
        ];

        let payload = self
            .get(&format!("comments {}", submission_id), &endpoint, query)
            .await?;
        let (submission, forest) = wire::parse_thread(payload, source)?;
        Ok(RawThread { submission, forest })
    }

    /// Resolve one batch of placeholder ids. Fragments come back flat.
    pub async fn expand_placeholders(
        &self,
        submission_id: &str,
        placeholder_ids: &[String],
    ) -> Result<Vec<RawNode>, CoreError> {
        if placeholder_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = vec![
            ("api_type".to_string(), "json".to_string()),
            ("link_id".to_string(), format!("t3_{}", submission_id)),
            ("children".to_string(), placeholder_ids.join(",")),
            ("limit_children".to_string(), "false".to_string()),
            ("raw_json".to_string(), "1".to_string()),
        ];

        let payload = self
            .get(
                &format!("morechildren {} ({} ids)", submission_id, placeholder_ids.len()),
                "/api/morechildren",
                query,
            )
            .await?;
        wire::parse_morechildren(&payload)
    }

    /// Comments of `submission` with placeholders expanded in batches.
    ///
    /// A failing batch is counted and skipped; the thread is then marked
    /// incomplete, as it is when the batch cap leaves ids unresolved.
    pub async fn fetch_thread(&self, submission: &Submission) -> Result<FetchedThread, CoreError> {
        let RawThread {
            submission: full_submission,
            mut forest,
        } = self.fetch_comments(&submission.id, &submission.source).await?;

        let mut known = collect_comment_ids(&forest);
        let mut requested: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        enqueue_placeholders(&forest, &known, &mut requested, &mut queue);

        let mut thread = FetchedThread {
            submission: full_submission,
            ..Default::default()
        };
        let unbounded = self.config.max_batches == 0;

        while !queue.is_empty() && (unbounded || thread.batches < self.config.max_batches) {
            let take = self.config.batch_size.min(queue.len());
            let batch: Vec<String> = queue.drain(..take).collect();
            thread.batches += 1;

            match self.expand_placeholders(&submission.id, &batch).await {
                Ok(fragments) => {
                    known.extend(collect_comment_ids(&fragments));
                    enqueue_placeholders(&fragments, &known, &mut requested, &mut queue);
                    forest.extend(fragments);
                }
                Err(e) => {
                    thread.failed_batches += 1;
                    warn!(
                        "Placeholder batch {} for submission {} failed: {}",
                        thread.batches, submission.id, e
                    );
                }
            }
        }

        if !queue.is_empty() {
            debug!(
                "Batch cap reached for submission {} with {} ids unresolved",
                submission.id,
                queue.len()
            );
        }
        thread.incomplete = thread.failed_batches > 0 || !queue.is_empty();
        thread.forest = forest;
        Ok(thread)
    }
}

fn enqueue_placeholders(
    nodes: &[RawNode],
    known: &HashSet<String>,
    requested: &mut HashSet<String>,
    queue: &mut VecDeque<String>,
) {
    for placeholder in collect_placeholders(nodes) {
        for child in &placeholder.children {
            if known.contains(child) || !requested.insert(child.clone()) {
                continue;
            }
            queue.push_back(child.clone());
        }
    }
}
