use serde::{Deserialize, Serialize};
use stance_core::{CoreError, RedditConfig};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_concurrency: usize,
    pub max_requests: u32,
    pub time_window: Duration,
    pub min_interval: Duration,
}

impl RateLimitConfig {
    pub fn reddit_oauth() -> Self {
        Self {
            max_concurrency: 1,
            max_requests: 90,
            time_window: Duration::from_secs(60),
            min_interval: Duration::from_millis(700),
        }
    }

    pub fn from_reddit_config(config: &RedditConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            max_requests: config.requests_per_minute.max(1),
            time_window: Duration::from_secs(60),
            min_interval: config.min_request_interval(),
        }
    }
}

/// Rolling record of request start times.
#[derive(Debug)]
struct WindowTracker {
    window_duration: Duration,
    starts: VecDeque<Instant>,
}

impl WindowTracker {
    fn new(window_duration: Duration) -> Self {
        Self {
            window_duration,
            starts: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.starts.front() {
            if now.saturating_duration_since(*oldest) >= self.window_duration {
                self.starts.pop_front();
            } else {
                break;
            }
        }
    }

    fn len(&self) -> usize {
        self.starts.len()
    }

    /// When the oldest tracked start leaves the window.
    fn next_slot(&self) -> Option<Instant> {
        self.starts
            .front()
            .map(|oldest| *oldest + self.window_duration)
    }

    fn record(&mut self, at: Instant) {
        self.starts.push_back(at);
    }
}

#[derive(Debug)]
struct GovernorState {
    window: WindowTracker,
    last_request_at: Option<Instant>,
    pause_until: Option<Instant>,
    rate_limited_count: u64,
}

/// Process-wide gate for outbound Reddit requests.
///
/// Combines a concurrency cap, a sliding requests-per-window ceiling, a
/// minimum spacing between request starts and a global pause driven by
/// server `Retry-After` hints. Share it as `Arc<RateGovernor>`.
#[derive(Debug)]
pub struct RateGovernor {
    semaphore: Arc<Semaphore>,
    config: RateLimitConfig,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    pub fn new(config: RateLimitConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let state = Mutex::new(GovernorState {
            window: WindowTracker::new(config.time_window),
            last_request_at: None,
            pause_until: None,
            rate_limited_count: 0,
        });

        Self {
            semaphore,
            config,
            state,
        }
    }

    /// Wait until a request may start. The permit is released on drop.
    pub async fn acquire(&self) -> Result<GovernorPermit, CoreError> {
        let start_time = Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal {
                message: "rate governor semaphore closed".to_string(),
            })?;

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.window.prune(now);

                let mut ready_at = now;
                if let Some(pause_until) = state.pause_until {
                    ready_at = ready_at.max(pause_until);
                }
                if let Some(last) = state.last_request_at {
                    ready_at = ready_at.max(last + self.config.min_interval);
                }
                if state.window.len() >= self.config.max_requests as usize {
                    if let Some(slot) = state.window.next_slot() {
                        ready_at = ready_at.max(slot);
                    }
                }

                if ready_at <= now {
                    state.window.record(now);
                    state.last_request_at = Some(now);
                    None
                } else {
                    Some(ready_at - now)
                }
            };

            match wait {
                None => break,
                Some(wait_time) => {
                    debug!("Rate governor holding request for {:?}", wait_time);
                    sleep(wait_time).await;
                }
            }
        }

        Ok(GovernorPermit {
            _permit: permit,
            queue_wait_time: start_time.elapsed(),
        })
    }

    /// Explicit form of dropping the permit.
    pub fn release(&self, permit: GovernorPermit) {
        drop(permit);
    }

    /// Feed back the outcome of a request. A 429 with `retry_after` pauses
    /// every caller until that instant; an existing longer pause is kept.
    pub async fn record_response(&self, status: u16, retry_after: Option<Duration>) {
        if status != 429 {
            return;
        }

        let mut state = self.state.lock().await;
        state.rate_limited_count += 1;

        if let Some(delay) = retry_after {
            let candidate = Instant::now() + delay;
            let extended = match state.pause_until {
                Some(existing) if existing >= candidate => false,
                _ => {
                    state.pause_until = Some(candidate);
                    true
                }
            };
            if extended {
                warn!("Reddit rate limit hit, pausing all requests for {:?}", delay);
            }
        }
    }

    pub async fn status(&self) -> GovernorStatus {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.window.prune(now);

        let paused_for = state
            .pause_until
            .filter(|until| *until > now)
            .map(|until| until - now);

        GovernorStatus {
            available_permits: self.semaphore.available_permits(),
            max_permits: self.config.max_concurrency,
            requests_per_minute: self.config.max_requests,
            current_window_requests: state.window.len() as u32,
            paused_for,
            rate_limited_count: state.rate_limited_count,
        }
    }
}

#[derive(Debug)]
pub struct GovernorPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    pub queue_wait_time: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorStatus {
    pub available_permits: usize,
    pub max_permits: usize,
    pub requests_per_minute: u32,
    pub current_window_requests: u32,
    /// Remaining time of a server-imposed pause, if one is active.
    pub paused_for: Option<Duration>,
    pub rate_limited_count: u64,
}

impl GovernorStatus {
    pub fn requests_remaining_in_window(&self) -> u32 {
        self.requests_per_minute
            .saturating_sub(self.current_window_requests)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_for.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn tight_config() -> RateLimitConfig {
        RateLimitConfig {
            max_concurrency: 3,
            max_requests: 5,
            time_window: Duration::from_secs(10),
            min_interval: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_spacing() {
        let governor = RateGovernor::new(tight_config());

        let first = governor.acquire().await.unwrap();
        let started = Instant::now();
        governor.release(first);
        let _second = governor.acquire().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_ceiling_blocks_until_slot_frees() {
        let governor = RateGovernor::new(tight_config());
        let origin = Instant::now();

        for _ in 0..5 {
            let permit = governor.acquire().await.unwrap();
            drop(permit);
        }
        let status = governor.status().await;
        assert_eq!(status.current_window_requests, 5);
        assert_eq!(status.requests_remaining_in_window(), 0);

        let _sixth = governor.acquire().await.unwrap();
        assert!(origin.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_pauses_everyone_and_never_shortens() {
        let governor = RateGovernor::new(tight_config());

        governor
            .record_response(429, Some(Duration::from_secs(30)))
            .await;
        governor
            .record_response(429, Some(Duration::from_secs(5)))
            .await;

        let status = governor.status().await;
        assert!(status.is_paused());
        assert!(status.paused_for.unwrap() > Duration::from_secs(25));
        assert_eq!(status.rate_limited_count, 2);

        let before = Instant::now();
        let _permit = governor.acquire().await.unwrap();
        assert!(before.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_429_responses_do_not_pause() {
        let governor = RateGovernor::new(tight_config());
        governor
            .record_response(503, Some(Duration::from_secs(30)))
            .await;
        governor.record_response(200, None).await;

        let status = governor.status().await;
        assert!(!status.is_paused());
        assert_eq!(status.rate_limited_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_released_on_error_path() {
        let governor = Arc::new(RateGovernor::new(RateLimitConfig {
            max_concurrency: 1,
            ..tight_config()
        }));

        async fn failing(governor: &RateGovernor) -> Result<(), CoreError> {
            let _permit = governor.acquire().await?;
            Err(CoreError::Internal {
                message: "boom".to_string(),
            })
        }

        assert!(failing(&governor).await.is_err());
        assert_eq!(governor.status().await.available_permits, 1);
    }

    /// Randomized arrivals never break the in-flight cap or the rolling ceiling.
    #[tokio::test(start_paused = true)]
    async fn test_randomized_arrivals_respect_limits() {
        let config = tight_config();
        let governor = Arc::new(RateGovernor::new(config.clone()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let starts = Arc::new(StdMutex::new(Vec::new()));
        let mut rng = fastrand::Rng::with_seed(7);

        let mut handles = Vec::new();
        for _ in 0..40 {
            let arrival = Duration::from_millis(rng.u64(0..20_000));
            let hold = Duration::from_millis(rng.u64(1..800));
            let governor = governor.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let starts = starts.clone();

            handles.push(tokio::spawn(async move {
                sleep(arrival).await;
                let permit = governor.acquire().await.unwrap();
                let now_in_flight = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now_in_flight, Ordering::SeqCst);
                starts.lock().unwrap().push(Instant::now());
                sleep(hold).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= config.max_concurrency);

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 40);
        for (i, start) in starts.iter().enumerate() {
            let in_window = starts[i..]
                .iter()
                .take_while(|other| other.duration_since(*start) < config.time_window)
                .count();
            assert!(in_window <= config.max_requests as usize);
        }
        for pair in starts.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= config.min_interval);
        }
    }
}
