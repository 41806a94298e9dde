//! Rate limiting and backpressure.
//!
//! A token bucket caps the fetch request rate against the platform's
//! advertised limit, and a semaphore caps fetch concurrency. Commit
//! latency is tracked in a sliding window; when p99 crosses the configured
//! threshold the permit count narrows, and it widens again as latency
//! recovers. Backpressure only ever narrows permits; frontier tasks are
//! never dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use tgcrawl_core::config::RateSection;

#[derive(Debug, Clone, Copy)]
pub struct GovernorConfig {
    pub requests_per_sec: f64,
    pub burst: u32,
    pub max_concurrency: usize,
    pub min_concurrency: usize,
    pub p99_threshold: Duration,
    /// Sliding-window size for latency samples.
    pub window: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            requests_per_sec: 2.0,
            burst: 5,
            max_concurrency: 5,
            min_concurrency: 1,
            p99_threshold: Duration::from_secs(2),
            window: 64,
        }
    }
}

impl From<RateSection> for GovernorConfig {
    fn from(rate: RateSection) -> Self {
        Self {
            requests_per_sec: rate.requests_per_sec,
            burst: rate.burst,
            max_concurrency: rate.max_concurrency,
            min_concurrency: rate.min_concurrency.max(1),
            p99_threshold: Duration::from_millis(rate.p99_threshold_ms),
            window: 64,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateGovernor {
    config: GovernorConfig,
    bucket: Mutex<Bucket>,
    permits: Arc<Semaphore>,
    /// Permits currently withheld by backpressure.
    narrowed: Mutex<usize>,
    latencies: Mutex<VecDeque<Duration>>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.burst as f64,
                last_refill: Instant::now(),
            }),
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            narrowed: Mutex::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(config.window)),
            config,
        }
    }

    /// Wait for a rate token, then for a concurrency permit. The permit is
    /// held for the duration of the fetch call.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.take_token().await;
        match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            // We never close the semaphore.
            Err(_) => unreachable!("governor semaphore closed"),
        }
    }

    async fn take_token(&self) {
        loop {
            let wait = {
                let mut bucket = lock(&self.bucket);
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.config.requests_per_sec)
                    .min(self.config.burst as f64);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.config.requests_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Feed a commit duration into the latency window and adjust permits.
    pub fn record_commit_latency(&self, latency: Duration) {
        let p99 = {
            let mut window = lock(&self.latencies);
            if window.len() == self.config.window {
                window.pop_front();
            }
            window.push_back(latency);
            percentile(&window, 0.99)
        };

        if p99 > self.config.p99_threshold {
            self.narrow();
        } else {
            self.widen();
        }
    }

    fn narrow(&self) {
        let mut narrowed = lock(&self.narrowed);
        if self.config.max_concurrency - *narrowed <= self.config.min_concurrency {
            return;
        }
        // Withhold one permit; if all are in use, in-flight fetches already
        // saturate the narrowed target and we try again on the next sample.
        if let Ok(permit) = self.permits.clone().try_acquire_owned() {
            permit.forget();
            *narrowed += 1;
            debug!(limit = self.config.max_concurrency - *narrowed, "fetch concurrency narrowed");
        }
    }

    fn widen(&self) {
        let mut narrowed = lock(&self.narrowed);
        if *narrowed > 0 {
            self.permits.add_permits(1);
            *narrowed -= 1;
            debug!(limit = self.config.max_concurrency - *narrowed, "fetch concurrency widened");
        }
    }

    /// Current fetch concurrency ceiling after backpressure.
    pub fn current_limit(&self) -> usize {
        self.config.max_concurrency - *lock(&self.narrowed)
    }
}

fn percentile(window: &VecDeque<Duration>, p: f64) -> Duration {
    if window.is_empty() {
        return Duration::ZERO;
    }
    let mut sorted: Vec<Duration> = window.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx]
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
