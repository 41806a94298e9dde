//! Worker pipeline: fetch pool → bounded channel → commit pool.
//!
//! Bounded pools and a bounded channel give natural backpressure between
//! stages. Shutdown stops new dequeues immediately, lets in-flight commits
//! finish within a grace deadline, then forces a final checkpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use tgcrawl_core::{CrawlConfig, CrawlError, CrawlResult, EntityRef, FrontierTask};

use crate::checkpoint::CheckpointManager;
use crate::coordinator::{CommitOutcome, CommitStats, Coordinator, RetryPolicy, StatsSnapshot};
use crate::dedup::DedupIndex;
use crate::fetcher::{FetchedEntity, Fetcher};
use crate::frontier::FrontierQueue;
use crate::governor::{GovernorConfig, RateGovernor};
use crate::stores::{GraphStore, RelationalStore};

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub fetch_workers: usize,
    pub commit_workers: usize,
    pub channel_capacity: usize,
    pub grace: Duration,
    pub checkpoint_interval: Duration,
    /// Re-queues of one task before it is dead-lettered.
    pub max_task_retries: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            fetch_workers: 4,
            commit_workers: 2,
            channel_capacity: 32,
            grace: Duration::from_secs(10),
            checkpoint_interval: Duration::from_secs(30),
            max_task_retries: 5,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            fetch_workers: config.workers.fetch_workers,
            commit_workers: config.workers.commit_workers,
            channel_capacity: config.workers.channel_capacity,
            grace: config.grace_deadline(),
            checkpoint_interval: config.checkpoint_interval(),
            max_task_retries: config.retry.max_task_retries,
        }
    }
}

/// The single explicitly-owned process-wide state object handed to every
/// worker. Initialized from a checkpoint at start, mutated only through
/// the frontier's and coordinator's exclusive-writer methods, persisted at
/// teardown.
pub struct IngestContext {
    pub frontier: Arc<FrontierQueue>,
    pub dedup: Arc<DedupIndex>,
    pub stats: Arc<CommitStats>,
    /// Tasks dequeued but not yet at a terminal or re-queued state.
    outstanding: AtomicUsize,
}

impl IngestContext {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frontier: Arc::new(FrontierQueue::new()),
            dedup: Arc::new(DedupIndex::new()),
            stats: Arc::new(CommitStats::default()),
            outstanding: AtomicUsize::new(0),
        })
    }
}

pub struct Engine {
    ctx: Arc<IngestContext>,
    fetcher: Arc<dyn Fetcher>,
    relational: Arc<dyn RelationalStore>,
    coordinator: Arc<Coordinator>,
    governor: Arc<RateGovernor>,
    checkpoints: Arc<CheckpointManager>,
    options: EngineOptions,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        graph: Arc<dyn GraphStore>,
        fetcher: Arc<dyn Fetcher>,
        governor_config: GovernorConfig,
        retry: RetryPolicy,
        checkpoints: CheckpointManager,
        options: EngineOptions,
    ) -> Self {
        let ctx = IngestContext::new();
        let coordinator = Arc::new(Coordinator::new(
            relational.clone(),
            graph,
            ctx.dedup.clone(),
            retry,
            ctx.stats.clone(),
        ));
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            fetcher,
            relational,
            coordinator,
            governor: Arc::new(RateGovernor::new(governor_config)),
            checkpoints: Arc::new(checkpoints),
            options,
            shutdown,
        }
    }

    pub fn context(&self) -> Arc<IngestContext> {
        self.ctx.clone()
    }

    /// Handle for external shutdown (e.g. ctrl-c).
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Drive the pipeline until the frontier drains or shutdown is signaled.
    pub async fn run(&self, seeds: Vec<EntityRef>) -> CrawlResult<StatsSnapshot> {
        // Restore before any seed is accepted, so resumed tasks outrank
        // newly configured ones.
        match self.checkpoints.load()? {
            Some(checkpoint) => {
                info!(
                    tasks = checkpoint.frontier.tasks.len(),
                    dedup = checkpoint.dedup.len(),
                    created_at = %checkpoint.created_at,
                    "resuming from checkpoint"
                );
                self.ctx.frontier.restore(checkpoint.frontier);
                self.ctx.dedup.hydrate(checkpoint.dedup);
            }
            None => {
                let committed = self.relational.committed_refs().await?;
                if !committed.is_empty() {
                    info!(count = committed.len(), "hydrating dedup index from relational store");
                }
                self.ctx.dedup.hydrate(committed);
            }
        }

        let mut accepted = 0usize;
        for seed in seeds {
            if self.ctx.dedup.has(&seed) {
                continue;
            }
            if self
                .ctx
                .frontier
                .enqueue(FrontierTask::seed(seed.kind, seed.external_id.clone()))
            {
                accepted += 1;
            }
        }
        info!(seeds = accepted, frontier = self.ctx.frontier.depth(), "ingestion starting");

        let (tx, rx) = mpsc::channel::<(FrontierTask, FetchedEntity)>(self.options.channel_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let fatal: Arc<Mutex<Option<CrawlError>>> = Arc::new(Mutex::new(None));

        let mut commit_handles = Vec::with_capacity(self.options.commit_workers);
        for _ in 0..self.options.commit_workers {
            commit_handles.push(tokio::spawn(commit_loop(
                self.ctx.clone(),
                rx.clone(),
                self.coordinator.clone(),
                self.governor.clone(),
                self.options.max_task_retries,
            )));
        }

        let mut fetch_handles = Vec::with_capacity(self.options.fetch_workers);
        for _ in 0..self.options.fetch_workers {
            fetch_handles.push(tokio::spawn(fetch_loop(
                self.ctx.clone(),
                self.fetcher.clone(),
                self.governor.clone(),
                self.coordinator.clone(),
                tx.clone(),
                self.shutdown.subscribe(),
                self.options.max_task_retries,
            )));
        }
        drop(tx);

        let ticker = tokio::spawn(checkpoint_loop(
            self.ctx.clone(),
            self.checkpoints.clone(),
            self.options.checkpoint_interval,
            self.shutdown.clone(),
            fatal.clone(),
        ));

        for handle in fetch_handles {
            let _ = handle.await;
        }

        // Fetchers are done; give in-flight commits the grace window.
        let abort_handles: Vec<_> = commit_handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(self.options.grace, futures::future::join_all(commit_handles))
            .await
            .is_err()
        {
            warn!("grace deadline exceeded, aborting in-flight commits");
            for handle in abort_handles {
                handle.abort();
            }
        }

        let _ = self.shutdown.send(true);
        let _ = ticker.await;

        // Forced final checkpoint; failure here is fatal by policy.
        self.checkpoints.snapshot(
            &self.ctx.frontier,
            &self.ctx.dedup,
            self.ctx.stats.committed.load(Ordering::Relaxed),
        )?;

        if let Some(e) = fatal.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(e);
        }

        let summary = self.ctx.stats.snapshot();
        info!(
            committed = summary.committed,
            dead_lettered = summary.dead_lettered,
            store_retries = summary.store_retries,
            "ingestion finished"
        );
        Ok(summary)
    }
}

async fn fetch_loop(
    ctx: Arc<IngestContext>,
    fetcher: Arc<dyn Fetcher>,
    governor: Arc<RateGovernor>,
    coordinator: Arc<Coordinator>,
    tx: mpsc::Sender<(FrontierTask, FetchedEntity)>,
    shutdown: watch::Receiver<bool>,
    max_task_retries: u32,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(task) = ctx.frontier.dequeue() else {
            // Queue looks empty, but in-flight tasks may still discover or
            // re-queue work.
            if ctx.outstanding.load(Ordering::SeqCst) == 0 && ctx.frontier.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            continue;
        };

        ctx.outstanding.fetch_add(1, Ordering::SeqCst);
        let permit = governor.acquire().await;
        let result = fetcher.fetch(&task.entity).await;
        drop(permit);

        match result {
            Ok(fetched) => {
                // Feedback loop: unseen edge endpoints become new frontier
                // tasks. The frontier's visited/claimed sets bound cycles.
                for edge in &fetched.edges {
                    for endpoint in [&edge.source, &edge.target] {
                        if *endpoint != task.entity && !ctx.dedup.has(endpoint) {
                            ctx.frontier.enqueue(FrontierTask::discovered(endpoint.clone()));
                        }
                    }
                }
                if tx.send((task, fetched)).await.is_err() {
                    ctx.outstanding.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
            }
            Err(CrawlError::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                warn!(entity = %task.entity, ?wait, "rate limited, backing off");
                tokio::time::sleep(wait).await;
                ctx.frontier.requeue_retry(task.retried());
                ctx.outstanding.fetch_sub(1, Ordering::SeqCst);
            }
            Err(e) if e.is_retryable() => {
                if task.retries < max_task_retries {
                    warn!(entity = %task.entity, error = %e, retries = task.retries, "fetch failed, re-queueing");
                    ctx.frontier.requeue_retry(task.retried());
                } else {
                    coordinator.dead_letter(&task.entity, &e, task.retries).await;
                    ctx.frontier.mark_visited(&task.entity);
                }
                ctx.outstanding.fetch_sub(1, Ordering::SeqCst);
            }
            Err(e) => {
                // NotFound / MalformedPayload: terminal for this task.
                coordinator.dead_letter(&task.entity, &e, task.retries).await;
                ctx.frontier.mark_visited(&task.entity);
                ctx.outstanding.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

async fn commit_loop(
    ctx: Arc<IngestContext>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(FrontierTask, FetchedEntity)>>>,
    coordinator: Arc<Coordinator>,
    governor: Arc<RateGovernor>,
    max_task_retries: u32,
) {
    loop {
        let message = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some((task, fetched)) = message else {
            break;
        };

        let started = Instant::now();
        let outcome = coordinator.commit(&fetched, task.retries).await;
        governor.record_commit_latency(started.elapsed());

        match outcome {
            CommitOutcome::Committed | CommitOutcome::Fatal => {
                ctx.frontier.mark_visited(&task.entity);
            }
            CommitOutcome::Exhausted => {
                if task.retries < max_task_retries {
                    ctx.frontier.requeue_retry(task.retried());
                } else {
                    let cause = CrawlError::transient_store("store retries exhausted");
                    coordinator.dead_letter(&task.entity, &cause, task.retries).await;
                    ctx.frontier.mark_visited(&task.entity);
                }
            }
        }
        ctx.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn checkpoint_loop(
    ctx: Arc<IngestContext>,
    checkpoints: Arc<CheckpointManager>,
    period: Duration,
    shutdown: watch::Sender<bool>,
    fatal: Arc<Mutex<Option<CrawlError>>>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let committed = ctx.stats.committed.load(Ordering::Relaxed);
                if let Err(e) = checkpoints.snapshot(&ctx.frontier, &ctx.dedup, committed) {
                    // Durability outranks liveness: halt ingestion.
                    error!(error = %e, "checkpoint failed, halting ingestion");
                    *fatal.lock().unwrap_or_else(|p| p.into_inner()) = Some(e);
                    let _ = shutdown.send(true);
                    break;
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}
