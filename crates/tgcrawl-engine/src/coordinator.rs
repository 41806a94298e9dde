//! Dual-write coordinator: the staged, idempotent commit protocol.
//!
//! For one fetched entity and its edges:
//! 1. upsert the entity into the relational store (idempotency key:
//!    `(kind, external_id)`);
//! 2. ensure both endpoints of every edge exist relationally, at least as
//!    stubs, and record the edge relationally;
//! 3. upsert every edge into the graph store (idempotency key:
//!    `(source, target, edge type)`);
//! 4. only then record the identity in the dedup index and mark the row
//!    committed.
//!
//! The relational write always precedes the graph write: the graph trusts
//! relational existence, never the reverse. There is no cross-store
//! transaction. A failure after step 1 leaves the entity committed
//! relationally with edges missing; that state is converged by idempotent
//! retries or by the reconcile pass, never rolled back.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use tgcrawl_core::{CrawlError, EntityRef};

use crate::dedup::DedupIndex;
use crate::fetcher::FetchedEntity;
use crate::stores::{GraphStore, RelationalStore};

/// Bounded exponential backoff with jitter for transient store errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per stage before the task is handed back for re-queueing.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl From<tgcrawl_core::config::RetrySection> for RetryPolicy {
    fn from(section: tgcrawl_core::config::RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            base_backoff: Duration::from_millis(section.base_backoff_ms),
            max_backoff: Duration::from_millis(section.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff);
        // up to 50% jitter so retrying workers do not stampede
        let jitter = rand::thread_rng().gen_range(0.0..0.5);
        exp.mul_f64(1.0 + jitter).min(self.max_backoff)
    }
}

/// Commit telemetry, shared across workers.
#[derive(Debug, Default)]
pub struct CommitStats {
    pub committed: AtomicU64,
    pub edges_recorded: AtomicU64,
    pub stubs_created: AtomicU64,
    pub store_retries: AtomicU64,
    pub exhausted: AtomicU64,
    pub dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`CommitStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub committed: u64,
    pub edges_recorded: u64,
    pub stubs_created: u64,
    pub store_retries: u64,
    pub exhausted: u64,
    pub dead_lettered: u64,
}

impl CommitStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            committed: self.committed.load(Ordering::Relaxed),
            edges_recorded: self.edges_recorded.load(Ordering::Relaxed),
            stubs_created: self.stubs_created.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one commit attempt, as seen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All four steps succeeded; the identifier is terminally done.
    Committed,
    /// A stage exhausted its retries. The task should re-queue at retry
    /// priority; every step already taken is idempotent.
    Exhausted,
    /// Non-retryable failure; the task was dead-lettered.
    Fatal,
}

enum StageOutcome {
    Done,
    Fatal(CrawlError),
    Exhausted(CrawlError),
}

pub struct Coordinator {
    relational: Arc<dyn RelationalStore>,
    graph: Arc<dyn GraphStore>,
    dedup: Arc<DedupIndex>,
    retry: RetryPolicy,
    stats: Arc<CommitStats>,
}

impl Coordinator {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        graph: Arc<dyn GraphStore>,
        dedup: Arc<DedupIndex>,
        retry: RetryPolicy,
        stats: Arc<CommitStats>,
    ) -> Self {
        Self {
            relational,
            graph,
            dedup,
            retry,
            stats,
        }
    }

    pub fn stats(&self) -> &CommitStats {
        &self.stats
    }

    /// Commit one fetched entity and its edges to both stores.
    ///
    /// `task_retries` is the task's re-queue count, recorded in the
    /// dead-letter audit when the commit turns out fatal.
    pub async fn commit(&self, fetched: &FetchedEntity, task_retries: u32) -> CommitOutcome {
        let entity = fetched.record.entity_ref();

        // Step 1: relational upsert of the entity itself.
        let stage = self
            .run_stage("entity upsert", &entity, || async {
                self.relational.upsert_entity(&fetched.record).await
            })
            .await;
        if let Some(outcome) = self.resolve(stage, &entity, task_retries).await {
            return outcome;
        }

        // Step 2: endpoint stubs plus the relational edge record. Must
        // complete before any graph write so the graph's referential
        // expectation holds even for endpoints nobody has fetched yet.
        let stage = self
            .run_stage("endpoint stubs", &entity, || async {
                for edge in &fetched.edges {
                    for endpoint in [&edge.source, &edge.target] {
                        if *endpoint == entity {
                            continue;
                        }
                        if self.relational.ensure_stub(endpoint).await? {
                            self.stats.stubs_created.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    if self.relational.record_edge(edge).await? {
                        self.stats.edges_recorded.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(())
            })
            .await;
        if let Some(outcome) = self.resolve(stage, &entity, task_retries).await {
            return outcome;
        }

        // Step 3: graph upserts.
        let stage = self
            .run_stage("graph edge upsert", &entity, || async {
                for edge in &fetched.edges {
                    self.graph.upsert_edge(edge).await?;
                }
                Ok(())
            })
            .await;
        if let Some(outcome) = self.resolve(stage, &entity, task_retries).await {
            return outcome;
        }

        // Step 4: mark committed and publish to the dedup index.
        let stage = self
            .run_stage("commit mark", &entity, || async {
                self.relational.mark_committed(&entity).await
            })
            .await;
        if let Some(outcome) = self.resolve(stage, &entity, task_retries).await {
            return outcome;
        }

        self.dedup.record_committed(entity.clone());
        self.stats.committed.fetch_add(1, Ordering::Relaxed);
        info!(%entity, edges = fetched.edges.len(), "entity committed");
        CommitOutcome::Committed
    }

    /// Dead-letter a task and mark any relational row for it failed.
    pub async fn dead_letter(&self, entity: &EntityRef, cause: &CrawlError, retries: u32) {
        error!(%entity, %cause, retries, "task dead-lettered");
        if let Err(e) = self
            .relational
            .add_dead_letter(entity, &cause.to_string(), retries)
            .await
        {
            error!(%entity, error = %e, "failed to write dead-letter record");
        }
        if let Err(e) = self.relational.mark_failed(entity).await {
            error!(%entity, error = %e, "failed to mark entity failed");
        }
        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Translate a stage outcome into an early return, handling the fatal
    /// and exhausted cases.
    async fn resolve(
        &self,
        stage: StageOutcome,
        entity: &EntityRef,
        task_retries: u32,
    ) -> Option<CommitOutcome> {
        match stage {
            StageOutcome::Done => None,
            StageOutcome::Fatal(cause) => {
                self.dead_letter(entity, &cause, task_retries).await;
                Some(CommitOutcome::Fatal)
            }
            StageOutcome::Exhausted(cause) => {
                warn!(%entity, %cause, "commit stage exhausted retries, task will re-queue");
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                Some(CommitOutcome::Exhausted)
            }
        }
    }

    async fn run_stage<Fut>(
        &self,
        stage: &str,
        entity: &EntityRef,
        op: impl Fn() -> Fut,
    ) -> StageOutcome
    where
        Fut: Future<Output = tgcrawl_core::CrawlResult<()>>,
    {
        let mut last_error = None;
        for attempt in 0..self.retry.max_attempts {
            match op().await {
                Ok(()) => return StageOutcome::Done,
                Err(e) if e.is_retryable() => {
                    let backoff = self.retry.backoff(attempt);
                    self.stats.store_retries.fetch_add(1, Ordering::Relaxed);
                    debug!(%entity, stage, attempt, ?backoff, error = %e, "stage retry");
                    last_error = Some(e);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return StageOutcome::Fatal(e),
            }
        }
        StageOutcome::Exhausted(
            last_error.unwrap_or_else(|| CrawlError::transient_store("retries exhausted")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{channel_fetch, mock_graph, sqlite_store, user_ref};
    use tgcrawl_core::EntityKind;
    use tgcrawl_db::queries;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    fn coordinator(
        relational: Arc<dyn RelationalStore>,
        graph: Arc<dyn GraphStore>,
    ) -> (Coordinator, Arc<DedupIndex>, Arc<CommitStats>) {
        let dedup = Arc::new(DedupIndex::new());
        let stats = Arc::new(CommitStats::default());
        let coordinator =
            Coordinator::new(relational, graph, dedup.clone(), policy(), stats.clone());
        (coordinator, dedup, stats)
    }

    #[tokio::test]
    async fn repeated_commit_creates_one_row_and_one_edge() {
        let store = sqlite_store();
        let graph = mock_graph();
        let (coordinator, dedup, _) = coordinator(store.clone(), graph.clone());

        let fetched = channel_fetch("chan_1", &[("user_7", "MEMBER_OF")]);
        for _ in 0..3 {
            let outcome = coordinator.commit(&fetched, 0).await;
            assert_eq!(outcome, CommitOutcome::Committed);
        }

        let counts = queries::entities::counts(store.pool()).unwrap();
        assert_eq!(counts.committed, 1);
        assert_eq!(graph.edge_count(), 1);
        assert!(dedup.has(&fetched.record.entity_ref()));
    }

    #[tokio::test]
    async fn graph_fails_twice_then_succeeds() {
        let store = sqlite_store();
        let graph = mock_graph();
        graph.fail_next(2);
        let (coordinator, _, stats) = coordinator(store.clone(), graph.clone());

        let fetched = channel_fetch("chan_1", &[("user_7", "MEMBER_OF")]);
        let outcome = coordinator.commit(&fetched, 0).await;
        assert_eq!(outcome, CommitOutcome::Committed);

        let counts = queries::entities::counts(store.pool()).unwrap();
        assert_eq!(counts.committed, 1);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(stats.snapshot().store_retries, 2);
    }

    #[tokio::test]
    async fn referential_precondition_holds_under_delayed_stub() {
        // The graph mock checks, at every edge write, that both endpoints
        // already exist relationally. A store that fails the first stub
        // insert forces a stage retry; the edge write must block behind it
        // rather than run against a missing endpoint.
        let store = sqlite_store();
        let flaky = crate::testing::flaky_stub_store(store.clone(), 1);
        let graph = crate::testing::verifying_graph(store.clone());
        let (coordinator, _, _) = coordinator(flaky, graph.clone());

        let fetched = channel_fetch("chan_1", &[("user_7", "MEMBER_OF")]);
        let outcome = coordinator.commit(&fetched, 0).await;
        assert_eq!(outcome, CommitOutcome::Committed);
        assert!(!graph.precondition_violated());
        assert_eq!(graph.edge_count(), 1);
    }

    #[tokio::test]
    async fn stub_scenario_chan1_member_of_user7() {
        let store = sqlite_store();
        let graph = mock_graph();
        let (coordinator, _, _) = coordinator(store.clone(), graph.clone());

        let fetched = channel_fetch("chan_1", &[("user_7", "MEMBER_OF")]);
        coordinator.commit(&fetched, 0).await;

        let chan = queries::entities::get_entity(store.pool(), "channel", "chan_1")
            .unwrap()
            .unwrap();
        assert!(chan.resolved);
        assert_eq!(chan.status, "committed");

        let user = queries::entities::get_entity(store.pool(), "user", "user_7")
            .unwrap()
            .unwrap();
        assert!(!user.resolved);
        assert!(user.payload.is_none());

        assert!(graph.has_edge("chan_1", "user_7", "MEMBER_OF"));
        assert_eq!(graph.edge_count(), 1);
    }

    #[tokio::test]
    async fn kind_conflict_is_fatal_and_dead_lettered() {
        let store = sqlite_store();
        let graph = mock_graph();
        let (coordinator, dedup, stats) = coordinator(store.clone(), graph.clone());

        coordinator
            .commit(&channel_fetch("amb_1", &[]), 0)
            .await;
        // same external id fetched again as a user
        let conflicting = crate::testing::user_fetch("amb_1");
        let outcome = coordinator.commit(&conflicting, 2).await;
        assert_eq!(outcome, CommitOutcome::Fatal);

        let letters = queries::dead_letter::list_dead_letters(store.pool()).unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].retries, 2);
        assert!(letters[0].cause.contains("conflict"));
        assert_eq!(stats.snapshot().dead_lettered, 1);
        assert!(!dedup.has(&user_ref("amb_1")));
    }

    #[tokio::test]
    async fn exhausted_graph_leaves_relational_committed_ahead() {
        // Commit-ahead, converge-eventually: after the graph stage gives
        // up, the relational row stays (pending, resolved) and the edge is
        // recorded relationally, ready for reconcile or a later retry.
        let store = sqlite_store();
        let graph = mock_graph();
        graph.fail_next(u32::MAX);
        let (coordinator, dedup, stats) = coordinator(store.clone(), graph.clone());

        let fetched = channel_fetch("chan_1", &[("user_7", "MEMBER_OF")]);
        let outcome = coordinator.commit(&fetched, 0).await;
        assert_eq!(outcome, CommitOutcome::Exhausted);
        assert_eq!(stats.snapshot().exhausted, 1);
        assert!(!dedup.has(&fetched.record.entity_ref()));

        let counts = queries::entities::counts(store.pool()).unwrap();
        assert_eq!(counts.entities, 2); // chan_1 + user_7 stub
        assert_eq!(counts.committed, 0);
        assert_eq!(counts.edges, 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[tokio::test]
    async fn same_id_same_kind_is_not_a_conflict() {
        let store = sqlite_store();
        let graph = mock_graph();
        let (coordinator, _, _) = coordinator(store.clone(), graph.clone());

        assert_eq!(
            coordinator.commit(&channel_fetch("chan_1", &[]), 0).await,
            CommitOutcome::Committed
        );
        assert_eq!(
            coordinator.commit(&channel_fetch("chan_1", &[]), 0).await,
            CommitOutcome::Committed
        );
        let row = queries::entities::get_entity(store.pool(), "channel", "chan_1")
            .unwrap()
            .unwrap();
        assert_eq!(row.kind, EntityKind::Channel.as_str());
    }
}
