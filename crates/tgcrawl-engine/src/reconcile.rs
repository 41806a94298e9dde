//! Operator-triggered repair pass.
//!
//! Under the commit-ahead policy, a crash between the relational and graph
//! stages can leave edges recorded relationally but missing from the graph.
//! This pass re-derives every edge from the relational store and re-MERGEs
//! it; all writes are idempotent, so running it is always safe. It is never
//! scheduled on the real-time path.

use tracing::info;

use tgcrawl_core::CrawlResult;

use crate::stores::{GraphStore, RelationalStore};

/// Re-upsert every relationally recorded edge into the graph store.
/// Returns the number of edges replayed.
pub async fn reconcile_edges(
    relational: &dyn RelationalStore,
    graph: &dyn GraphStore,
) -> CrawlResult<usize> {
    let edges = relational.stored_edges().await?;
    let total = edges.len();
    for edge in &edges {
        graph.upsert_edge(edge).await?;
    }
    info!(edges = total, "reconcile pass complete");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CommitStats, Coordinator, RetryPolicy};
    use crate::dedup::DedupIndex;
    use crate::testing::{channel_fetch, mock_graph, sqlite_store};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn repairs_graph_after_partial_commit() {
        let store = sqlite_store();
        let graph = mock_graph();
        graph.fail_next(u32::MAX);
        let coordinator = Coordinator::new(
            store.clone(),
            graph.clone(),
            Arc::new(DedupIndex::new()),
            RetryPolicy {
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            Arc::new(CommitStats::default()),
        );

        // graph stage exhausts; edge exists relationally only
        coordinator
            .commit(&channel_fetch("chan_1", &[("user_7", "MEMBER_OF")]), 0)
            .await;
        assert_eq!(graph.edge_count(), 0);

        graph.heal();
        let repaired = reconcile_edges(store.as_ref(), graph.as_ref()).await.unwrap();
        assert_eq!(repaired, 1);
        assert!(graph.has_edge("chan_1", "user_7", "MEMBER_OF"));
    }
}
