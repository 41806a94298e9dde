//! Fetcher boundary to the external platform.
//!
//! The trait is the interface the rest of the pipeline depends on; the
//! HTTP implementation is a thin adapter over a JSON gateway. The error
//! mapping matters more than the transport: rate limiting must be
//! distinguishable from not-found and from transient network failure,
//! because each gets a different retry decision.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use tgcrawl_core::{
    CrawlError, CrawlResult, Edge, EdgeKind, EntityKind, EntityPayload, EntityRecord, EntityRef,
};

/// A fetched entity plus the relationship edges discovered alongside it.
#[derive(Debug, Clone)]
pub struct FetchedEntity {
    pub record: EntityRecord,
    pub edges: Vec<Edge>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one entity by `(kind, identifier)`.
    async fn fetch(&self, target: &EntityRef) -> CrawlResult<FetchedEntity>;
}

/// Wire format of the gateway response.
#[derive(Debug, Deserialize)]
struct WireEntity {
    kind: String,
    external_id: String,
    payload: serde_json::Value,
    #[serde(default)]
    edges: Vec<WireEdge>,
}

#[derive(Debug, Deserialize)]
struct WireEdge {
    source_kind: String,
    source_id: String,
    target_kind: String,
    target_id: String,
    kind: String,
}

impl WireEntity {
    fn into_fetched(self) -> CrawlResult<FetchedEntity> {
        let kind = EntityKind::parse(&self.kind)?;
        let payload = EntityPayload::from_value(kind, self.payload)?;
        let record = EntityRecord::new(self.external_id, payload);
        let edges = self
            .edges
            .into_iter()
            .map(|e| {
                Ok(Edge::new(
                    EntityRef::new(EntityKind::parse(&e.source_kind)?, e.source_id),
                    EntityRef::new(EntityKind::parse(&e.target_kind)?, e.target_id),
                    EdgeKind::parse(&e.kind)?,
                ))
            })
            .collect::<CrawlResult<Vec<_>>>()?;
        Ok(FetchedEntity { record, edges })
    }
}

/// HTTP adapter: `GET {base}/v1/entities/{kind}/{id}`.
pub struct HttpFetcher {
    client: reqwest::Client,
    base: String,
}

impl HttpFetcher {
    pub fn new(base: impl Into<String>) -> CrawlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("tgcrawl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(CrawlError::transient_fetch)?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, target: &EntityRef) -> CrawlResult<FetchedEntity> {
        let url = format!(
            "{}/v1/entities/{}/{}",
            self.base, target.kind, target.external_id
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(CrawlError::transient_fetch)?;

        match response.status() {
            status if status.is_success() => {
                let wire: WireEntity = response.json().await.map_err(|e| {
                    CrawlError::MalformedPayload(format!("{target}: invalid body: {e}"))
                })?;
                wire.into_fetched()
            }
            reqwest::StatusCode::NOT_FOUND => Err(CrawlError::NotFound(target.to_string())),
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(CrawlError::RateLimited { retry_after })
            }
            status => Err(CrawlError::transient_fetch(format!(
                "{target}: unexpected status {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_entity_resolves_to_typed_payload() {
        let wire: WireEntity = serde_json::from_value(json!({
            "kind": "channel",
            "external_id": "chan_1",
            "payload": {"name": "news", "link": "https://t.me/news"},
            "edges": [{
                "source_kind": "channel", "source_id": "chan_1",
                "target_kind": "user", "target_id": "user_7",
                "kind": "MEMBER_OF"
            }]
        }))
        .unwrap();

        let fetched = wire.into_fetched().unwrap();
        assert_eq!(fetched.record.kind(), EntityKind::Channel);
        assert_eq!(fetched.edges.len(), 1);
        assert_eq!(fetched.edges[0].kind, EdgeKind::MemberOf);
    }

    #[test]
    fn unknown_wire_kind_is_malformed() {
        let wire: WireEntity = serde_json::from_value(json!({
            "kind": "sticker_pack",
            "external_id": "sp_1",
            "payload": {}
        }))
        .unwrap();
        assert!(matches!(
            wire.into_fetched(),
            Err(CrawlError::MalformedPayload(_))
        ));
    }
}
