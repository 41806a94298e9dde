//! Entity kinds, payloads, and records.
//!
//! The platform returns loosely structured JSON; we resolve it into a closed
//! set of typed kinds at parse time. Unknown kinds and missing required
//! fields are rejected as [`CrawlError::MalformedPayload`] rather than
//! stored opaquely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CrawlError, CrawlResult};

/// The closed set of entity kinds the crawler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Channel,
    User,
    Message,
}

impl EntityKind {
    /// Stable lowercase name used in SQL rows, config, and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Channel => "channel",
            EntityKind::User => "user",
            EntityKind::Message => "message",
        }
    }

    /// Node label used in the graph store.
    pub fn node_label(&self) -> &'static str {
        match self {
            EntityKind::Channel => "Channel",
            EntityKind::User => "User",
            EntityKind::Message => "Message",
        }
    }

    pub fn parse(s: &str) -> CrawlResult<Self> {
        match s {
            "channel" => Ok(EntityKind::Channel),
            "user" => Ok(EntityKind::User),
            "message" => Ok(EntityKind::Message),
            other => Err(CrawlError::MalformedPayload(format!(
                "unknown entity kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed reference to an entity: the dedup key, the frontier key, and the
/// relational uniqueness key `(kind, external_id)` are all this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub external_id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, external_id: impl Into<String>) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.external_id)
    }
}

/// Semantic fields of a channel, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub name: String,
    pub link: String,
    #[serde(default)]
    pub subscribers: Option<i64>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub channel_id: String,
    pub message_id: i64,
    #[serde(default)]
    pub posted_at: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Validated payload of a fetched entity, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityPayload {
    Channel(ChannelPayload),
    User(UserPayload),
    Message(MessagePayload),
}

impl EntityPayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::Channel(_) => EntityKind::Channel,
            EntityPayload::User(_) => EntityKind::User,
            EntityPayload::Message(_) => EntityKind::Message,
        }
    }

    /// Resolve a raw JSON object into a typed payload for the given kind.
    ///
    /// The required-field sets are enforced by the typed deserialization:
    /// a channel without a `link`, a user without a `username`, or a message
    /// without `channel_id`/`message_id` all fail here.
    pub fn from_value(kind: EntityKind, value: serde_json::Value) -> CrawlResult<Self> {
        let malformed =
            |e: serde_json::Error| CrawlError::MalformedPayload(format!("{kind} payload: {e}"));
        match kind {
            EntityKind::Channel => serde_json::from_value(value)
                .map(EntityPayload::Channel)
                .map_err(malformed),
            EntityKind::User => serde_json::from_value(value)
                .map(EntityPayload::User)
                .map_err(malformed),
            EntityKind::Message => serde_json::from_value(value)
                .map(EntityPayload::Message)
                .map_err(malformed),
        }
    }
}

/// Commit status of an entity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Pending,
    Committed,
    Failed,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitStatus::Pending => "pending",
            CommitStatus::Committed => "committed",
            CommitStatus::Failed => "failed",
        }
    }
}

/// A fully fetched entity awaiting (or having completed) its dual commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub external_id: String,
    pub payload: EntityPayload,
    pub discovered_at: DateTime<Utc>,
    pub status: CommitStatus,
}

impl EntityRecord {
    pub fn new(external_id: impl Into<String>, payload: EntityPayload) -> Self {
        Self {
            external_id: external_id.into(),
            payload,
            discovered_at: Utc::now(),
            status: CommitStatus::Pending,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.external_id.clone())
    }
}
