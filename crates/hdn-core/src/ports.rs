//! Hexagonal ports: everything the dispatcher consumes lives behind these traits.
//!
//! Lookups (reference names, entity snapshots) and both delivery channels are
//! implemented in adapter crates or by the embedding application.

use async_trait::async_trait;

use crate::{
    domain::{ChatId, EntityId, EntitySnapshot, PriorityId, StatusId, UserDisplay, UserId},
    events::{EventGroupKey, HistoryEvent},
    payload::NotificationPayload,
    Result,
};

/// Read-only name lookups. A miss is `None`, never an error.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    async fn status_name(&self, id: StatusId) -> Option<String>;
    async fn priority_name(&self, id: PriorityId) -> Option<String>;
    async fn user_display(&self, id: UserId) -> Option<UserDisplay>;

    /// Channel-A address of a user, if they linked one.
    async fn chat_address(&self, id: UserId) -> Option<ChatId>;
}

/// Structural facts about the entity a group describes.
#[async_trait]
pub trait EntitySnapshotProvider: Send + Sync {
    /// Fails with `Error::Resolution` when the entity is gone or has no creator.
    async fn snapshot(&self, entity: EntityId) -> Result<EntitySnapshot>;
}

/// Channel A: conversational text (Telegram HTML).
#[async_trait]
pub trait TextSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_text(&self, chat_id: ChatId, html: &str) -> Result<()>;
}

/// Channel B: structured live-feed payloads.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn push_payload(&self, user_id: UserId, payload: &NotificationPayload) -> Result<()>;
}

/// What the aggregation buffer hands a flushed group to.
#[async_trait]
pub trait FlushHandler: Send + Sync {
    async fn handle(&self, key: EventGroupKey, events: Vec<HistoryEvent>);
}
