//! Channel-B structured payload (live feed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EventKind;

pub const PAYLOAD_KIND: &str = "order_history";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Fresh per (group, recipient) so clients can dedup replays.
    pub event_id: Uuid,
    pub kind: String,
    pub is_read: bool,
    pub actor: PayloadActor,
    pub message: String,
    pub changes: Vec<Change>,
    pub links: Links,
    /// Timestamp of the group's first event, not of the flush.
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadActor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: EventKind,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Links {
    pub primary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

impl NotificationPayload {
    /// Same payload with a new `event_id`; everything else is content.
    pub fn content_eq(&self, other: &Self) -> bool {
        Self {
            event_id: other.event_id,
            ..self.clone()
        } == *other
    }
}
