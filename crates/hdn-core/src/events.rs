//! Entity-history events as produced by the write path, and their grouping key.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EntityId, PriorityId, StatusId, UserId};

/// Closed set of history event kinds (wire names match the audit trail).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Create,
    StatusChange,
    PriorityChange,
    Delegation,
    Comment,
    DurationChange,
    AttachmentAdd,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::StatusChange => "STATUS_CHANGE",
            EventKind::PriorityChange => "PRIORITY_CHANGE",
            EventKind::Delegation => "DELEGATION",
            EventKind::Comment => "COMMENT",
            EventKind::DurationChange => "DURATION_CHANGE",
            EventKind::AttachmentAdd => "ATTACHMENT_ADD",
        }
    }

    /// Kinds where only the last value inside a group is shown.
    pub fn collapses(self) -> bool {
        matches!(
            self,
            EventKind::StatusChange
                | EventKind::PriorityChange
                | EventKind::Delegation
                | EventKind::DurationChange
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub file_ref: String,
}

/// Immutable fact from the entity-history write path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub entity_id: EntityId,
    /// `None` for system-produced events; those never count as a notification source.
    #[serde(default)]
    pub actor_id: Option<UserId>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A foreign key carried in `old_value`/`new_value`, typed by event kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReferencedEntity {
    Status(StatusId),
    Priority(PriorityId),
    User(UserId),
}

impl HistoryEvent {
    pub fn old_ref(&self) -> Option<ReferencedEntity> {
        decode_ref(self.kind, self.old_value.as_deref())
    }

    pub fn new_ref(&self) -> Option<ReferencedEntity> {
        decode_ref(self.kind, self.new_value.as_deref())
    }

    /// Previous assignee of a DELEGATION event.
    pub fn previous_assignee(&self) -> Option<UserId> {
        match self.old_ref() {
            Some(ReferencedEntity::User(u)) => Some(u),
            _ => None,
        }
    }

    pub fn new_assignee(&self) -> Option<UserId> {
        match self.new_ref() {
            Some(ReferencedEntity::User(u)) => Some(u),
            _ => None,
        }
    }

    fn correlation(&self) -> Option<&str> {
        self.correlation_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

fn decode_ref(kind: EventKind, raw: Option<&str>) -> Option<ReferencedEntity> {
    let id = raw?.trim().parse::<i64>().ok()?;
    match kind {
        EventKind::StatusChange => Some(ReferencedEntity::Status(StatusId(id))),
        EventKind::PriorityChange => Some(ReferencedEntity::Priority(PriorityId(id))),
        EventKind::Delegation => Some(ReferencedEntity::User(UserId(id))),
        _ => None,
    }
}

/// Second half of a group key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Correlation {
    /// Producer-supplied id shared by every event of one logical update.
    Shared(String),
    /// Arrival sequence number of an uncorrelated event; never shared.
    Solo(u64),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventGroupKey {
    pub entity_id: EntityId,
    pub correlation: Correlation,
}

impl EventGroupKey {
    /// Key for `event`. `arrival` is only consumed when the event carries no correlation id.
    pub fn for_event(event: &HistoryEvent, arrival: impl FnOnce() -> u64) -> Self {
        let correlation = match event.correlation() {
            Some(c) => Correlation::Shared(c.to_string()),
            None => Correlation::Solo(arrival()),
        };
        Self {
            entity_id: event.entity_id,
            correlation,
        }
    }

    pub fn is_solo(&self) -> bool {
        matches!(self.correlation, Correlation::Solo(_))
    }
}

impl fmt::Display for EventGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.correlation {
            Correlation::Shared(c) => write!(f, "{}/{c}", self.entity_id),
            Correlation::Solo(seq) => write!(f, "{}/#{seq}", self.entity_id),
        }
    }
}
