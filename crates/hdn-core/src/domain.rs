use std::fmt;

use serde::{Deserialize, Serialize};

/// Helpdesk entity (order) id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

/// Helpdesk user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityId(pub i64);

/// Telegram chat id (numeric) used as the channel-A address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a user looks like in a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserDisplay {
    pub name: String,
    pub avatar: Option<String>,
}

/// Structural facts about an entity, read once per flush.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub creator_id: UserId,
    pub assignee_id: Option<UserId>,
    pub title: String,
}

/// A user to notify plus their per-channel addresses.
///
/// Channel B is addressed by `user_id`; channel A only when `chat_id` is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Recipient {
    pub user_id: UserId,
    pub chat_id: Option<ChatId>,
}
