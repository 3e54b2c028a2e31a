//! Static, JSON-backed implementation of the lookup ports.
//!
//! The binary loads one from `DIRECTORY_PATH`; tests build them in code.

use std::{collections::HashMap, fs, path::Path};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    domain::{ChatId, EntityId, EntitySnapshot, PriorityId, StatusId, UserDisplay, UserId},
    errors::Error,
    ports::{EntitySnapshotProvider, ReferenceResolver},
    Result,
};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserRecord {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OrderRecord {
    #[serde(default)]
    pub creator_id: Option<i64>,
    #[serde(default)]
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub title: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StaticDirectory {
    #[serde(default)]
    statuses: HashMap<i64, String>,
    #[serde(default)]
    priorities: HashMap<i64, String>,
    #[serde(default)]
    users: HashMap<i64, UserRecord>,
    #[serde(default)]
    orders: HashMap<i64, OrderRecord>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read directory {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn with_status(mut self, id: i64, name: &str) -> Self {
        self.statuses.insert(id, name.to_string());
        self
    }

    pub fn with_priority(mut self, id: i64, name: &str) -> Self {
        self.priorities.insert(id, name.to_string());
        self
    }

    pub fn with_user(mut self, id: i64, name: &str, telegram_chat_id: Option<i64>) -> Self {
        self.users.insert(
            id,
            UserRecord {
                name: name.to_string(),
                avatar: None,
                telegram_chat_id,
            },
        );
        self
    }

    pub fn with_order(
        mut self,
        id: i64,
        creator_id: Option<i64>,
        assignee_id: Option<i64>,
        title: &str,
    ) -> Self {
        self.orders.insert(
            id,
            OrderRecord {
                creator_id,
                assignee_id,
                title: title.to_string(),
            },
        );
        self
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl ReferenceResolver for StaticDirectory {
    async fn status_name(&self, id: StatusId) -> Option<String> {
        self.statuses.get(&id.0).cloned()
    }

    async fn priority_name(&self, id: PriorityId) -> Option<String> {
        self.priorities.get(&id.0).cloned()
    }

    async fn user_display(&self, id: UserId) -> Option<UserDisplay> {
        self.users.get(&id.0).map(|u| UserDisplay {
            name: u.name.clone(),
            avatar: u.avatar.clone(),
        })
    }

    async fn chat_address(&self, id: UserId) -> Option<ChatId> {
        self.users
            .get(&id.0)
            .and_then(|u| u.telegram_chat_id)
            .map(ChatId)
    }
}

#[async_trait]
impl EntitySnapshotProvider for StaticDirectory {
    async fn snapshot(&self, entity: EntityId) -> Result<EntitySnapshot> {
        let order = self
            .orders
            .get(&entity.0)
            .ok_or_else(|| Error::resolution(entity, "entity not found"))?;
        let creator = order
            .creator_id
            .ok_or_else(|| Error::resolution(entity, "entity has no creator"))?;
        Ok(EntitySnapshot {
            entity_id: entity,
            creator_id: UserId(creator),
            assignee_id: order.assignee_id.map(UserId),
            title: order.title.clone(),
        })
    }
}
