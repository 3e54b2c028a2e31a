//! Who should be told about a flushed group.
//!
//! Start from the entity's creator and current assignee, add every event author
//! and every assignee a DELEGATION took the entity away from, then drop the
//! group's primary actor so nobody is notified about their own change.

use std::{collections::HashSet, sync::Arc};

use tracing::debug;

use crate::{
    domain::{EntityId, EntitySnapshot, Recipient, UserId},
    events::{EventKind, HistoryEvent},
    ports::{EntitySnapshotProvider, ReferenceResolver},
    Result,
};

/// Actor of the chronologically first event that has one; ties keep arrival order.
///
/// System events (no actor) never define the primary actor, so a human acting
/// after a system change in the same group is still excluded from recipients.
pub fn primary_actor(events: &[HistoryEvent]) -> Option<UserId> {
    events
        .iter()
        .enumerate()
        .filter_map(|(idx, e)| e.actor_id.map(|actor| (e.created_at, idx, actor)))
        .min_by_key(|(created_at, idx, _)| (*created_at, *idx))
        .map(|(_, _, actor)| actor)
}

/// Distinct users to notify, in first-seen order.
pub fn stakeholders(events: &[HistoryEvent], snapshot: &EntitySnapshot) -> Vec<UserId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut add = |u: UserId| {
        if seen.insert(u) {
            out.push(u);
        }
    };

    add(snapshot.creator_id);
    if let Some(a) = snapshot.assignee_id {
        add(a);
    }

    for ev in events {
        if let Some(actor) = ev.actor_id {
            add(actor);
        }
        if ev.kind == EventKind::Delegation {
            if let Some(prev) = ev.previous_assignee() {
                add(prev);
            }
        }
    }

    if let Some(actor) = primary_actor(events) {
        out.retain(|u| *u != actor);
    }
    out
}

#[derive(Clone, Debug)]
pub struct ResolvedRecipients {
    pub snapshot: EntitySnapshot,
    pub recipients: Vec<Recipient>,
}

pub struct RecipientResolver {
    snapshots: Arc<dyn EntitySnapshotProvider>,
    refs: Arc<dyn ReferenceResolver>,
}

impl RecipientResolver {
    pub fn new(
        snapshots: Arc<dyn EntitySnapshotProvider>,
        refs: Arc<dyn ReferenceResolver>,
    ) -> Self {
        Self { snapshots, refs }
    }

    /// Errors only when the entity itself cannot be resolved; an empty set is fine.
    pub async fn resolve(
        &self,
        entity: EntityId,
        events: &[HistoryEvent],
    ) -> Result<ResolvedRecipients> {
        let snapshot = self.snapshots.snapshot(entity).await?;
        let users = stakeholders(events, &snapshot);

        let mut recipients = Vec::with_capacity(users.len());
        for user_id in users {
            let chat_id = self.refs.chat_address(user_id).await;
            if chat_id.is_none() {
                debug!(recipient = %user_id, "no chat address; channel A skipped");
            }
            recipients.push(Recipient { user_id, chat_id });
        }

        Ok(ResolvedRecipients {
            snapshot,
            recipients,
        })
    }
}
