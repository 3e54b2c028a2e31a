//! Message Composer: one flushed group + one recipient -> channel-A text and channel-B payload.
//!
//! Foreign keys are resolved once per flush into a [`RefBook`]; composing for
//! each recipient is then a pure function of its inputs.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::{
    domain::{EntityId, EntitySnapshot, PriorityId, StatusId, UserDisplay, UserId},
    events::{EventKind, HistoryEvent, ReferencedEntity},
    formatting::{bold, escape_html, format_deadline, italic, join_url, link, truncate_one_line},
    payload::{Change, Links, NotificationPayload, PayloadActor, PAYLOAD_KIND},
    ports::ReferenceResolver,
    recipients::primary_actor,
};

const MAX_COMMENT_CHARS: usize = 500;
const SYSTEM_ACTOR: &str = "System";
const UNKNOWN_USER: &str = "Unknown user";

#[derive(Clone, Debug)]
pub struct ComposeConfig {
    pub order_url_base: String,
    pub attachment_url_base: String,
}

impl ComposeConfig {
    pub fn order_url(&self, entity: EntityId) -> String {
        join_url(&self.order_url_base, &entity.to_string())
    }

    pub fn attachment_url(&self, file_ref: &str) -> String {
        join_url(&self.attachment_url_base, file_ref)
    }
}

/// Names for every foreign key a group mentions. Misses are simply absent.
#[derive(Clone, Debug, Default)]
pub struct RefBook {
    statuses: HashMap<StatusId, String>,
    priorities: HashMap<PriorityId, String>,
    users: HashMap<UserId, UserDisplay>,
}

impl RefBook {
    pub async fn collect(events: &[HistoryEvent], resolver: &dyn ReferenceResolver) -> Self {
        let mut book = Self::default();
        for ev in events {
            if let Some(actor) = ev.actor_id {
                book.resolve(ReferencedEntity::User(actor), resolver).await;
            }
            for r in [ev.old_ref(), ev.new_ref()].into_iter().flatten() {
                book.resolve(r, resolver).await;
            }
        }
        book
    }

    async fn resolve(&mut self, r: ReferencedEntity, resolver: &dyn ReferenceResolver) {
        match r {
            ReferencedEntity::Status(id) => {
                if self.statuses.contains_key(&id) {
                    return;
                }
                match resolver.status_name(id).await {
                    Some(name) => {
                        self.statuses.insert(id, name);
                    }
                    None => debug!(status = id.0, "status lookup miss"),
                }
            }
            ReferencedEntity::Priority(id) => {
                if self.priorities.contains_key(&id) {
                    return;
                }
                match resolver.priority_name(id).await {
                    Some(name) => {
                        self.priorities.insert(id, name);
                    }
                    None => debug!(priority = id.0, "priority lookup miss"),
                }
            }
            ReferencedEntity::User(id) => {
                if self.users.contains_key(&id) {
                    return;
                }
                match resolver.user_display(id).await {
                    Some(display) => {
                        self.users.insert(id, display);
                    }
                    None => debug!(user = id.0, "user lookup miss"),
                }
            }
        }
    }

    pub fn status(&self, id: StatusId) -> Option<&str> {
        self.statuses.get(&id).map(String::as_str)
    }

    pub fn priority(&self, id: PriorityId) -> Option<&str> {
        self.priorities.get(&id).map(String::as_str)
    }

    pub fn user(&self, id: UserId) -> Option<&UserDisplay> {
        self.users.get(&id)
    }

    fn name_of(&self, r: Option<ReferencedEntity>) -> Option<&str> {
        match r? {
            ReferencedEntity::Status(id) => self.status(id),
            ReferencedEntity::Priority(id) => self.priority(id),
            ReferencedEntity::User(id) => self.user(id).map(|u| u.name.as_str()),
        }
    }

    fn actor_name(&self, actor: Option<UserId>) -> &str {
        match actor {
            None => SYSTEM_ACTOR,
            Some(id) => self.user(id).map(|u| u.name.as_str()).unwrap_or(UNKNOWN_USER),
        }
    }
}

/// One rendered detail: plain text for the feed, HTML for Telegram.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Detail {
    kind: EventKind,
    text: String,
    html: String,
}

#[derive(Clone, Debug)]
pub struct Composed {
    pub text: String,
    pub payload: NotificationPayload,
}

pub fn compose(
    events: &[HistoryEvent],
    snapshot: &EntitySnapshot,
    refs: &RefBook,
    recipient: UserId,
    cfg: &ComposeConfig,
) -> Composed {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|e| e.created_at);

    let actor = primary_actor(&sorted);
    let actor_name = refs.actor_name(actor);
    let created = sorted.first().map(|e| e.kind) == Some(EventKind::Create);

    let (headline_text, headline_html) = headline(snapshot, actor_name, created);
    let details = details(&sorted, refs, recipient, cfg);

    let order_url = cfg.order_url(snapshot.entity_id);
    let attachment_url = sorted
        .iter()
        .rev()
        .find_map(|e| e.attachment.as_ref())
        .map(|a| cfg.attachment_url(&a.file_ref));

    // Field changes first, then comments and attachments; each block stays chronological.
    let (fields, notes): (Vec<&Detail>, Vec<&Detail>) =
        details.iter().partition(|d| d.kind.collapses());
    let mut text = headline_html;
    for block in [fields, notes] {
        if block.is_empty() {
            continue;
        }
        text.push_str("\n\n");
        text.push_str(
            &block
                .iter()
                .map(|d| d.html.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    text.push_str("\n\n");
    text.push_str(&link(
        &order_url,
        &format!("Open order #{}", snapshot.entity_id),
    ));

    let payload = NotificationPayload {
        event_id: Uuid::new_v4(),
        kind: PAYLOAD_KIND.to_string(),
        is_read: false,
        actor: PayloadActor {
            name: actor_name.to_string(),
            avatar: actor
                .and_then(|a| refs.user(a))
                .and_then(|u| u.avatar.clone()),
        },
        message: headline_text,
        changes: details
            .into_iter()
            .map(|d| Change {
                kind: d.kind,
                text: d.text,
            })
            .collect(),
        links: Links {
            primary: order_url,
            attachment: attachment_url,
        },
        created_at: sorted.first().map(|e| e.created_at).unwrap_or_default(),
    };

    Composed { text, payload }
}

fn headline(snapshot: &EntitySnapshot, actor: &str, created: bool) -> (String, String) {
    let verb = if created { "created" } else { "updated" };
    let emoji = if created { "🆕" } else { "🔄" };
    let order = format!("order #{}", snapshot.entity_id);
    let title = snapshot.title.trim();

    if title.is_empty() {
        (
            format!("{actor} {verb} {order}"),
            format!("{emoji} {} {verb} {}", bold(actor), bold(&order)),
        )
    } else {
        (
            format!("{actor} {verb} {order}: {title}"),
            format!(
                "{emoji} {} {verb} {}: {}",
                bold(actor),
                bold(&order),
                escape_html(title)
            ),
        )
    }
}

/// Chronological details; collapsing kinds keep only their final value, at its final position.
fn details(
    events: &[HistoryEvent],
    refs: &RefBook,
    recipient: UserId,
    cfg: &ComposeConfig,
) -> Vec<Detail> {
    let mut out: Vec<Detail> = Vec::new();
    for ev in events {
        if ev.kind.collapses() {
            out.retain(|d| d.kind != ev.kind);
        }
        if let Some(d) = detail(ev, refs, recipient, cfg) {
            out.push(d);
        }
    }
    out
}

fn detail(
    ev: &HistoryEvent,
    refs: &RefBook,
    recipient: UserId,
    cfg: &ComposeConfig,
) -> Option<Detail> {
    let kind = ev.kind;
    match kind {
        EventKind::Create => None,
        EventKind::StatusChange => transition(ev, refs, "📌", "Status"),
        EventKind::PriorityChange => transition(ev, refs, "⚡", "Priority"),
        EventKind::Delegation => {
            let assignee = ev.new_assignee()?;
            if assignee == recipient {
                return Some(Detail {
                    kind,
                    text: "Assigned to you".to_string(),
                    html: format!("👤 {}", bold("Assigned to you")),
                });
            }
            let name = refs.user(assignee)?.name.as_str();
            Some(Detail {
                kind,
                text: format!("Assignee: {name}"),
                html: format!("👤 Assignee: {}", bold(name)),
            })
        }
        EventKind::DurationChange => {
            let raw = ev.new_value.as_deref().filter(|v| !v.trim().is_empty())?;
            let deadline = format_deadline(raw);
            Some(Detail {
                kind,
                text: format!("Deadline: {deadline}"),
                html: format!("⏰ Deadline: {}", bold(&deadline)),
            })
        }
        EventKind::Comment => {
            let body = ev.comment.as_deref().filter(|c| !c.trim().is_empty())?;
            let body = truncate_one_line(body, MAX_COMMENT_CHARS);
            let author = refs.actor_name(ev.actor_id);
            Some(Detail {
                kind,
                text: format!("{author}: {body}"),
                html: format!("💬 {}: {}", bold(author), italic(&body)),
            })
        }
        EventKind::AttachmentAdd => {
            let att = ev.attachment.as_ref()?;
            Some(Detail {
                kind,
                text: format!("Attachment: {}", att.file_name),
                html: format!(
                    "📎 {}",
                    link(&cfg.attachment_url(&att.file_ref), &att.file_name)
                ),
            })
        }
    }
}

fn transition(ev: &HistoryEvent, refs: &RefBook, emoji: &str, label: &str) -> Option<Detail> {
    let new = refs.name_of(ev.new_ref())?;
    let (text, html) = match refs.name_of(ev.old_ref()) {
        Some(old) if old != new => (
            format!("{label}: {old} → {new}"),
            format!("{emoji} {label}: {} → {}", escape_html(old), bold(new)),
        ),
        _ => (
            format!("{label}: {new}"),
            format!("{emoji} {label}: {}", bold(new)),
        ),
    };
    Some(Detail {
        kind: ev.kind,
        text,
        html,
    })
}
