//! Outbound spacing for channel A.
//!
//! Several groups can flush at once and land on the same chat. Sends are
//! given a start slot that respects a global spacing and a per-chat spacing;
//! a send whose slot is further away than `max_wait` fails with a timeout
//! instead of queueing past the delivery budget.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::{domain::ChatId, errors::Error, ports::TextSink, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Spacing between any two sends.
    pub global_interval: Duration,
    /// Spacing between sends to the same chat.
    pub per_chat_interval: Duration,
    /// Longest a send may wait for its slot.
    pub max_wait: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_interval: Duration::from_millis(40),
            per_chat_interval: Duration::from_millis(1050),
            max_wait: Duration::from_secs(10),
        }
    }
}

/// Next free start instant, globally and per chat.
#[derive(Debug)]
struct Slots {
    global_free: Instant,
    chat_free: HashMap<ChatId, Instant>,
}

impl Slots {
    /// Book the earliest slot for `chat_id`, or `None` when it is beyond `max_wait`.
    ///
    /// A refused booking leaves the schedule untouched. Chats whose last slot
    /// has passed are forgotten.
    fn book(&mut self, chat_id: ChatId, cfg: &ThrottleConfig, now: Instant) -> Option<Instant> {
        self.chat_free.retain(|_, free| *free > now);

        let chat_free = self.chat_free.get(&chat_id).copied().unwrap_or(now);
        let start = now.max(self.global_free).max(chat_free);
        if start - now > cfg.max_wait {
            return None;
        }

        self.global_free = start + cfg.global_interval;
        self.chat_free.insert(chat_id, start + cfg.per_chat_interval);
        Some(start)
    }
}

/// `TextSink` decorator that delays each send until its booked slot.
pub struct ThrottledTextSink {
    inner: Arc<dyn TextSink>,
    cfg: ThrottleConfig,
    slots: Mutex<Slots>,
}

impl ThrottledTextSink {
    pub fn new(inner: Arc<dyn TextSink>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            slots: Mutex::new(Slots {
                global_free: Instant::now(),
                chat_free: HashMap::new(),
            }),
        }
    }

    /// Chats that still have a future slot booked.
    pub fn tracked_chats(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chat_free
            .len()
    }

    fn book(&self, chat_id: ChatId) -> Option<Instant> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.book(chat_id, &self.cfg, Instant::now())
    }
}

#[async_trait]
impl TextSink for ThrottledTextSink {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn send_text(&self, chat_id: ChatId, html: &str) -> Result<()> {
        let Some(start) = self.book(chat_id) else {
            debug!(chat = %chat_id, "send slot beyond wait budget");
            return Err(Error::Timeout {
                channel: self.inner.name(),
            });
        };
        sleep_until(start).await;
        self.inner.send_text(chat_id, html).await
    }
}
