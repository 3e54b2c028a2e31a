//! Per-recipient fan-out over the two delivery channels.
//!
//! Every call is isolated: a failure is logged with recipient, channel and
//! group, and never stops the sibling channel or the next recipient.

pub mod throttled;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    compose::Composed,
    domain::Recipient,
    events::EventGroupKey,
    ports::{PayloadSink, TextSink},
};

/// Result of one channel call for one recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelOutcome {
    Sent,
    /// Channel disabled, or recipient has no address on it.
    Skipped,
    Failed(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelTally {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ChannelTally {
    fn record(&mut self, outcome: &ChannelOutcome) {
        match outcome {
            ChannelOutcome::Sent => self.sent += 1,
            ChannelOutcome::Skipped => self.skipped += 1,
            ChannelOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Per-flush delivery summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub recipients: usize,
    pub text: ChannelTally,
    pub feed: ChannelTally,
}

impl DeliveryReport {
    pub fn record(&mut self, text: &ChannelOutcome, feed: &ChannelOutcome) {
        self.recipients += 1;
        self.text.record(text);
        self.feed.record(feed);
    }
}

#[derive(Clone, Default)]
pub struct DeliveryGateway {
    text: Option<Arc<dyn TextSink>>,
    feed: Option<Arc<dyn PayloadSink>>,
}

impl DeliveryGateway {
    pub fn new(text: Option<Arc<dyn TextSink>>, feed: Option<Arc<dyn PayloadSink>>) -> Self {
        Self { text, feed }
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if let Some(t) = &self.text {
            out.push(t.name());
        }
        if let Some(f) = &self.feed {
            out.push(f.name());
        }
        out
    }

    /// Send both channels for one recipient concurrently.
    pub async fn deliver(
        &self,
        key: &EventGroupKey,
        recipient: &Recipient,
        composed: &Composed,
    ) -> (ChannelOutcome, ChannelOutcome) {
        tokio::join!(
            self.send_text(key, recipient, &composed.text),
            self.push_feed(key, recipient, composed),
        )
    }

    async fn send_text(
        &self,
        key: &EventGroupKey,
        recipient: &Recipient,
        html: &str,
    ) -> ChannelOutcome {
        let Some(sink) = &self.text else {
            return ChannelOutcome::Skipped;
        };
        let Some(chat_id) = recipient.chat_id else {
            debug!(group = %key, recipient = %recipient.user_id, "no chat address; text skipped");
            return ChannelOutcome::Skipped;
        };
        match sink.send_text(chat_id, html).await {
            Ok(()) => ChannelOutcome::Sent,
            Err(e) => {
                warn!(
                    group = %key,
                    recipient = %recipient.user_id,
                    channel = sink.name(),
                    error = %e,
                    "text delivery failed"
                );
                ChannelOutcome::Failed(e.to_string())
            }
        }
    }

    async fn push_feed(
        &self,
        key: &EventGroupKey,
        recipient: &Recipient,
        composed: &Composed,
    ) -> ChannelOutcome {
        let Some(sink) = &self.feed else {
            return ChannelOutcome::Skipped;
        };
        match sink.push_payload(recipient.user_id, &composed.payload).await {
            Ok(()) => ChannelOutcome::Sent,
            Err(e) => {
                warn!(
                    group = %key,
                    recipient = %recipient.user_id,
                    channel = sink.name(),
                    error = %e,
                    "feed delivery failed"
                );
                ChannelOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::{
        domain::{ChatId, UserId},
        errors::Error,
        payload::NotificationPayload,
        ports::{PayloadSink, TextSink},
        Result,
    };

    /// Records every call; fails for the listed addresses.
    #[derive(Default)]
    pub struct RecordingText {
        pub sent: Mutex<Vec<(ChatId, String)>>,
        pub fail_for: Vec<ChatId>,
    }

    #[async_trait]
    impl TextSink for RecordingText {
        fn name(&self) -> &'static str {
            "fake-text"
        }

        async fn send_text(&self, chat_id: ChatId, html: &str) -> Result<()> {
            if self.fail_for.contains(&chat_id) {
                return Err(Error::delivery("fake-text", "chat blocked the bot"));
            }
            self.sent.lock().unwrap().push((chat_id, html.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingFeed {
        pub pushed: Mutex<Vec<(UserId, NotificationPayload)>>,
        pub fail_for: Vec<UserId>,
    }

    #[async_trait]
    impl PayloadSink for RecordingFeed {
        fn name(&self) -> &'static str {
            "fake-feed"
        }

        async fn push_payload(&self, user_id: UserId, payload: &NotificationPayload) -> Result<()> {
            if self.fail_for.contains(&user_id) {
                return Err(Error::Timeout {
                    channel: "fake-feed",
                });
            }
            self.pushed.lock().unwrap().push((user_id, payload.clone()));
            Ok(())
        }
    }
}
