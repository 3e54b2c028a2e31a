//! Flush pipeline: recipients -> per-recipient composition -> delivery.
//!
//! Resolution failures drop the whole group (a wrong recipient set is worse
//! than none). Everything after that is recipient/channel local.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::{
    compose::{compose, ComposeConfig, RefBook},
    delivery::{DeliveryGateway, DeliveryReport},
    events::{EventGroupKey, HistoryEvent},
    ports::{EntitySnapshotProvider, FlushHandler, ReferenceResolver},
    recipients::RecipientResolver,
    Result,
};

pub struct NotificationPipeline {
    recipients: RecipientResolver,
    refs: Arc<dyn ReferenceResolver>,
    compose: ComposeConfig,
    gateway: DeliveryGateway,
}

impl NotificationPipeline {
    pub fn new(
        snapshots: Arc<dyn EntitySnapshotProvider>,
        refs: Arc<dyn ReferenceResolver>,
        compose: ComposeConfig,
        gateway: DeliveryGateway,
    ) -> Self {
        Self {
            recipients: RecipientResolver::new(snapshots, refs.clone()),
            refs,
            compose,
            gateway,
        }
    }

    /// Notify everyone concerned by one flushed group.
    pub async fn notify(
        &self,
        key: &EventGroupKey,
        events: &[HistoryEvent],
    ) -> Result<DeliveryReport> {
        let resolved = self.recipients.resolve(key.entity_id, events).await?;
        let mut report = DeliveryReport::default();
        if resolved.recipients.is_empty() {
            debug!(group = %key, "no recipients after removing actor");
            return Ok(report);
        }

        let refs = RefBook::collect(events, self.refs.as_ref()).await;
        for recipient in &resolved.recipients {
            let composed = compose(
                events,
                &resolved.snapshot,
                &refs,
                recipient.user_id,
                &self.compose,
            );
            let (text, feed) = self.gateway.deliver(key, recipient, &composed).await;
            report.record(&text, &feed);
        }
        Ok(report)
    }
}

#[async_trait]
impl FlushHandler for NotificationPipeline {
    async fn handle(&self, key: EventGroupKey, events: Vec<HistoryEvent>) {
        match self.notify(&key, &events).await {
            Ok(report) => info!(
                group = %key,
                events = events.len(),
                recipients = report.recipients,
                text_sent = report.text.sent,
                text_failed = report.text.failed,
                feed_sent = report.feed.sent,
                feed_failed = report.feed.failed,
                "group notified"
            ),
            Err(e) => error!(group = %key, error = %e, "recipient resolution failed; group dropped"),
        }
    }
}
