use std::{sync::Arc, time::Duration};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hdn_core::{
    aggregation::AggregationBuffer,
    config::Config,
    delivery::{throttled::ThrottledTextSink, DeliveryGateway},
    directory::StaticDirectory,
    events::HistoryEvent,
    pipeline::NotificationPipeline,
    ports::{PayloadSink, TextSink},
};
use hdn_feed::HttpFeedSink;
use hdn_telegram::TelegramTextSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hdn_core::logging::init("hdn")?;

    let cfg = Config::load()?;
    let directory = Arc::new(StaticDirectory::load(&cfg.directory_path)?);
    info!(
        path = %cfg.directory_path.display(),
        users = directory.user_count(),
        orders = directory.order_count(),
        "directory loaded"
    );

    let gateway = build_gateway(&cfg)?;
    let channels = gateway.channel_names();
    if channels.is_empty() {
        warn!("no delivery channel configured; groups will be resolved and dropped");
    }
    info!(
        ?channels,
        window_ms = cfg.debounce_window.as_millis() as u64,
        uncorrelated = ?cfg.uncorrelated,
        "notifier started"
    );

    let pipeline = Arc::new(NotificationPipeline::new(
        directory.clone(),
        directory,
        cfg.compose(),
        gateway,
    ));
    let buffer = AggregationBuffer::new(cfg.aggregation(), pipeline)?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let mut interrupted = ingest_stdin(&buffer, &shutdown).await?;
    if !interrupted {
        let budget = cfg.debounce_window + cfg.delivery_timeout * 2;
        interrupted = !drain(&buffer, budget, &shutdown).await;
    }
    let discarded = if interrupted {
        buffer.abort_pending().await
    } else {
        0
    };

    let stats = buffer.stats();
    let lost = discarded + buffer.in_flight();
    if lost > 0 {
        // No outbox: anything still buffered or delivering dies with the process.
        warn!(
            lost_groups = lost,
            discarded,
            pending = buffer.pending_groups(),
            "exiting with unflushed groups; their notifications are lost"
        );
    }
    info!(
        ingested = stats.ingested,
        groups = stats.groups_opened,
        flushed = stats.groups_flushed,
        "notifier stopped"
    );
    Ok(())
}

fn build_gateway(cfg: &Config) -> anyhow::Result<DeliveryGateway> {
    let text: Option<Arc<dyn TextSink>> = cfg.telegram_bot_token.as_ref().map(|token| {
        let raw: Arc<dyn TextSink> =
            Arc::new(TelegramTextSink::new(token.clone(), cfg.delivery_timeout));
        Arc::new(ThrottledTextSink::new(raw, cfg.throttle())) as Arc<dyn TextSink>
    });

    let feed: Option<Arc<dyn PayloadSink>> = match &cfg.feed_push_url {
        Some(url) => Some(Arc::new(HttpFeedSink::new(
            url.clone(),
            cfg.feed_push_token.clone(),
            cfg.delivery_timeout,
        )?) as Arc<dyn PayloadSink>),
        None => None,
    };

    Ok(DeliveryGateway::new(text, feed))
}

/// Feed newline-delimited JSON events into the buffer until EOF or shutdown.
///
/// Returns `true` when interrupted.
async fn ingest_stdin(
    buffer: &Arc<AggregationBuffer>,
    shutdown: &CancellationToken,
) -> anyhow::Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(true),
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(false);
                };
                if let Some(event) = parse_event(&line) {
                    buffer.ingest(event);
                }
            }
        }
    }
}

fn parse_event(line: &str) -> Option<HistoryEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(ev) => Some(ev),
        Err(e) => {
            warn!(error = %e, "skipping malformed event line");
            None
        }
    }
}

/// Wait for scheduled flushes to finish, bounded by `budget`.
///
/// Returns `false` when interrupted.
async fn drain(buffer: &AggregationBuffer, budget: Duration, shutdown: &CancellationToken) -> bool {
    let deadline = Instant::now() + budget;
    while buffer.in_flight() > 0 && Instant::now() < deadline {
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = sleep(Duration::from_millis(100)) => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_lines() {
        assert!(parse_event("   ").is_none());
        assert!(parse_event("{not json").is_none());
        let ev = parse_event(
            r#"{"entity_id":1,"actor_id":2,"kind":"CREATE","created_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(ev.entity_id.0, 1);
    }
}
