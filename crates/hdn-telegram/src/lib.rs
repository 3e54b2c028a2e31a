//! Telegram adapter (teloxide).
//!
//! Implements the `hdn-core` channel-A `TextSink` over the Telegram Bot API.

use std::{future::Future, time::Duration};

use async_trait::async_trait;

use teloxide::{prelude::*, types::ParseMode};

use tokio::time::{sleep, timeout};
use tracing::debug;

use hdn_core::{domain::ChatId, errors::Error, ports::TextSink, Result};

const CHANNEL: &str = "telegram";

#[derive(Clone)]
pub struct TelegramTextSink {
    bot: Bot,
    timeout: Duration,
}

impl TelegramTextSink {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Self {
        Self::from_bot(Bot::new(token), timeout)
    }

    pub fn from_bot(bot: Bot, timeout: Duration) -> Self {
        Self { bot, timeout }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::delivery(CHANNEL, e.to_string())
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        debug!(retry_after_ms = d.as_millis() as u64, "telegram flood wait");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

/// Bound a delivery call; elapsing is reported as `Error::Timeout`.
pub async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout { channel: CHANNEL }),
    }
}

#[async_trait]
impl TextSink for TelegramTextSink {
    fn name(&self) -> &'static str {
        CHANNEL
    }

    async fn send_text(&self, chat_id: ChatId, html: &str) -> Result<()> {
        let send = self.with_retry(|| {
            self.bot
                .send_message(Self::tg_chat(chat_id), html.to_string())
                .parse_mode(ParseMode::Html)
                .disable_web_page_preview(true)
        });
        bounded(self.timeout, send).await?;
        Ok(())
    }
}
