//! Notification sinks
//!
//! - `TelegramSink`: Bot API `sendVideo` (media + caption) / `sendMessage`
//! - `LogSink`: writes notifications to the log (no bot token configured)

use super::types::ChannelId;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Http(err.to_string())
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, channel: ChannelId, text: &str, media: Option<&str>) -> Result<(), SinkError>;
}

#[derive(Debug, Deserialize)]
struct TelegramReply {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramSink {
    api_base: String,
    http: reqwest::Client,
}

impl TelegramSink {
    pub fn new(bot_token: &str, timeout: Duration) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_base: format!("https://api.telegram.org/bot{}", bot_token),
            http,
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, channel: ChannelId, text: &str, media: Option<&str>) -> Result<(), SinkError> {
        let chat_id = channel.to_string();
        let request = match media {
            Some(video) => self.http.post(format!("{}/sendVideo", self.api_base)).form(&[
                ("chat_id", chat_id.as_str()),
                ("video", video),
                ("caption", text),
                ("parse_mode", "Markdown"),
            ]),
            None => self.http.post(format!("{}/sendMessage", self.api_base)).form(&[
                ("chat_id", chat_id.as_str()),
                ("text", text),
                ("parse_mode", "Markdown"),
            ]),
        };

        let reply: TelegramReply = request.send().await?.json().await?;
        if reply.ok {
            Ok(())
        } else {
            Err(SinkError::Api(
                reply.description.unwrap_or_else(|| "unknown Telegram error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, channel: ChannelId, text: &str, media: Option<&str>) -> Result<(), SinkError> {
        log::info!("📨 [chat {}] {}{}", channel, text.replace('\n', " | "), media.map(|m| format!(" <{}>", m)).unwrap_or_default());
        Ok(())
    }
}
