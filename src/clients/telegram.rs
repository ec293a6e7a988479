//! Notification transport. Messages are MarkdownV2; the reserved character
//! set is escaped exactly once here, at the final egress.

use std::time::Duration;

use anyhow::{bail, Result};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

const ESCAPE_CHARS: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

#[must_use]
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if ESCAPE_CHARS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub default_chat_id: Option<String>,
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    config: TelegramConfig,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig, proxy_url: Option<&str>) -> Result<Self> {
        let client = super::build_http_client(Duration::from_secs(20), proxy_url)?;
        Ok(Self { client, config })
    }

    fn api(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.config.bot_token
        )
    }

    #[must_use]
    pub fn default_chat_id(&self) -> Option<&str> {
        self.config.default_chat_id.as_deref()
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": escape_markdown_v2(text),
            "parse_mode": "MarkdownV2",
        });
        let response = self
            .client
            .post(self.api("sendMessage"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("telegram sendMessage failed: {}", response.status());
        }
        debug!(chat_id, "notification sent");
        Ok(())
    }

    pub async fn send_photo(&self, chat_id: &str, photo_url: &str, caption: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "photo": photo_url,
            "caption": escape_markdown_v2(caption),
            "parse_mode": "MarkdownV2",
        });
        let response = self
            .client
            .post(self.api("sendPhoto"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("telegram sendPhoto failed: {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_every_reserved_char_once() {
        assert_eq!(escape_markdown_v2("a_b"), "a\\_b");
        assert_eq!(
            escape_markdown_v2("_*[]()~`>#+-=|{}.!"),
            "\\_\\*\\[\\]\\(\\)\\~\\`\\>\\#\\+\\-\\=\\|\\{\\}\\.\\!"
        );
        assert_eq!(escape_markdown_v2("纯文本 plain"), "纯文本 plain");
    }
}
