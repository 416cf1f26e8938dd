//! Telegram Bot API client used as the messaging sink.
//!
//! The engine treats message delivery as fire-and-forget per call: each
//! `send_message` reports success or failure for that one recipient and
//! nothing is retried here. Duplicate deliveries are possible by design
//! because failed cycles re-evaluate the same events on the next tick.

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::json;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Telegram API error (status {status}): {description}")]
    Api {
        status: StatusCode,
        description: String,
    },
}

/// A single inline-keyboard button pointing at an external URL, attached
/// below an alert message.
#[derive(Debug, Clone)]
pub struct InlineLink {
    pub text: &'static str,
    pub url: Url,
}

/// Messaging sink abstraction. The production implementation talks to the
/// Telegram Bot API; tests substitute a recording mock.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        link: Option<&InlineLink>,
    ) -> Result<(), TelegramError>;
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<serde_json::Value>,
}

#[derive(serde::Deserialize)]
struct SendMessageResponse {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramClient {
    client: Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String, base_url: Option<Url>) -> Result<Self, TelegramError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url
                .map_or_else(|| DEFAULT_BASE_URL.to_string(), |url| url.to_string())
                .trim_end_matches('/')
                .to_string(),
            token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        link: Option<&InlineLink>,
    ) -> Result<(), TelegramError> {
        let reply_markup = link.map(|link| {
            json!({
                "inline_keyboard": [[{ "text": link.text, "url": link.url.as_str() }]]
            })
        });

        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
            reply_markup,
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let description = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TelegramError::Api {
                status,
                description,
            });
        }

        let body: SendMessageResponse = response.json().await?;
        if !body.ok {
            return Err(TelegramError::Api {
                status,
                description: body
                    .description
                    .unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        Ok(())
    }
}
