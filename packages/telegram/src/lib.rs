#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Minimal Telegram Bot API client.
//!
//! Only the two calls `SkyGuard` needs are implemented: `sendMessage` for
//! alerts and bot replies, and long-polling `getUpdates` for the bot.
//!
//! See <https://core.telegram.org/bots/api>

pub mod bot;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use skyguard_notify::NotificationSender;

/// Default Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Timeout for ordinary API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side long-poll duration for `getUpdates`, in seconds.
pub const LONG_POLL_SECS: u64 = 30;

/// Errors from the Bot API client.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    /// HTTP transport failure. The request URL is stripped, since it
    /// carries the bot token.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// The API answered with `ok: false`.
    #[error("Telegram API error: {description}")]
    Api {
        /// Description returned by the API.
        description: String,
    },

    /// The client is not configured.
    #[error("Configuration error: {message}")]
    Config {
        /// What is missing.
        message: String,
    },
}

impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<Option<T>, TelegramError> {
        if self.ok {
            Ok(self.result)
        } else {
            Err(TelegramError::Api {
                description: self
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

/// One incoming update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Update {
    /// Monotonic update id.
    pub update_id: i64,
    /// New incoming message, if this update carries one.
    pub message: Option<Message>,
}

/// An incoming chat message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Message {
    /// Chat the message was sent in.
    pub chat: Chat,
    /// Message text, absent for stickers, photos, etc.
    pub text: Option<String>,
}

/// A chat.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Chat {
    /// Chat id.
    pub id: i64,
}

/// Bot API client bound to one bot token.
#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    /// Creates a client for `token` against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Config`] for an empty token, or
    /// [`TelegramError::Http`] if the HTTP client cannot be built.
    pub fn new(token: &str) -> Result<Self, TelegramError> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Creates a client against a custom API endpoint.
    ///
    /// # Errors
    ///
    /// Same as [`TelegramClient::new`].
    pub fn with_api_base(token: &str, api_base: &str) -> Result<Self, TelegramError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TelegramError::Config {
                message: "bot token is empty".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("skyguard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Creates a client against `api_base` with the token from the
    /// `TELEGRAM_BOT_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Config`] if the variable is unset or empty.
    pub fn from_env(api_base: &str) -> Result<Self, TelegramError> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").map_err(|_| TelegramError::Config {
            message: "TELEGRAM_BOT_TOKEN is not set".to_string(),
        })?;
        Self::with_api_base(&token, api_base)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    /// Sends an HTML-formatted message to `chat_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError`] if the request fails or the API rejects
    /// the message.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TelegramError> {
        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        let status = resp.status();
        let body: ApiResponse<serde_json::Value> = resp.json().await?;
        body.into_result()?;

        if status != reqwest::StatusCode::OK {
            return Err(TelegramError::Api {
                description: format!("unexpected HTTP status {status}"),
            });
        }

        Ok(())
    }

    /// Long-polls for updates with ids of at least `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError`] if the request fails or the API reports an
    /// error.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        let resp = self
            .client
            .get(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(LONG_POLL_SECS + 5))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", LONG_POLL_SECS.to_string()),
            ])
            .send()
            .await?;

        let body: ApiResponse<Vec<Update>> = resp.json().await?;
        Ok(body.into_result()?.unwrap_or_default())
    }
}

#[async_trait]
impl NotificationSender for TelegramClient {
    async fn send(&self, channel_id: &str, message: &str) -> bool {
        match self.send_message(channel_id, message).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Telegram delivery to {channel_id} failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_updates() {
        let body: ApiResponse<Vec<Update>> = serde_json::from_value(serde_json::json!({
            "ok": true,
            "result": [
                {
                    "update_id": 10,
                    "message": {
                        "message_id": 1,
                        "from": {"id": 5, "is_bot": false, "first_name": "A"},
                        "chat": {"id": 12345, "type": "private"},
                        "date": 0,
                        "text": "/start ABCD1234"
                    }
                },
                {"update_id": 11, "edited_message": {}}
            ]
        }))
        .unwrap();

        let updates = body.into_result().unwrap().unwrap();
        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, 12345);
        assert_eq!(message.text.as_deref(), Some("/start ABCD1234"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn api_error_is_reported() {
        let body: ApiResponse<Vec<Update>> = serde_json::from_value(serde_json::json!({
            "ok": false,
            "error_code": 401,
            "description": "Unauthorized"
        }))
        .unwrap();

        match body.into_result() {
            Err(TelegramError::Api { description }) => assert_eq!(description, "Unauthorized"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(
            TelegramClient::new("  "),
            Err(TelegramError::Config { .. })
        ));
    }

    #[test]
    fn builds_method_urls() {
        let client = TelegramClient::with_api_base("123:abc", "http://localhost:8081/").unwrap();
        assert_eq!(
            client.method_url("sendMessage"),
            "http://localhost:8081/bot123:abc/sendMessage"
        );
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_the_token() {
        let client =
            TelegramClient::with_api_base("123:very-secret-token", "http://127.0.0.1:1").unwrap();

        let err = client.send_message("42", "test").await.unwrap_err();

        assert!(matches!(err, TelegramError::Http(_)));
        assert!(!err.to_string().contains("very-secret-token"), "{err}");
        assert!(!format!("{err:?}").contains("very-secret-token"), "{err:?}");
    }
}
