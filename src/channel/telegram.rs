//! Telegram channel provider.
//!
//! The Bot API transport sits behind the `TelegramTransport` trait so the
//! provider's failure classification is testable without the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::TelegramConfig;
use crate::domain::notification::Channel;
use crate::domain::template::RenderedButton;

use super::{ChannelProvider, SendOutcome};

/// Error codes the Bot API returns for requests that will never succeed
/// on retry: 403 (bot blocked / kicked) and 400 (malformed request,
/// unknown chat).
const PERMANENT_ERROR_CODES: [i64; 2] = [400, 403];

/// Failure descriptions that mark a recipient as permanently unreachable.
const PERMANENT_ERROR_PHRASES: [&str; 4] = [
    "blocked by the user",
    "deactivated",
    "chat not found",
    "invalid peer",
];

/// A failed Bot API call.
#[derive(Debug, Clone, Error)]
#[error("telegram api error{}: {description}", .code.map(|c| format!(" (code {})", c)).unwrap_or_default())]
pub struct TelegramApiError {
    /// Numeric error code when the API responded; `None` for network-level
    /// failures and timeouts
    pub code: Option<i64>,
    pub description: String,
}

/// Raw message transport, implemented over HTTP in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait TelegramTransport: Send + Sync {
    /// Plain-text send path.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<String, TelegramApiError>;

    /// Button-capable send path.
    async fn send_message_with_buttons(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[RenderedButton],
    ) -> Result<String, TelegramApiError>;
}

/// Classify a failed call as permanent or transient.
///
/// Rate limits (429), server errors (5xx) and timeouts all default to
/// transient.
pub(crate) fn is_permanent(error: &TelegramApiError) -> bool {
    if let Some(code) = error.code {
        if PERMANENT_ERROR_CODES.contains(&code) {
            return true;
        }
    }
    let description = error.description.to_lowercase();
    PERMANENT_ERROR_PHRASES
        .iter()
        .any(|phrase| description.contains(phrase))
}

/// Telegram implementation of `ChannelProvider`.
pub struct TelegramProvider {
    transport: Arc<dyn TelegramTransport>,
}

impl TelegramProvider {
    pub fn new(transport: Arc<dyn TelegramTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ChannelProvider for TelegramProvider {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn send(&self, chat_id: i64, text: &str, buttons: &[RenderedButton]) -> SendOutcome {
        let result = if buttons.is_empty() {
            self.transport.send_message(chat_id, text).await
        } else {
            self.transport
                .send_message_with_buttons(chat_id, text, buttons)
                .await
        };

        match result {
            Ok(message_id) => SendOutcome::sent(message_id),
            Err(e) => {
                let permanent = is_permanent(&e);
                tracing::debug!(
                    chat_id = chat_id,
                    code = ?e.code,
                    permanent = permanent,
                    "Telegram send failed"
                );
                if permanent {
                    SendOutcome::permanent_failure(e.to_string())
                } else {
                    SendOutcome::transient_failure(e.to_string())
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<ApiMessage>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: i64,
}

/// Bot API transport over HTTPS.
pub struct HttpTelegramTransport {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl HttpTelegramTransport {
    pub fn new(config: &TelegramConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        })
    }

    async fn call(&self, body: serde_json::Value) -> Result<String, TelegramApiError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TelegramApiError {
                code: None,
                description: e.to_string(),
            })?;

        let parsed: ApiResponse = response.json().await.map_err(|e| TelegramApiError {
            code: None,
            description: format!("invalid api response: {}", e),
        })?;

        if parsed.ok {
            let message = parsed.result.ok_or_else(|| TelegramApiError {
                code: None,
                description: "ok response without result".to_string(),
            })?;
            Ok(message.message_id.to_string())
        } else {
            Err(TelegramApiError {
                code: parsed.error_code,
                description: parsed
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

#[async_trait]
impl TelegramTransport for HttpTelegramTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<String, TelegramApiError> {
        self.call(json!({ "chat_id": chat_id, "text": text })).await
    }

    async fn send_message_with_buttons(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[RenderedButton],
    ) -> Result<String, TelegramApiError> {
        let keyboard: Vec<Vec<serde_json::Value>> = buttons
            .iter()
            .map(|b| vec![json!({ "text": b.label, "callback_data": b.callback_data })])
            .collect();
        self.call(json!({
            "chat_id": chat_id,
            "text": text,
            "reply_markup": { "inline_keyboard": keyboard }
        }))
        .await
    }
}
