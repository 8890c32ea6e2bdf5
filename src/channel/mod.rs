//! Pluggable per-channel transports.
//!
//! Each provider owns one channel and classifies its own send failures as
//! permanent or transient; the worker only consumes the classification.

mod registry;
pub mod telegram;

pub use registry::ProviderRegistry;
pub use telegram::{HttpTelegramTransport, TelegramApiError, TelegramProvider, TelegramTransport};

use async_trait::async_trait;

use crate::domain::notification::Channel;
use crate::domain::template::RenderedButton;

/// Result of one transport send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    /// Transport-assigned id, set on success
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    /// On failure: true when a retry cannot succeed (blocked recipient,
    /// malformed request)
    pub permanent: bool,
}

impl SendOutcome {
    pub fn sent(provider_message_id: String) -> Self {
        Self {
            success: true,
            provider_message_id: Some(provider_message_id),
            error_message: None,
            permanent: false,
        }
    }

    pub fn permanent_failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error_message: Some(error_message.into()),
            permanent: true,
        }
    }

    pub fn transient_failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error_message: Some(error_message.into()),
            permanent: false,
        }
    }
}

/// A channel transport.
///
/// Implementations must be `Send + Sync`; one provider instance serves all
/// concurrent worker executors.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// The channel this provider serves.
    fn channel(&self) -> Channel;

    /// Attempt one send. Never returns an error: every failure is folded
    /// into the outcome with a permanence classification.
    async fn send(&self, chat_id: i64, text: &str, buttons: &[RenderedButton]) -> SendOutcome;
}
