//! ==============================================================================
//! alerts/notifier.rs - delivery of alert messages to the operator channel
//! ==============================================================================
//!
//! TelegramNotifier posts HTML messages through the bot API `sendMessage`
//! call. credentials are read from the alert config store on every send.
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::alerts::config::AlertConfigStore;
use crate::clock::Timestamp;
use crate::error::NotifyError;

/// Sends one formatted message. Implementations do not retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// On success returns a short human-readable delivery detail.
    async fn send(&self, message: &str) -> Result<String, NotifyError>;
}

/// Posts messages through the Telegram Bot API (`sendMessage`, HTML mode).
///
/// Credentials are read from the alert configuration on every send, so an
/// edited token takes effect without a restart.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    config: Arc<AlertConfigStore>,
}

impl TelegramNotifier {
    pub fn new(
        api_base: impl Into<String>,
        timeout: Duration,
        config: Arc<AlertConfigStore>,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            config,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<String, NotifyError> {
        let credentials = self.config.current().await.credentials;
        if !credentials.is_complete() {
            return Err(NotifyError::NotConfigured);
        }

        let url = format!("{}/bot{}/sendMessage", self.api_base, credentials.bot_token);
        let payload = json!({
            "chat_id": credentials.chat_id,
            "text": message,
            "parse_mode": "HTML",
        });

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(format!("delivered to chat {}", credentials.chat_id))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Rejected { status: status.as_u16(), body })
        }
    }
}

/// Body of the operator-triggered test message.
pub fn test_message(now: Timestamp) -> String {
    format!(
        "🧪 <b>CO2 monitor test</b>\n\nThis is a test message.\nTime: {}",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}
