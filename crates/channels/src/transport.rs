use async_trait::async_trait;
use campaign_core::CampaignResult;
use serde::{Deserialize, Serialize};

/// Result of handing one message to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn accepted(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// External messaging provider. Treated as opaque and unreliable.
///
/// Implementations must be safe to call concurrently for distinct
/// addresses. A provider-reported failure comes back as
/// `Ok(SendOutcome { success: false, .. })`; `Err` is reserved for
/// exceptions (I/O, protocol errors). The dispatcher records both on the
/// recipient.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the provider session is usable right now.
    async fn is_ready(&self) -> bool {
        true
    }

    async fn send(&self, address: &str, content: &str) -> CampaignResult<SendOutcome>;
}
