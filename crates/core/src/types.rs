use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CampaignError, CampaignResult};

// ─── Customers ──────────────────────────────────────────────────────────────

/// Loyalty tier of a customer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CustomerTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

/// A customer as seen by recipient selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Raw phone number as captured at the counter; normalized before use.
    #[serde(default)]
    pub phone: Option<String>,
    pub tier: CustomerTier,
    #[serde(default)]
    pub loyalty_points: u32,
    #[serde(default)]
    pub total_spent: f64,
    /// The contact has been confirmed reachable on the messaging network.
    #[serde(default)]
    pub contact_verified: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// A closed order, used only for the recency filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedOrder {
    pub customer_id: String,
    pub closed_at: DateTime<Utc>,
}

/// One selected contact: the output unit of criteria resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRecipient {
    pub customer_id: String,
    pub address: String,
}

// ─── Target criteria ────────────────────────────────────────────────────────

/// Declarative recipient filter. Frozen into the campaign once its
/// recipients are materialized.
///
/// A non-empty `specific_customers` list overrides every other field for
/// selection; the other fields are still kept in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiers: Option<Vec<CustomerTier>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_spend: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_spend: Option<f64>,
    /// Only customers with a completed order closed within this many days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_order_days: Option<u32>,
    /// Require a verified messaging contact.
    #[serde(default, alias = "has_whatsapp", skip_serializing_if = "Option::is_none")]
    pub has_contact: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specific_customers: Vec<String>,
}

impl TargetCriteria {
    pub fn has_override(&self) -> bool {
        !self.specific_customers.is_empty()
    }

    /// Check field consistency. Called at the evaluator boundary.
    pub fn validate(&self) -> CampaignResult<()> {
        if let (Some(min), Some(max)) = (self.min_points, self.max_points) {
            if min > max {
                return Err(CampaignError::Validation(format!(
                    "min_points {} exceeds max_points {}",
                    min, max
                )));
            }
        }
        for (name, bound) in [("min_spend", self.min_spend), ("max_spend", self.max_spend)] {
            if let Some(value) = bound {
                if !value.is_finite() || value < 0.0 {
                    return Err(CampaignError::Validation(format!(
                        "{} must be a non-negative amount, got {}",
                        name, value
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_spend, self.max_spend) {
            if min > max {
                return Err(CampaignError::Validation(format!(
                    "min_spend {} exceeds max_spend {}",
                    min, max
                )));
            }
        }
        if self.last_order_days == Some(0) {
            return Err(CampaignError::Validation(
                "last_order_days must be at least 1".to_string(),
            ));
        }
        if self.specific_customers.iter().any(|id| id.trim().is_empty()) {
            return Err(CampaignError::Validation(
                "specific_customers contains an empty id".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Campaign ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub promotion_ref: Option<String>,
    pub name: String,
    pub criteria: TargetCriteria,
    pub status: CampaignStatus,
    pub total_recipients: u32,
    pub sent_count: u32,
    pub delivered_count: u32,
    pub failed_count: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Committed counters as a progress snapshot.
    pub fn progress(&self) -> DispatchProgress {
        DispatchProgress {
            sent: self.sent_count,
            total: self.total_recipients,
            failed: self.failed_count,
        }
    }

    pub fn pending_count(&self) -> u32 {
        self.total_recipients
            .saturating_sub(self.sent_count)
            .saturating_sub(self.failed_count)
    }
}

/// Everything needed to persist a new campaign besides its recipients.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub promotion_ref: Option<String>,
    pub name: String,
    pub criteria: TargetCriteria,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// A campaign status write. With `expected` set the store applies it only
/// if the current status matches, otherwise it reports a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: CampaignStatus,
    pub expected: Option<CampaignStatus>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn to(status: CampaignStatus) -> Self {
        Self {
            status,
            expected: None,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn expecting(mut self, current: CampaignStatus) -> Self {
        self.expected = Some(current);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

// ─── Recipient ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Position along the delivery path. `Failed` sits outside it.
    pub fn delivery_rank(&self) -> Option<u8> {
        match self {
            MessageStatus::Pending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub customer_id: String,
    pub address: String,
    pub message_status: MessageStatus,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    /// Materialization order within the campaign; batches follow it.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// A recipient status write.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientUpdate {
    pub status: MessageStatus,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
}

impl RecipientUpdate {
    pub fn sent(at: DateTime<Utc>, provider_message_id: Option<String>) -> Self {
        Self {
            status: MessageStatus::Sent,
            error_message: None,
            sent_at: Some(at),
            provider_message_id,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: MessageStatus::Failed,
            error_message: Some(error.into()),
            sent_at: None,
            provider_message_id: None,
        }
    }

    /// A transport-reported refinement (delivered / read).
    pub fn refined(status: MessageStatus) -> Self {
        Self {
            status,
            error_message: None,
            sent_at: None,
            provider_message_id: None,
        }
    }
}

// ─── Progress ───────────────────────────────────────────────────────────────

/// Running totals reported after each drained batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchProgress {
    pub sent: u32,
    pub total: u32,
    pub failed: u32,
}

impl DispatchProgress {
    pub fn processed(&self) -> u32 {
        self.sent + self.failed
    }
}
