//! Campaign store contract and its in-memory implementation.

use async_trait::async_trait;
use campaign_core::types::{
    Campaign, CampaignStatus, MessageStatus, NewCampaign, Recipient, RecipientUpdate,
    ResolvedRecipient, StatusUpdate,
};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

/// Persistence operations the campaign core relies on.
///
/// Counter increments must be atomic with respect to each other, and a
/// `StatusUpdate` carrying `expected` must be applied as a compare-and-set.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Persist a campaign and one `pending` recipient per entry, in order.
    async fn create_campaign(
        &self,
        campaign: NewCampaign,
        recipients: Vec<ResolvedRecipient>,
    ) -> CampaignResult<Uuid>;

    async fn get_campaign(&self, id: Uuid) -> CampaignResult<Campaign>;

    /// Returns the updated campaign. Fails with `InvalidTransition` when
    /// `update.expected` does not match the stored status.
    async fn update_campaign_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> CampaignResult<Campaign>;

    /// Pending recipients of a campaign in materialization order.
    async fn list_pending_recipients(&self, campaign_id: Uuid) -> CampaignResult<Vec<Recipient>>;

    /// All recipients of a campaign in materialization order.
    async fn list_recipients(&self, campaign_id: Uuid) -> CampaignResult<Vec<Recipient>>;

    async fn update_recipient_status(&self, id: Uuid, update: RecipientUpdate)
        -> CampaignResult<()>;

    /// Move a `pending` recipient to `sent` or `failed` and bump the
    /// matching campaign counter as one write: either both land or neither.
    async fn record_recipient_outcome(
        &self,
        id: Uuid,
        update: RecipientUpdate,
    ) -> CampaignResult<()>;

    async fn increment_campaign_counters(
        &self,
        id: Uuid,
        sent_delta: u32,
        failed_delta: u32,
    ) -> CampaignResult<()>;

    /// Set a recipient's delivery status only if it is still `expected`.
    /// Returns `false` when the row had already moved. Leaving `sent`
    /// counts one delivery on the campaign in the same write.
    async fn refine_delivery(
        &self,
        id: Uuid,
        expected: MessageStatus,
        status: MessageStatus,
    ) -> CampaignResult<bool>;

    async fn find_recipient_by_message_id(
        &self,
        message_id: &str,
    ) -> CampaignResult<Option<Recipient>>;
}

/// One recorded campaign status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: CampaignStatus,
    pub to: CampaignStatus,
    pub at: DateTime<Utc>,
}

/// Thread-safe in-memory store backed by DashMap.
pub struct InMemoryCampaignStore {
    campaigns: DashMap<Uuid, Campaign>,
    recipients: DashMap<Uuid, Recipient>,
    /// Recipient ids per campaign, in materialization order.
    campaign_recipients: DashMap<Uuid, Vec<Uuid>>,
    message_index: DashMap<String, Uuid>,
    history: DashMap<Uuid, Vec<StatusChange>>,
    sequence: AtomicU64,
    unavailable: AtomicBool,
    /// Successful recipient writes left before injected failures start.
    recipient_write_budget: Mutex<Option<usize>>,
    /// Counter writes left to reject.
    counter_write_failures: Mutex<usize>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        info!("Campaign store initialized (in-memory, development mode)");
        Self {
            campaigns: DashMap::new(),
            recipients: DashMap::new(),
            campaign_recipients: DashMap::new(),
            message_index: DashMap::new(),
            history: DashMap::new(),
            sequence: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            recipient_write_budget: Mutex::new(None),
            counter_write_failures: Mutex::new(0),
        }
    }

    /// Make every operation fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Allow `writes` more recipient status writes, then fail the rest.
    pub fn fail_recipient_writes_after(&self, writes: usize) {
        *self.recipient_write_budget.lock() = Some(writes);
    }

    /// Reject the next `writes` campaign counter writes.
    pub fn fail_counter_writes(&self, writes: usize) {
        *self.counter_write_failures.lock() = writes;
    }

    pub fn clear_failures(&self) {
        self.unavailable.store(false, Ordering::SeqCst);
        *self.recipient_write_budget.lock() = None;
        *self.counter_write_failures.lock() = 0;
    }

    /// Status changes recorded for a campaign, oldest first.
    pub fn status_history(&self, campaign_id: Uuid) -> Vec<StatusChange> {
        self.history
            .get(&campaign_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn list_campaigns(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    fn check_available(&self) -> CampaignResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CampaignError::Store("campaign store unreachable".to_string()));
        }
        Ok(())
    }

    fn take_recipient_write(&self) -> CampaignResult<()> {
        let mut budget = self.recipient_write_budget.lock();
        match budget.as_mut() {
            Some(0) => Err(CampaignError::Store(
                "recipient write rejected by store".to_string(),
            )),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn take_counter_write(&self) -> CampaignResult<()> {
        let mut failures = self.counter_write_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(CampaignError::Store(
                "counter write rejected by store".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_recipient_update(&self, recipient: &mut Recipient, update: RecipientUpdate) {
        recipient.message_status = update.status;
        if update.status == MessageStatus::Failed {
            recipient.error_message = update.error_message;
        }
        if let Some(at) = update.sent_at {
            recipient.sent_at = Some(at);
        }
        if let Some(message_id) = update.provider_message_id {
            self.message_index.insert(message_id.clone(), recipient.id);
            recipient.provider_message_id = Some(message_id);
        }
    }

    fn recipients_where(
        &self,
        campaign_id: Uuid,
        keep: impl Fn(&Recipient) -> bool,
    ) -> CampaignResult<Vec<Recipient>> {
        if !self.campaigns.contains_key(&campaign_id) {
            return Err(CampaignError::CampaignNotFound(campaign_id));
        }
        let ids = self
            .campaign_recipients
            .get(&campaign_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let mut recipients: Vec<Recipient> = ids
            .iter()
            .filter_map(|id| self.recipients.get(id).map(|r| r.value().clone()))
            .filter(|r| keep(r))
            .collect();
        recipients.sort_by_key(|r| r.sequence);
        Ok(recipients)
    }
}

impl Default for InMemoryCampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn create_campaign(
        &self,
        campaign: NewCampaign,
        recipients: Vec<ResolvedRecipient>,
    ) -> CampaignResult<Uuid> {
        self.check_available()?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        let total = u32::try_from(recipients.len())
            .map_err(|_| CampaignError::Store("recipient list too large".to_string()))?;

        let mut ids = Vec::with_capacity(recipients.len());
        for resolved in recipients {
            let recipient = Recipient {
                id: Uuid::new_v4(),
                campaign_id: id,
                customer_id: resolved.customer_id,
                address: resolved.address,
                message_status: MessageStatus::Pending,
                error_message: None,
                sent_at: None,
                provider_message_id: None,
                sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
                created_at: now,
            };
            ids.push(recipient.id);
            self.recipients.insert(recipient.id, recipient);
        }
        self.campaign_recipients.insert(id, ids);

        self.campaigns.insert(
            id,
            Campaign {
                id,
                promotion_ref: campaign.promotion_ref,
                name: campaign.name,
                criteria: campaign.criteria,
                status: campaign.status,
                total_recipients: total,
                sent_count: 0,
                delivered_count: 0,
                failed_count: 0,
                scheduled_at: campaign.scheduled_at,
                started_at: None,
                completed_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        self.history.insert(id, Vec::new());

        debug!(campaign_id = %id, recipients = total, "Campaign persisted");
        Ok(id)
    }

    async fn get_campaign(&self, id: Uuid) -> CampaignResult<Campaign> {
        self.check_available()?;
        self.campaigns
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(CampaignError::CampaignNotFound(id))
    }

    async fn update_campaign_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> CampaignResult<Campaign> {
        self.check_available()?;
        let now = Utc::now();
        let (from, updated) = {
            let mut entry = self
                .campaigns
                .get_mut(&id)
                .ok_or(CampaignError::CampaignNotFound(id))?;
            let campaign = entry.value_mut();

            if let Some(expected) = update.expected {
                if campaign.status != expected {
                    return Err(CampaignError::InvalidTransition {
                        from: campaign.status,
                        to: update.status,
                    });
                }
            }

            let from = campaign.status;
            campaign.status = update.status;
            if let Some(at) = update.scheduled_at {
                campaign.scheduled_at = Some(at);
            }
            if let Some(at) = update.started_at {
                campaign.started_at = Some(at);
            }
            if let Some(at) = update.completed_at {
                campaign.completed_at = Some(at);
            }
            campaign.updated_at = now;
            (from, campaign.clone())
        };

        self.history.entry(id).or_default().push(StatusChange {
            from,
            to: update.status,
            at: now,
        });
        Ok(updated)
    }

    async fn list_pending_recipients(&self, campaign_id: Uuid) -> CampaignResult<Vec<Recipient>> {
        self.check_available()?;
        self.recipients_where(campaign_id, |r| r.message_status == MessageStatus::Pending)
    }

    async fn list_recipients(&self, campaign_id: Uuid) -> CampaignResult<Vec<Recipient>> {
        self.check_available()?;
        self.recipients_where(campaign_id, |_| true)
    }

    async fn update_recipient_status(
        &self,
        id: Uuid,
        update: RecipientUpdate,
    ) -> CampaignResult<()> {
        self.check_available()?;
        self.take_recipient_write()?;

        let mut entry = self
            .recipients
            .get_mut(&id)
            .ok_or_else(|| CampaignError::RecipientNotFound(id.to_string()))?;
        self.apply_recipient_update(entry.value_mut(), update);
        Ok(())
    }

    async fn record_recipient_outcome(
        &self,
        id: Uuid,
        update: RecipientUpdate,
    ) -> CampaignResult<()> {
        self.check_available()?;
        let (sent_delta, failed_delta) = match update.status {
            MessageStatus::Sent => (1, 0),
            MessageStatus::Failed => (0, 1),
            other => {
                return Err(CampaignError::Validation(format!(
                    "{:?} is not a dispatch outcome",
                    other
                )))
            }
        };
        self.take_recipient_write()?;

        // Lock order: recipient row, then its campaign.
        let mut recipient = self
            .recipients
            .get_mut(&id)
            .ok_or_else(|| CampaignError::RecipientNotFound(id.to_string()))?;
        if recipient.message_status != MessageStatus::Pending {
            return Err(CampaignError::Store(format!(
                "recipient {} already recorded as {:?}",
                id, recipient.message_status
            )));
        }
        let campaign_id = recipient.campaign_id;
        let mut campaign = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or(CampaignError::CampaignNotFound(campaign_id))?;

        let processed = campaign.sent_count + campaign.failed_count + sent_delta + failed_delta;
        if processed > campaign.total_recipients {
            return Err(CampaignError::Store(format!(
                "counter increment would exceed {} recipients",
                campaign.total_recipients
            )));
        }
        self.take_counter_write()?;

        campaign.sent_count += sent_delta;
        campaign.failed_count += failed_delta;
        campaign.updated_at = Utc::now();
        self.apply_recipient_update(recipient.value_mut(), update);
        Ok(())
    }

    async fn increment_campaign_counters(
        &self,
        id: Uuid,
        sent_delta: u32,
        failed_delta: u32,
    ) -> CampaignResult<()> {
        self.check_available()?;
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or(CampaignError::CampaignNotFound(id))?;
        let campaign = entry.value_mut();
        self.take_counter_write()?;

        let processed = campaign.sent_count + campaign.failed_count + sent_delta + failed_delta;
        if processed > campaign.total_recipients {
            return Err(CampaignError::Store(format!(
                "counter increment would exceed {} recipients",
                campaign.total_recipients
            )));
        }
        campaign.sent_count += sent_delta;
        campaign.failed_count += failed_delta;
        campaign.updated_at = Utc::now();
        Ok(())
    }

    async fn refine_delivery(
        &self,
        id: Uuid,
        expected: MessageStatus,
        status: MessageStatus,
    ) -> CampaignResult<bool> {
        self.check_available()?;
        let mut recipient = self
            .recipients
            .get_mut(&id)
            .ok_or_else(|| CampaignError::RecipientNotFound(id.to_string()))?;
        if recipient.message_status != expected {
            return Ok(false);
        }

        if expected == MessageStatus::Sent {
            let campaign_id = recipient.campaign_id;
            let mut campaign = self
                .campaigns
                .get_mut(&campaign_id)
                .ok_or(CampaignError::CampaignNotFound(campaign_id))?;
            if campaign.delivered_count < campaign.sent_count {
                campaign.delivered_count += 1;
                campaign.updated_at = Utc::now();
            }
        }
        recipient.message_status = status;
        Ok(true)
    }

    async fn find_recipient_by_message_id(
        &self,
        message_id: &str,
    ) -> CampaignResult<Option<Recipient>> {
        self.check_available()?;
        let Some(id) = self.message_index.get(message_id).map(|r| *r.value()) else {
            return Ok(None);
        };
        Ok(self.recipients.get(&id).map(|r| r.value().clone()))
    }
}
