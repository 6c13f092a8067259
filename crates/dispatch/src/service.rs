//! Caller-facing campaign API: create, estimate, schedule, cancel,
//! dispatch, progress, and delivery receipts.

use campaign_channels::whatsapp::parse_webhook_status;
use campaign_channels::Transport;
use campaign_core::config::AppConfig;
use campaign_core::event_bus::{make_event, noop_sink, CampaignEventType, EventSink};
use campaign_core::types::{
    CampaignStatus, DispatchProgress, MessageStatus, NewCampaign, StatusUpdate, TargetCriteria,
};
use campaign_core::{CampaignError, CampaignResult};
use campaign_management::CampaignStore;
use campaign_segmentation::{CriteriaEvaluator, CustomerSource, DegradePolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{DispatchEngine, DispatchResult};
use crate::lifecycle::CampaignLifecycle;
use crate::progress::ProgressReporter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCampaignResponse {
    pub success: bool,
    pub campaign_id: Option<Uuid>,
    pub total_recipients: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    pub error: Option<String>,
}

impl OperationResponse {
    fn from_result(result: CampaignResult<()>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                error: None,
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientEstimate {
    pub count: usize,
    /// Filters that could not be evaluated and were ignored.
    pub skipped_filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub status: CampaignStatus,
    pub progress: DispatchProgress,
    pub delivered: u32,
    /// No further status change is possible.
    pub finished: bool,
}

/// The campaign dispatcher as a value: constructed with its collaborators,
/// no process-wide state.
pub struct CampaignService {
    evaluator: CriteriaEvaluator,
    store: Arc<dyn CampaignStore>,
    engine: DispatchEngine,
    lifecycle: CampaignLifecycle,
    event_sink: Arc<dyn EventSink>,
}

impl CampaignService {
    pub fn new(
        config: &AppConfig,
        customers: Arc<dyn CustomerSource>,
        store: Arc<dyn CampaignStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let evaluator = CriteriaEvaluator::new(
            customers,
            config.addressing.clone(),
            config.selection.clone(),
        );
        let engine = DispatchEngine::new(store.clone(), transport, config.dispatch.clone());
        Self {
            evaluator,
            store,
            engine,
            lifecycle: CampaignLifecycle::new(),
            event_sink: noop_sink(),
        }
    }

    /// Attach an event sink for emitting campaign events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.engine = self.engine.with_event_sink(sink.clone());
        self.event_sink = sink;
        self
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    /// Resolve the criteria and persist a campaign with one pending
    /// recipient per contact. Selection is fail-closed here: recipients
    /// materialized now are exactly the ones that will be sent to.
    pub async fn create_campaign(
        &self,
        promotion_ref: Option<String>,
        name: &str,
        criteria: TargetCriteria,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> CreateCampaignResponse {
        match self
            .try_create(promotion_ref, name, criteria, scheduled_at)
            .await
        {
            Ok((campaign_id, total)) => CreateCampaignResponse {
                success: true,
                campaign_id: Some(campaign_id),
                total_recipients: total,
                error: None,
            },
            Err(e) => {
                warn!(name = %name, error = %e, "Campaign creation refused");
                CreateCampaignResponse {
                    success: false,
                    campaign_id: None,
                    total_recipients: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_create(
        &self,
        promotion_ref: Option<String>,
        name: &str,
        criteria: TargetCriteria,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> CampaignResult<(Uuid, u32)> {
        if name.trim().is_empty() {
            return Err(CampaignError::Validation("campaign name is empty".to_string()));
        }
        if let Some(when) = scheduled_at {
            ensure_future(when)?;
        }

        let resolution = self
            .evaluator
            .resolve(&criteria, DegradePolicy::FailClosed)
            .await?;
        if resolution.is_empty() {
            return Err(CampaignError::NoRecipients);
        }

        let status = if scheduled_at.is_some() {
            CampaignStatus::Scheduled
        } else {
            CampaignStatus::Draft
        };
        let total = resolution.len() as u32;
        let campaign_id = self
            .store
            .create_campaign(
                NewCampaign {
                    promotion_ref,
                    name: name.to_string(),
                    criteria,
                    status,
                    scheduled_at,
                },
                resolution.recipients,
            )
            .await?;

        self.event_sink.emit(
            make_event(CampaignEventType::CampaignCreated, campaign_id)
                .with_detail(format!("{} recipients", total)),
        );
        info!(
            campaign_id = %campaign_id,
            name = %name,
            recipients = total,
            status = status.as_str(),
            "Campaign created"
        );
        Ok((campaign_id, total))
    }

    /// Count the recipients the criteria would select, without persisting
    /// anything. Unavailable filter dimensions are skipped and reported.
    pub async fn estimate_recipients(
        &self,
        criteria: &TargetCriteria,
    ) -> CampaignResult<RecipientEstimate> {
        let resolution = self
            .evaluator
            .resolve(criteria, DegradePolicy::FailOpen)
            .await?;
        Ok(RecipientEstimate {
            count: resolution.len(),
            skipped_filters: resolution.skipped_filters,
        })
    }

    pub async fn dispatch(
        &self,
        campaign_id: Uuid,
        content: &str,
        reporter: &dyn ProgressReporter,
    ) -> DispatchResult {
        self.engine.dispatch(campaign_id, content, reporter).await
    }

    /// Schedule a draft campaign for a future time. The external scheduler
    /// is expected to call `dispatch` when it comes due.
    pub async fn schedule(&self, campaign_id: Uuid, when: DateTime<Utc>) -> OperationResponse {
        OperationResponse::from_result(self.try_schedule(campaign_id, when).await)
    }

    async fn try_schedule(&self, campaign_id: Uuid, when: DateTime<Utc>) -> CampaignResult<()> {
        ensure_future(when)?;
        let campaign = self.store.get_campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Draft {
            return Err(CampaignError::InvalidTransition {
                from: campaign.status,
                to: CampaignStatus::Scheduled,
            });
        }
        self.store
            .update_campaign_status(
                campaign_id,
                StatusUpdate::to(CampaignStatus::Scheduled)
                    .expecting(CampaignStatus::Draft)
                    .scheduled_at(when),
            )
            .await?;

        self.event_sink.emit(
            make_event(CampaignEventType::CampaignScheduled, campaign_id)
                .with_detail(when.to_rfc3339()),
        );
        info!(campaign_id = %campaign_id, scheduled_at = %when, "Campaign scheduled");
        Ok(())
    }

    /// Cancel a campaign. A running dispatch stops at its next batch
    /// boundary; undispatched recipients stay `pending`.
    pub async fn cancel(&self, campaign_id: Uuid) -> OperationResponse {
        OperationResponse::from_result(self.try_cancel(campaign_id).await)
    }

    async fn try_cancel(&self, campaign_id: Uuid) -> CampaignResult<()> {
        let campaign = self.store.get_campaign(campaign_id).await?;
        self.lifecycle
            .check(campaign.status, CampaignStatus::Cancelled)?;
        self.store
            .update_campaign_status(
                campaign_id,
                StatusUpdate::to(CampaignStatus::Cancelled).expecting(campaign.status),
            )
            .await?;

        self.event_sink.emit(
            make_event(CampaignEventType::CampaignCancelled, campaign_id)
                .with_detail(format!("from {}", campaign.status.as_str())),
        );
        info!(
            campaign_id = %campaign_id,
            from = campaign.status.as_str(),
            "Campaign cancelled"
        );
        Ok(())
    }

    /// Committed progress of a campaign.
    pub async fn progress(&self, campaign_id: Uuid) -> CampaignResult<CampaignProgress> {
        let campaign = self.store.get_campaign(campaign_id).await?;
        Ok(CampaignProgress {
            status: campaign.status,
            progress: campaign.progress(),
            delivered: campaign.delivered_count,
            finished: self.lifecycle.is_terminal(campaign.status),
        })
    }

    /// Apply a transport-reported delivery refinement. Returns `false` when
    /// the receipt does not move the recipient forward (stale, duplicate,
    /// or for a failed/pending row).
    pub async fn record_delivery_receipt(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> CampaignResult<bool> {
        if !matches!(status, MessageStatus::Delivered | MessageStatus::Read) {
            return Err(CampaignError::Validation(format!(
                "receipt status must be delivered or read, got {:?}",
                status
            )));
        }

        let recipient = self
            .store
            .find_recipient_by_message_id(message_id)
            .await?
            .ok_or_else(|| CampaignError::RecipientNotFound(message_id.to_string()))?;

        let applies = match (recipient.message_status.delivery_rank(), status.delivery_rank()) {
            (Some(current), Some(next)) => current >= 1 && next > current,
            _ => false,
        };
        if !applies {
            debug!(
                message_id = %message_id,
                current = ?recipient.message_status,
                receipt = ?status,
                "Receipt ignored"
            );
            return Ok(false);
        }

        let refined = self
            .store
            .refine_delivery(recipient.id, recipient.message_status, status)
            .await?;
        if !refined {
            debug!(message_id = %message_id, receipt = ?status, "Receipt raced, row already moved");
            return Ok(false);
        }

        self.event_sink.emit(
            make_event(CampaignEventType::DeliveryReceipt, recipient.campaign_id)
                .with_recipient(recipient.id, recipient.customer_id.clone())
                .with_detail(format!("{:?}", status).to_lowercase()),
        );
        Ok(true)
    }

    /// Entry point for raw WhatsApp status webhooks. Only `delivered` and
    /// `read` refine a recipient; `sent` and late `failed` reports are
    /// acknowledged without a change.
    pub async fn record_webhook_status(
        &self,
        message_id: &str,
        raw_status: &str,
    ) -> CampaignResult<bool> {
        match parse_webhook_status(raw_status) {
            Some(status @ (MessageStatus::Delivered | MessageStatus::Read)) => {
                self.record_delivery_receipt(message_id, status).await
            }
            Some(status) => {
                debug!(message_id = %message_id, status = ?status, "Webhook status not applied");
                Ok(false)
            }
            None => Err(CampaignError::Validation(format!(
                "unknown webhook status {:?}",
                raw_status
            ))),
        }
    }
}

fn ensure_future(when: DateTime<Utc>) -> CampaignResult<()> {
    if when <= Utc::now() {
        return Err(CampaignError::Validation(format!(
            "scheduled time {} is not in the future",
            when.to_rfc3339()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use campaign_channels::MockTransport;
    use campaign_core::event_bus::capture_sink;
    use campaign_core::types::{Customer, CustomerTier};
    use campaign_management::InMemoryCampaignStore;
    use campaign_segmentation::InMemoryCustomerSource;
    use chrono::Duration;

    struct Fixture {
        service: CampaignService,
        store: Arc<InMemoryCampaignStore>,
        customers: Arc<InMemoryCustomerSource>,
    }

    fn customer(id: &str, tier: CustomerTier, phone: &str) -> Customer {
        Customer {
            id: id.to_string(),
            name: id.to_uppercase(),
            phone: Some(phone.to_string()),
            tier,
            loyalty_points: 120,
            total_spent: 300.0,
            contact_verified: true,
            is_active: true,
        }
    }

    fn fixture() -> Fixture {
        let customers = Arc::new(InMemoryCustomerSource::new(vec![
            customer("ana", CustomerTier::Gold, "11 91111-0001"),
            customer("bia", CustomerTier::Silver, "11 91111-0002"),
            customer("caio", CustomerTier::Gold, "11 91111-0003"),
        ]));
        let store = Arc::new(InMemoryCampaignStore::new());
        let service = CampaignService::new(
            &AppConfig::default(),
            customers.clone(),
            store.clone(),
            Arc::new(MockTransport::new()),
        );
        Fixture {
            service,
            store,
            customers,
        }
    }

    fn gold() -> TargetCriteria {
        TargetCriteria {
            tiers: Some(vec![CustomerTier::Gold]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_campaign_materializes_recipients() {
        let f = fixture();
        let created = f
            .service
            .create_campaign(Some("promo-1".to_string()), "Gold brunch", gold(), None)
            .await;
        assert!(created.success);
        assert_eq!(created.total_recipients, 2);

        let id = created.campaign_id.unwrap();
        let campaign = f.store.get_campaign(id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);
        assert_eq!(campaign.total_recipients, 2);
        assert_eq!(campaign.criteria, gold());
        assert_eq!(f.store.list_pending_recipients(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_refuses_empty_selection() {
        let f = fixture();
        let criteria = TargetCriteria {
            tiers: Some(vec![CustomerTier::Platinum]),
            ..Default::default()
        };
        let created = f.service.create_campaign(None, "Nobody", criteria, None).await;
        assert!(!created.success);
        assert!(created.campaign_id.is_none());
        assert_eq!(
            created.error.as_deref(),
            Some("No recipients matched the campaign criteria")
        );
        assert!(f.store.list_campaigns().is_empty());
    }

    #[tokio::test]
    async fn test_create_fails_closed_on_degraded_selection() {
        let f = fixture();
        f.customers.set_order_history_available(false);
        let criteria = TargetCriteria {
            last_order_days: Some(30),
            ..Default::default()
        };

        let estimate = f.service.estimate_recipients(&criteria).await.unwrap();
        assert_eq!(estimate.count, 3);
        assert_eq!(estimate.skipped_filters, vec!["last_order_days".to_string()]);

        let created = f.service.create_campaign(None, "Recent", criteria, None).await;
        assert!(!created.success);
        assert!(created.error.unwrap().contains("last_order_days"));
    }

    #[tokio::test]
    async fn test_create_with_schedule() {
        let f = fixture();
        let when = Utc::now() + Duration::hours(2);
        let created = f
            .service
            .create_campaign(None, "Tonight", gold(), Some(when))
            .await;
        let campaign = f.store.get_campaign(created.campaign_id.unwrap()).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Scheduled);
        assert_eq!(campaign.scheduled_at, Some(when));

        let past = f
            .service
            .create_campaign(None, "Yesterday", gold(), Some(Utc::now() - Duration::hours(1)))
            .await;
        assert!(!past.success);
    }

    #[tokio::test]
    async fn test_schedule_only_from_draft() {
        let f = fixture();
        let id = f
            .service
            .create_campaign(None, "Brunch", gold(), None)
            .await
            .campaign_id
            .unwrap();
        let when = Utc::now() + Duration::days(1);

        assert!(f.service.schedule(id, when).await.success);
        let campaign = f.store.get_campaign(id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Scheduled);
        assert_eq!(campaign.scheduled_at, Some(when));

        let again = f.service.schedule(id, when).await;
        assert!(!again.success);
        assert!(!f.service.schedule(Uuid::new_v4(), when).await.success);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let f = fixture();
        let sink = capture_sink();
        let service = CampaignService::new(
            &AppConfig::default(),
            f.customers.clone(),
            f.store.clone(),
            Arc::new(MockTransport::new()),
        )
        .with_event_sink(sink.clone());

        let id = service
            .create_campaign(None, "Brunch", gold(), None)
            .await
            .campaign_id
            .unwrap();
        assert!(service.cancel(id).await.success);
        assert_eq!(
            f.store.get_campaign(id).await.unwrap().status,
            CampaignStatus::Cancelled
        );
        assert_eq!(sink.count_type(CampaignEventType::CampaignCancelled), 1);

        // Terminal: neither cancel nor dispatch moves it again.
        assert!(!service.cancel(id).await.success);
        let result = service.dispatch(id, "hello", &NoProgress).await;
        assert!(!result.success);
        assert_eq!(result.final_status, Some(CampaignStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_receipts_refine_forward_only() {
        let f = fixture();
        let id = f
            .service
            .create_campaign(None, "Brunch", gold(), None)
            .await
            .campaign_id
            .unwrap();
        let result = f.service.dispatch(id, "Brunch is on us", &NoProgress).await;
        assert!(result.success);

        let recipients = f.store.list_recipients(id).await.unwrap();
        let message_id = recipients[0].provider_message_id.clone().unwrap();

        assert!(f
            .service
            .record_delivery_receipt(&message_id, MessageStatus::Delivered)
            .await
            .unwrap());
        assert!(f
            .service
            .record_delivery_receipt(&message_id, MessageStatus::Read)
            .await
            .unwrap());
        // Stale and duplicate receipts are ignored.
        assert!(!f
            .service
            .record_delivery_receipt(&message_id, MessageStatus::Delivered)
            .await
            .unwrap());

        let progress = f.service.progress(id).await.unwrap();
        assert_eq!(progress.status, CampaignStatus::Completed);
        assert_eq!(progress.delivered, 1);
        assert_eq!(progress.progress.sent, 2);

        // Read straight after sent still counts one delivery.
        let other = recipients[1].provider_message_id.clone().unwrap();
        assert!(f
            .service
            .record_delivery_receipt(&other, MessageStatus::Read)
            .await
            .unwrap());
        assert_eq!(f.service.progress(id).await.unwrap().delivered, 2);

        assert!(matches!(
            f.service
                .record_delivery_receipt(&message_id, MessageStatus::Sent)
                .await,
            Err(CampaignError::Validation(_))
        ));
        assert!(matches!(
            f.service
                .record_delivery_receipt("wamid.unknown", MessageStatus::Read)
                .await,
            Err(CampaignError::RecipientNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_receipts_count_one_delivery() {
        let f = fixture();
        let id = f
            .service
            .create_campaign(None, "Brunch", gold(), None)
            .await
            .campaign_id
            .unwrap();
        f.service.dispatch(id, "Brunch is on us", &NoProgress).await;
        let message_id = f.store.list_recipients(id).await.unwrap()[0]
            .provider_message_id
            .clone()
            .unwrap();

        let (first, second) = tokio::join!(
            f.service
                .record_delivery_receipt(&message_id, MessageStatus::Delivered),
            f.service
                .record_delivery_receipt(&message_id, MessageStatus::Delivered),
        );
        assert_eq!(
            [first.unwrap(), second.unwrap()].iter().filter(|applied| **applied).count(),
            1
        );
        assert_eq!(f.service.progress(id).await.unwrap().delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_webhook_status_routes_to_receipts() {
        let f = fixture();
        let id = f
            .service
            .create_campaign(None, "Brunch", gold(), None)
            .await
            .campaign_id
            .unwrap();
        f.service.dispatch(id, "Brunch is on us", &NoProgress).await;
        let message_id = f.store.list_recipients(id).await.unwrap()[0]
            .provider_message_id
            .clone()
            .unwrap();

        assert!(!f.service.record_webhook_status(&message_id, "sent").await.unwrap());
        assert!(!f.service.record_webhook_status(&message_id, "failed").await.unwrap());
        assert!(f.service.record_webhook_status(&message_id, "read").await.unwrap());
        assert!(matches!(
            f.service.record_webhook_status(&message_id, "deleted").await,
            Err(CampaignError::Validation(_))
        ));

        let progress = f.service.progress(id).await.unwrap();
        assert_eq!(progress.delivered, 1);
        assert!(progress.finished);
        let row = f.store.list_recipients(id).await.unwrap().remove(0);
        assert_eq!(row.message_status, MessageStatus::Read);
    }
}
