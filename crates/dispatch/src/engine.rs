//! Dispatch engine: the batched, rate-limited, resumable send loop.
//!
//! One invocation owns one campaign's run. Recipients still `pending` are
//! loaded in materialization order and sent in fixed-size batches: sends
//! inside a batch run concurrently, batches run strictly one after the
//! other with a pause in between. Each recipient is written back as
//! `sent` or `failed` before the batch is considered drained, so a later
//! run only ever sees what is still `pending`.

use campaign_channels::Transport;
use campaign_core::config::DispatchConfig;
use campaign_core::event_bus::{make_event, noop_sink, CampaignEventType, EventSink};
use campaign_core::types::{
    Campaign, CampaignStatus, DispatchProgress, Recipient, RecipientUpdate, StatusUpdate,
};
use campaign_core::{CampaignError, CampaignResult};
use campaign_management::CampaignStore;
use chrono::Utc;
use dashmap::DashSet;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::lifecycle::CampaignLifecycle;
use crate::progress::ProgressReporter;

/// Aggregate outcome of one `dispatch` call. Counts cover this call only;
/// full per-recipient detail stays on the recipient rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub success: bool,
    pub total_sent: u32,
    pub total_failed: u32,
    /// Capped at `max_reported_errors`.
    pub errors: Vec<String>,
    /// Campaign status when the call returned, if it could be determined.
    pub final_status: Option<CampaignStatus>,
}

impl DispatchResult {
    fn refused(error: &CampaignError, status: Option<CampaignStatus>) -> Self {
        Self {
            success: false,
            total_sent: 0,
            total_failed: 0,
            errors: vec![error.to_string()],
            final_status: status,
        }
    }
}

enum RecipientOutcome {
    Sent,
    Failed(String),
    /// The send happened (or was attempted) but its result could not be
    /// persisted.
    Unrecorded(CampaignError),
}

enum RunEnd {
    Drained,
    Cancelled,
    Aborted(CampaignError),
}

struct RunTally {
    base: DispatchProgress,
    sent: u32,
    failed: u32,
    errors: Vec<String>,
    max_errors: usize,
}

impl RunTally {
    fn new(campaign: &Campaign, max_errors: usize) -> Self {
        Self {
            base: campaign.progress(),
            sent: 0,
            failed: 0,
            errors: Vec::new(),
            max_errors,
        }
    }

    fn record_error(&mut self, error: String) {
        if self.errors.len() < self.max_errors {
            self.errors.push(error);
        }
    }

    /// Committed totals: counters at run start plus everything persisted since.
    fn progress(&self) -> DispatchProgress {
        DispatchProgress {
            sent: self.base.sent + self.sent,
            total: self.base.total,
            failed: self.base.failed + self.failed,
        }
    }

    fn into_result(
        mut self,
        success: bool,
        status: Option<CampaignStatus>,
        engine_error: Option<&CampaignError>,
    ) -> DispatchResult {
        if let Some(e) = engine_error {
            self.errors.insert(0, e.to_string());
            self.errors.truncate(self.max_errors.max(1));
        }
        DispatchResult {
            success,
            total_sent: self.sent,
            total_failed: self.failed,
            errors: self.errors,
            final_status: status,
        }
    }
}

/// Marks a campaign id as being dispatched by this process.
struct ActiveDispatch {
    active: Arc<DashSet<Uuid>>,
    campaign_id: Uuid,
}

impl ActiveDispatch {
    fn acquire(active: &Arc<DashSet<Uuid>>, campaign_id: Uuid) -> Option<Self> {
        active.insert(campaign_id).then(|| Self {
            active: Arc::clone(active),
            campaign_id,
        })
    }
}

impl Drop for ActiveDispatch {
    fn drop(&mut self) {
        self.active.remove(&self.campaign_id);
    }
}

pub struct DispatchEngine {
    store: Arc<dyn CampaignStore>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    lifecycle: CampaignLifecycle,
    event_sink: Arc<dyn EventSink>,
    active: Arc<DashSet<Uuid>>,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> Self {
        info!(
            transport = transport.name(),
            batch_size = config.batch_size,
            message_delay_ms = config.message_delay_ms,
            batch_delay_ms = config.batch_delay_ms,
            send_timeout_ms = config.send_timeout_ms,
            "Dispatch engine initialized"
        );
        Self {
            store,
            transport,
            config,
            lifecycle: CampaignLifecycle::new(),
            event_sink: noop_sink(),
            active: Arc::new(DashSet::new()),
        }
    }

    /// Attach an event sink for emitting campaign events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Whether this process is currently running a dispatch for the campaign.
    pub fn is_dispatching(&self, campaign_id: Uuid) -> bool {
        self.active.contains(&campaign_id)
    }

    /// Send `content` to every pending recipient of the campaign.
    ///
    /// Never returns early with an error: refusals and engine failures come
    /// back as `success = false` with whatever was already persisted.
    pub async fn dispatch(
        &self,
        campaign_id: Uuid,
        content: &str,
        reporter: &dyn ProgressReporter,
    ) -> DispatchResult {
        if content.trim().is_empty() {
            let error = CampaignError::Validation("message content is empty".to_string());
            return DispatchResult::refused(&error, None);
        }

        let Some(_guard) = ActiveDispatch::acquire(&self.active, campaign_id) else {
            warn!(campaign_id = %campaign_id, "Dispatch already running in this process");
            let error = CampaignError::AlreadyDispatching(campaign_id);
            return DispatchResult::refused(&error, Some(CampaignStatus::Sending));
        };

        let campaign = match self.claim(campaign_id).await {
            Ok(Some(campaign)) => campaign,
            Ok(None) => {
                info!(campaign_id = %campaign_id, "Campaign already completed, nothing to send");
                return DispatchResult {
                    success: true,
                    total_sent: 0,
                    total_failed: 0,
                    errors: Vec::new(),
                    final_status: Some(CampaignStatus::Completed),
                };
            }
            Err(e) => {
                warn!(campaign_id = %campaign_id, error = %e, "Dispatch refused");
                let status = match &e {
                    CampaignError::AlreadyDispatching(_) => Some(CampaignStatus::Sending),
                    CampaignError::InvalidTransition { from, .. } => Some(*from),
                    _ => None,
                };
                return DispatchResult::refused(&e, status);
            }
        };

        metrics::counter!("dispatch.runs").increment(1);
        self.event_sink.emit(
            make_event(CampaignEventType::DispatchStarted, campaign_id)
                .with_detail(format!("{} pending", campaign.pending_count())),
        );
        info!(
            campaign_id = %campaign_id,
            total = campaign.total_recipients,
            pending = campaign.pending_count(),
            "Dispatch started"
        );

        let mut tally = RunTally::new(&campaign, self.config.max_reported_errors);
        let end = self.run(&campaign, content, reporter, &mut tally).await;
        self.finish(campaign_id, end, tally).await
    }

    /// Move the campaign into `sending`. `Ok(None)` means it is already
    /// completed and the call is a no-op.
    async fn claim(&self, campaign_id: Uuid) -> CampaignResult<Option<Campaign>> {
        let campaign = self.store.get_campaign(campaign_id).await?;
        match campaign.status {
            CampaignStatus::Completed => return Ok(None),
            CampaignStatus::Sending => return Err(CampaignError::AlreadyDispatching(campaign_id)),
            status => self.lifecycle.check(status, CampaignStatus::Sending)?,
        }
        debug!(
            campaign_id = %campaign_id,
            from = campaign.status.as_str(),
            trigger = self.lifecycle.trigger(campaign.status, CampaignStatus::Sending),
            "Claiming campaign"
        );

        let update = StatusUpdate::to(CampaignStatus::Sending)
            .expecting(campaign.status)
            .started_at(Utc::now());
        match self.store.update_campaign_status(campaign_id, update).await {
            Ok(claimed) => Ok(Some(claimed)),
            Err(CampaignError::InvalidTransition {
                from: CampaignStatus::Sending,
                ..
            }) => Err(CampaignError::AlreadyDispatching(campaign_id)),
            Err(e) => Err(e),
        }
    }

    async fn run(
        &self,
        campaign: &Campaign,
        content: &str,
        reporter: &dyn ProgressReporter,
        tally: &mut RunTally,
    ) -> RunEnd {
        let campaign_id = campaign.id;

        if !self.transport.is_ready().await {
            return RunEnd::Aborted(CampaignError::Transport(format!(
                "transport {} is not ready",
                self.transport.name()
            )));
        }

        let pending = match self.store.list_pending_recipients(campaign_id).await {
            Ok(pending) => pending,
            Err(e) => return RunEnd::Aborted(e),
        };
        let batch_size = self.config.batch_size.max(1);
        let batch_count = pending.len().div_ceil(batch_size);

        for (index, batch) in pending.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.batch_delay()).await;
            }

            // Cancellation is cooperative and only observed between batches.
            match self.store.get_campaign(campaign_id).await {
                Ok(current) if current.status == CampaignStatus::Cancelled => {
                    info!(
                        campaign_id = %campaign_id,
                        batch = index + 1,
                        batches = batch_count,
                        "Cancellation observed at batch boundary"
                    );
                    return RunEnd::Cancelled;
                }
                Ok(_) => {}
                Err(e) => return RunEnd::Aborted(e),
            }

            let outcomes = join_all(
                batch
                    .iter()
                    .map(|recipient| self.send_one(campaign_id, recipient, content)),
            )
            .await;

            let mut unrecorded = None;
            for (recipient, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    RecipientOutcome::Sent => tally.sent += 1,
                    RecipientOutcome::Failed(reason) => {
                        tally.failed += 1;
                        tally.record_error(format!("{}: {}", recipient.customer_id, reason));
                    }
                    RecipientOutcome::Unrecorded(e) => {
                        unrecorded.get_or_insert(e);
                    }
                }
            }

            metrics::counter!("dispatch.batches").increment(1);
            let progress = tally.progress();
            debug!(
                campaign_id = %campaign_id,
                batch = index + 1,
                batches = batch_count,
                sent = progress.sent,
                failed = progress.failed,
                total = progress.total,
                "Batch drained"
            );
            reporter.report(progress);

            if let Some(e) = unrecorded {
                return RunEnd::Aborted(e);
            }
        }

        RunEnd::Drained
    }

    async fn send_one(
        &self,
        campaign_id: Uuid,
        recipient: &Recipient,
        content: &str,
    ) -> RecipientOutcome {
        tokio::time::sleep(self.config.message_delay()).await;

        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.config.send_timeout(),
            self.transport.send(&recipient.address, content),
        )
        .await
        {
            Ok(Ok(outcome)) if outcome.success => Ok(outcome.message_id),
            Ok(Ok(outcome)) => Err(outcome
                .error
                .unwrap_or_else(|| "transport reported failure".to_string())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "send timed out after {}ms",
                self.config.send_timeout_ms
            )),
        };
        metrics::histogram!("dispatch.send_latency_ms")
            .record(started.elapsed().as_millis() as f64);

        match result {
            Ok(message_id) => {
                let update = RecipientUpdate::sent(Utc::now(), message_id);
                if let Err(e) = self.store.record_recipient_outcome(recipient.id, update).await {
                    return RecipientOutcome::Unrecorded(e);
                }
                metrics::counter!("dispatch.messages_sent").increment(1);
                self.event_sink.emit(
                    make_event(CampaignEventType::MessageSent, campaign_id)
                        .with_recipient(recipient.id, recipient.customer_id.clone()),
                );
                RecipientOutcome::Sent
            }
            Err(reason) => {
                warn!(
                    campaign_id = %campaign_id,
                    customer_id = %recipient.customer_id,
                    error = %reason,
                    "Recipient send failed"
                );
                let update = RecipientUpdate::failed(reason.clone());
                if let Err(e) = self.store.record_recipient_outcome(recipient.id, update).await {
                    return RecipientOutcome::Unrecorded(e);
                }
                metrics::counter!("dispatch.messages_failed").increment(1);
                self.event_sink.emit(
                    make_event(CampaignEventType::MessageFailed, campaign_id)
                        .with_recipient(recipient.id, recipient.customer_id.clone())
                        .with_detail(reason.clone()),
                );
                RecipientOutcome::Failed(reason)
            }
        }
    }

    async fn finish(&self, campaign_id: Uuid, end: RunEnd, tally: RunTally) -> DispatchResult {
        let failure = match end {
            RunEnd::Drained => match self.complete(campaign_id).await {
                Ok(CampaignStatus::Completed) => {
                    metrics::counter!("dispatch.completed").increment(1);
                    self.event_sink.emit(
                        make_event(CampaignEventType::DispatchCompleted, campaign_id).with_detail(
                            format!("sent={} failed={}", tally.sent, tally.failed),
                        ),
                    );
                    info!(
                        campaign_id = %campaign_id,
                        sent = tally.sent,
                        failed = tally.failed,
                        "Dispatch completed"
                    );
                    return tally.into_result(true, Some(CampaignStatus::Completed), None);
                }
                Ok(status) => return tally.into_result(true, Some(status), None),
                Err(e) => e,
            },
            RunEnd::Cancelled => {
                info!(
                    campaign_id = %campaign_id,
                    sent = tally.sent,
                    failed = tally.failed,
                    "Dispatch stopped by cancellation"
                );
                return tally.into_result(true, Some(CampaignStatus::Cancelled), None);
            }
            RunEnd::Aborted(e) => e,
        };

        error!(campaign_id = %campaign_id, error = %failure, "Dispatch aborted");
        let status = self.fail(campaign_id, &failure).await;
        tally.into_result(false, status, Some(&failure))
    }

    /// Enter `completed` once nothing is pending and the counters add up.
    async fn complete(&self, campaign_id: Uuid) -> CampaignResult<CampaignStatus> {
        let remaining = self.store.list_pending_recipients(campaign_id).await?;
        let campaign = self.store.get_campaign(campaign_id).await?;
        if campaign.status == CampaignStatus::Cancelled {
            return Ok(CampaignStatus::Cancelled);
        }
        if !remaining.is_empty()
            || campaign.sent_count + campaign.failed_count != campaign.total_recipients
        {
            return Err(CampaignError::DispatchIncomplete {
                pending: remaining.len(),
                sent: campaign.sent_count,
                failed: campaign.failed_count,
                total: campaign.total_recipients,
            });
        }

        let update = StatusUpdate::to(CampaignStatus::Completed)
            .expecting(CampaignStatus::Sending)
            .completed_at(Utc::now());
        match self.store.update_campaign_status(campaign_id, update).await {
            Ok(_) => Ok(CampaignStatus::Completed),
            // Cancelled between the last batch and now: keep the cancel.
            Err(CampaignError::InvalidTransition {
                from: CampaignStatus::Cancelled,
                ..
            }) => Ok(CampaignStatus::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// Best-effort move to `failed`. Recipient rows are left as they are.
    async fn fail(&self, campaign_id: Uuid, cause: &CampaignError) -> Option<CampaignStatus> {
        metrics::counter!("dispatch.failed").increment(1);
        self.event_sink.emit(
            make_event(CampaignEventType::DispatchFailed, campaign_id).with_detail(cause.to_string()),
        );

        let update = StatusUpdate::to(CampaignStatus::Failed).expecting(CampaignStatus::Sending);
        match self.store.update_campaign_status(campaign_id, update).await {
            Ok(_) => Some(CampaignStatus::Failed),
            Err(CampaignError::InvalidTransition { from, .. }) => Some(from),
            Err(e) => {
                error!(
                    campaign_id = %campaign_id,
                    error = %e,
                    "Could not mark campaign failed"
                );
                None
            }
        }
    }
}
