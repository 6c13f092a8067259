//! Campaign event bus: trait for emitting lifecycle and delivery events.
//!
//! The dispatcher accepts an `Arc<dyn EventSink>` so events can be routed
//! to an analytics pipeline, a message bus, or customer webhooks without
//! the core knowing which.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignEventType {
    CampaignCreated,
    CampaignScheduled,
    CampaignCancelled,
    DispatchStarted,
    MessageSent,
    MessageFailed,
    DispatchCompleted,
    DispatchFailed,
    DeliveryReceipt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub event_id: Uuid,
    pub event_type: CampaignEventType,
    pub campaign_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub customer_id: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CampaignEvent {
    pub fn with_recipient(mut self, recipient_id: Uuid, customer_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id);
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Trait for emitting campaign events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CampaignEvent);
}

/// No-op sink for callers that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: CampaignEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<CampaignEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<CampaignEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: CampaignEventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: CampaignEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for a `CampaignEvent` with minimal boilerplate.
pub fn make_event(event_type: CampaignEventType, campaign_id: Uuid) -> CampaignEvent {
    CampaignEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id,
        recipient_id: None,
        customer_id: None,
        detail: None,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        let campaign_id = Uuid::new_v4();
        let recipient_id = Uuid::new_v4();
        assert_eq!(sink.count(), 0);

        sink.emit(make_event(CampaignEventType::DispatchStarted, campaign_id));
        sink.emit(
            make_event(CampaignEventType::MessageFailed, campaign_id)
                .with_recipient(recipient_id, "cust-7")
                .with_detail("number not on network"),
        );

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(CampaignEventType::MessageFailed), 1);

        let events = sink.events();
        assert_eq!(events[1].recipient_id, Some(recipient_id));
        assert_eq!(events[1].customer_id.as_deref(), Some("cust-7"));
        assert_eq!(events[1].detail.as_deref(), Some("number not on network"));

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        sink.emit(make_event(CampaignEventType::CampaignCreated, Uuid::new_v4()));
    }
}
