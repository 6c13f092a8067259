//! Scripted transport for dry runs and tests.
//!
//! Every address succeeds unless scripted otherwise: rejected with a
//! provider error, raised as a transport exception, or stalled until the
//! caller's timeout fires.

use async_trait::async_trait;
use campaign_core::{CampaignError, CampaignResult};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::transport::{SendOutcome, Transport};

pub struct MockTransport {
    ready: AtomicBool,
    rejections: DashMap<String, String>,
    exceptions: DashMap<String, String>,
    stalls: DashSet<String>,
    latency: Mutex<Duration>,
    sent: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            rejections: DashMap::new(),
            exceptions: DashMap::new(),
            stalls: DashSet::new(),
            latency: Mutex::new(Duration::ZERO),
            sent: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Provider-reported failure for `address`.
    pub fn reject(&self, address: impl Into<String>, error: impl Into<String>) {
        self.rejections.insert(address.into(), error.into());
    }

    /// Transport exception for `address`.
    pub fn raise(&self, address: impl Into<String>, error: impl Into<String>) {
        self.exceptions.insert(address.into(), error.into());
    }

    /// Never answer for `address`.
    pub fn stall(&self, address: impl Into<String>) {
        self.stalls.insert(address.into());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Every accepted or rejected call, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn calls_to(&self, address: &str) -> usize {
        self.sent.lock().iter().filter(|(a, _)| a == address).count()
    }

    /// Highest number of concurrent `send` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send(&self, address: &str, content: &str) -> CampaignResult<SendOutcome> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        self.sent
            .lock()
            .push((address.to_string(), content.to_string()));

        if self.stalls.contains(address) {
            std::future::pending::<()>().await;
        }

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.exceptions.get(address) {
            return Err(CampaignError::Transport(error.clone()));
        }
        if let Some(error) = self.rejections.get(address) {
            return Ok(SendOutcome::rejected(error.clone()));
        }
        Ok(SendOutcome::accepted(format!("mock-{}", Uuid::new_v4())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let transport = MockTransport::new();
        transport.reject("551100000002", "not on whatsapp");
        transport.raise("551100000003", "connection reset");

        assert!(transport.send("551100000001", "hi").await.unwrap().success);
        let rejected = transport.send("551100000002", "hi").await.unwrap();
        assert_eq!(rejected.error.as_deref(), Some("not on whatsapp"));
        assert!(matches!(
            transport.send("551100000003", "hi").await,
            Err(CampaignError::Transport(_))
        ));

        assert_eq!(transport.call_count(), 3);
        assert_eq!(transport.calls_to("551100000002"), 1);
        assert_eq!(transport.peak_concurrency(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_never_completes() {
        let transport = MockTransport::new();
        transport.stall("551100000009");
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            transport.send("551100000009", "hi"),
        )
        .await;
        assert!(result.is_err());
    }
}
