//! Progress reporting: how the engine hands `{sent, total, failed}`
//! snapshots to its caller. Snapshots are emitted only after a batch has
//! drained and been persisted.

use campaign_core::types::DispatchProgress;
use tokio::sync::{mpsc, watch};

pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: DispatchProgress);
}

impl<F> ProgressReporter for F
where
    F: Fn(DispatchProgress) + Send + Sync,
{
    fn report(&self, progress: DispatchProgress) {
        self(progress)
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: DispatchProgress) {}
}

/// Streams every snapshot over an unbounded channel.
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<DispatchProgress>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, progress: DispatchProgress) {
        // A dropped receiver only means nobody is watching.
        let _ = self.tx.send(progress);
    }
}

/// Keeps only the latest snapshot, for pollers.
pub struct WatchReporter {
    tx: watch::Sender<DispatchProgress>,
}

impl WatchReporter {
    pub fn new(initial: DispatchProgress) -> (Self, watch::Receiver<DispatchProgress>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }
}

impl ProgressReporter for WatchReporter {
    fn report(&self, progress: DispatchProgress) {
        self.tx.send_replace(progress);
    }
}
