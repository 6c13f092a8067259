//! Bulk promotional-message dispatch: campaign lifecycle, the batched and
//! rate-limited send loop, progress reporting, and the caller-facing
//! campaign service.

pub mod engine;
pub mod lifecycle;
pub mod progress;
pub mod service;

pub use engine::{DispatchEngine, DispatchResult};
pub use lifecycle::CampaignLifecycle;
pub use progress::{ChannelReporter, NoProgress, ProgressReporter, WatchReporter};
pub use service::{
    CampaignProgress, CampaignService, CreateCampaignResponse, OperationResponse,
    RecipientEstimate,
};
