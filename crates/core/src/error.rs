use thiserror::Error;
use uuid::Uuid;

use crate::types::CampaignStatus;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Criteria validation error: {0}")]
    Validation(String),

    #[error("Recipient selection degraded, skipped filters: {}", .0.join(", "))]
    SelectionDegraded(Vec<String>),

    #[error("No recipients matched the campaign criteria")]
    NoRecipients,

    #[error("Campaign {0} is already dispatching")]
    AlreadyDispatching(Uuid),

    #[error("Invalid campaign transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("Dispatch pass ended with {pending} recipients pending (sent={sent} failed={failed} total={total})")]
    DispatchIncomplete {
        pending: usize,
        sent: u32,
        failed: u32,
        total: u32,
    },

    #[error("Campaign {0} not found")]
    CampaignNotFound(Uuid),

    #[error("Recipient {0} not found")]
    RecipientNotFound(String),

    #[error("Campaign store error: {0}")]
    Store(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
