//! Campaign persistence: the store collaborator the dispatcher writes
//! campaign and recipient state through.
//!
//! `InMemoryCampaignStore` backs development, the CLI, and tests; swap in a
//! database-backed `CampaignStore` for production.

pub mod store;

pub use store::{CampaignStore, InMemoryCampaignStore, StatusChange};
