//! Filter predicates: one per criteria dimension, intersected by the
//! evaluator.

use campaign_core::types::{Customer, CustomerTier};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum CustomerFilter {
    Tier(HashSet<CustomerTier>),
    Points { min: Option<u32>, max: Option<u32> },
    Spend { min: Option<f64>, max: Option<f64> },
    /// Customer ids with a completed order inside the recency window.
    RecentOrder(HashSet<String>),
    VerifiedContact,
    ActiveAccount,
}

impl CustomerFilter {
    pub fn matches(&self, customer: &Customer) -> bool {
        match self {
            CustomerFilter::Tier(tiers) => tiers.contains(&customer.tier),
            CustomerFilter::Points { min, max } => {
                within(customer.loyalty_points, *min, *max)
            }
            CustomerFilter::Spend { min, max } => {
                min.map_or(true, |m| customer.total_spent >= m)
                    && max.map_or(true, |m| customer.total_spent <= m)
            }
            CustomerFilter::RecentOrder(ids) => ids.contains(&customer.id),
            CustomerFilter::VerifiedContact => customer.contact_verified,
            CustomerFilter::ActiveAccount => customer.is_active,
        }
    }

    /// Criteria field this filter came from, for degradation reports.
    pub fn dimension(&self) -> &'static str {
        match self {
            CustomerFilter::Tier(_) => "tiers",
            CustomerFilter::Points { .. } => "points",
            CustomerFilter::Spend { .. } => "spend",
            CustomerFilter::RecentOrder(_) => "last_order_days",
            CustomerFilter::VerifiedContact => "has_contact",
            CustomerFilter::ActiveAccount => "is_active",
        }
    }
}

fn within<T: PartialOrd>(value: T, min: Option<T>, max: Option<T>) -> bool {
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}
