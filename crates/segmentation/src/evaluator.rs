//! Criteria evaluator: turns a `TargetCriteria` into an ordered,
//! deduplicated list of contactable recipients.

use campaign_core::address::normalize_address;
use campaign_core::config::{AddressingConfig, SelectionConfig};
use campaign_core::types::{Customer, ResolvedRecipient, TargetCriteria};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::predicates::CustomerFilter;
use crate::source::CustomerSource;

/// What to do when a filter dimension cannot be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradePolicy {
    /// Skip the filter and report it. Used for estimates.
    FailOpen,
    /// Refuse with `SelectionDegraded`. Used before anything is sent.
    FailClosed,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub recipients: Vec<ResolvedRecipient>,
    /// Criteria fields that could not be evaluated and were skipped.
    pub skipped_filters: Vec<String>,
}

impl Resolution {
    pub fn is_degraded(&self) -> bool {
        !self.skipped_filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

pub struct CriteriaEvaluator {
    source: Arc<dyn CustomerSource>,
    addressing: AddressingConfig,
    selection: SelectionConfig,
}

impl CriteriaEvaluator {
    pub fn new(
        source: Arc<dyn CustomerSource>,
        addressing: AddressingConfig,
        selection: SelectionConfig,
    ) -> Self {
        Self {
            source,
            addressing,
            selection,
        }
    }

    pub async fn resolve(
        &self,
        criteria: &TargetCriteria,
        policy: DegradePolicy,
    ) -> CampaignResult<Resolution> {
        self.resolve_at(criteria, policy, Utc::now()).await
    }

    /// Resolve relative to an explicit evaluation time (recency window).
    pub async fn resolve_at(
        &self,
        criteria: &TargetCriteria,
        policy: DegradePolicy,
        now: DateTime<Utc>,
    ) -> CampaignResult<Resolution> {
        criteria.validate()?;

        let resolution = if criteria.has_override() {
            self.resolve_explicit(&criteria.specific_customers).await?
        } else {
            self.resolve_filtered(criteria, now).await?
        };

        if resolution.is_degraded() {
            metrics::counter!("selection.degraded").increment(1);
            if policy == DegradePolicy::FailClosed {
                return Err(CampaignError::SelectionDegraded(resolution.skipped_filters));
            }
        }

        debug!(
            recipients = resolution.len(),
            skipped = ?resolution.skipped_filters,
            explicit = criteria.has_override(),
            "Criteria resolved"
        );
        Ok(resolution)
    }

    async fn resolve_explicit(&self, ids: &[String]) -> CampaignResult<Resolution> {
        let found = self.source.customers_by_ids(ids).await?;

        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(customer) = found.iter().find(|c| &c.id == id) else {
                continue;
            };
            if let Some(address) = self.address_of(customer) {
                recipients.push(ResolvedRecipient {
                    customer_id: customer.id.clone(),
                    address,
                });
            }
        }

        Ok(Resolution {
            recipients,
            skipped_filters: Vec::new(),
        })
    }

    async fn resolve_filtered(
        &self,
        criteria: &TargetCriteria,
        now: DateTime<Utc>,
    ) -> CampaignResult<Resolution> {
        let (filters, skipped_filters) = self.build_filters(criteria, now).await;
        let customers = self.source.list_customers().await?;

        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        for customer in &customers {
            if !filters.iter().all(|f| f.matches(customer)) {
                continue;
            }
            let Some(address) = self.address_of(customer) else {
                continue;
            };
            if seen.insert(customer.id.clone()) {
                recipients.push(ResolvedRecipient {
                    customer_id: customer.id.clone(),
                    address,
                });
            }
        }

        Ok(Resolution {
            recipients,
            skipped_filters,
        })
    }

    async fn build_filters(
        &self,
        criteria: &TargetCriteria,
        now: DateTime<Utc>,
    ) -> (Vec<CustomerFilter>, Vec<String>) {
        let mut filters = Vec::new();
        let mut skipped = Vec::new();

        if let Some(tiers) = criteria.tiers.as_ref().filter(|t| !t.is_empty()) {
            filters.push(CustomerFilter::Tier(tiers.iter().copied().collect()));
        }
        if criteria.min_points.is_some() || criteria.max_points.is_some() {
            filters.push(CustomerFilter::Points {
                min: criteria.min_points,
                max: criteria.max_points,
            });
        }
        if criteria.min_spend.is_some() || criteria.max_spend.is_some() {
            filters.push(CustomerFilter::Spend {
                min: criteria.min_spend,
                max: criteria.max_spend,
            });
        }
        if let Some(days) = criteria.last_order_days {
            let since = now - Duration::days(i64::from(days));
            match self.source.completed_orders_since(since).await {
                Ok(orders) => {
                    let ids = orders
                        .into_iter()
                        .filter(|o| o.closed_at <= now)
                        .map(|o| o.customer_id)
                        .collect();
                    filters.push(CustomerFilter::RecentOrder(ids));
                }
                Err(e) => {
                    warn!(error = %e, days = days, "Order history unavailable, skipping recency filter");
                    skipped.push("last_order_days".to_string());
                }
            }
        }
        if criteria
            .has_contact
            .unwrap_or(self.selection.require_verified_contact_by_default)
        {
            filters.push(CustomerFilter::VerifiedContact);
        }
        if criteria
            .is_active
            .unwrap_or(self.selection.require_active_by_default)
        {
            filters.push(CustomerFilter::ActiveAccount);
        }

        (filters, skipped)
    }

    fn address_of(&self, customer: &Customer) -> Option<String> {
        customer
            .phone
            .as_deref()
            .and_then(|raw| normalize_address(raw, &self.addressing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryCustomerSource;
    use campaign_core::types::{CompletedOrder, CustomerTier};

    fn customer(id: &str, tier: CustomerTier, phone: Option<&str>, verified: bool) -> Customer {
        Customer {
            id: id.to_string(),
            name: format!("Customer {}", id),
            phone: phone.map(str::to_string),
            tier,
            loyalty_points: 0,
            total_spent: 0.0,
            contact_verified: verified,
            is_active: true,
        }
    }

    fn evaluator(source: InMemoryCustomerSource) -> CriteriaEvaluator {
        CriteriaEvaluator::new(
            Arc::new(source),
            AddressingConfig::default(),
            SelectionConfig::default(),
        )
    }

    fn ids(resolution: &Resolution) -> Vec<&str> {
        resolution
            .recipients
            .iter()
            .map(|r| r.customer_id.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_gold_with_contact_scenario() {
        let source = InMemoryCustomerSource::new(vec![
            customer("g1", CustomerTier::Gold, Some("11 90000-0001"), true),
            customer("g2", CustomerTier::Gold, Some("11 90000-0002"), true),
            customer("g3", CustomerTier::Gold, Some("11 90000-0003"), true),
            customer("g4", CustomerTier::Gold, None, false),
            customer("s1", CustomerTier::Silver, Some("11 90000-0005"), true),
        ]);
        let criteria: TargetCriteria =
            serde_json::from_str(r#"{"tiers":["gold"],"has_whatsapp":true}"#).unwrap();

        let resolution = evaluator(source)
            .resolve(&criteria, DegradePolicy::FailClosed)
            .await
            .unwrap();

        assert_eq!(ids(&resolution), vec!["g1", "g2", "g3"]);
        assert_eq!(resolution.recipients[0].address, "5511900000001");
    }

    #[tokio::test]
    async fn test_explicit_override_preserves_order_and_dedupes() {
        let source = InMemoryCustomerSource::new(vec![
            customer("A", CustomerTier::Bronze, Some("(11) 91111-1111"), false),
            customer("B", CustomerTier::Gold, Some("---"), true),
            customer("C", CustomerTier::Silver, Some("11 93333-3333"), false),
        ]);
        // Other fields would exclude everyone; the override ignores them.
        let criteria = TargetCriteria {
            tiers: Some(vec![CustomerTier::Platinum]),
            has_contact: Some(true),
            specific_customers: vec![
                "C".to_string(),
                "A".to_string(),
                "B".to_string(),
                "A".to_string(),
                "missing".to_string(),
            ],
            ..Default::default()
        };

        let resolution = evaluator(source)
            .resolve(&criteria, DegradePolicy::FailClosed)
            .await
            .unwrap();

        assert_eq!(ids(&resolution), vec!["C", "A"]);
    }

    #[tokio::test]
    async fn test_empty_criteria_applies_defaults() {
        let mut inactive = customer("x", CustomerTier::Bronze, Some("11 95555-5555"), true);
        inactive.is_active = false;
        let source = InMemoryCustomerSource::new(vec![
            customer("ok", CustomerTier::Bronze, Some("11 94444-4444"), true),
            customer("unverified", CustomerTier::Bronze, Some("11 96666-6666"), false),
            inactive,
        ]);
        let evaluator = evaluator(source);

        let defaults = evaluator
            .resolve(&TargetCriteria::default(), DegradePolicy::FailOpen)
            .await
            .unwrap();
        assert_eq!(ids(&defaults), vec!["ok"]);

        let unfiltered = TargetCriteria {
            has_contact: Some(false),
            is_active: Some(false),
            ..Default::default()
        };
        let all = evaluator
            .resolve(&unfiltered, DegradePolicy::FailOpen)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_point_and_spend_ranges_intersect() {
        let mut a = customer("a", CustomerTier::Silver, Some("11 90000-0001"), true);
        a.loyalty_points = 150;
        a.total_spent = 320.0;
        let mut b = customer("b", CustomerTier::Silver, Some("11 90000-0002"), true);
        b.loyalty_points = 150;
        b.total_spent = 80.0;
        let mut c = customer("c", CustomerTier::Silver, Some("11 90000-0003"), true);
        c.loyalty_points = 20;
        c.total_spent = 500.0;

        let criteria = TargetCriteria {
            min_points: Some(100),
            max_points: Some(200),
            min_spend: Some(100.0),
            ..Default::default()
        };
        let resolution = evaluator(InMemoryCustomerSource::new(vec![a, b, c]))
            .resolve(&criteria, DegradePolicy::FailClosed)
            .await
            .unwrap();
        assert_eq!(ids(&resolution), vec!["a"]);
    }

    #[tokio::test]
    async fn test_recency_window() {
        let now = Utc::now();
        let source = InMemoryCustomerSource::new(vec![
            customer("recent", CustomerTier::Bronze, Some("11 90000-0001"), true),
            customer("stale", CustomerTier::Bronze, Some("11 90000-0002"), true),
        ])
        .with_orders(vec![
            CompletedOrder {
                customer_id: "recent".to_string(),
                closed_at: now - Duration::days(3),
            },
            CompletedOrder {
                customer_id: "stale".to_string(),
                closed_at: now - Duration::days(45),
            },
        ]);
        let criteria = TargetCriteria {
            last_order_days: Some(30),
            ..Default::default()
        };

        let resolution = evaluator(source)
            .resolve_at(&criteria, DegradePolicy::FailClosed, now)
            .await
            .unwrap();
        assert_eq!(ids(&resolution), vec!["recent"]);
    }

    #[tokio::test]
    async fn test_unavailable_history_fails_open_for_estimates_only() {
        let source = InMemoryCustomerSource::new(vec![
            customer("a", CustomerTier::Bronze, Some("11 90000-0001"), true),
            customer("b", CustomerTier::Bronze, Some("11 90000-0002"), true),
        ]);
        source.set_order_history_available(false);
        let evaluator = evaluator(source);
        let criteria = TargetCriteria {
            last_order_days: Some(7),
            ..Default::default()
        };

        let estimate = evaluator
            .resolve(&criteria, DegradePolicy::FailOpen)
            .await
            .unwrap();
        assert!(estimate.is_degraded());
        assert_eq!(estimate.skipped_filters, vec!["last_order_days"]);
        assert_eq!(estimate.len(), 2);

        let strict = evaluator.resolve(&criteria, DegradePolicy::FailClosed).await;
        assert!(matches!(strict, Err(CampaignError::SelectionDegraded(f)) if f == vec!["last_order_days"]));
    }

    #[tokio::test]
    async fn test_invalid_criteria_rejected() {
        let criteria = TargetCriteria {
            min_spend: Some(200.0),
            max_spend: Some(100.0),
            ..Default::default()
        };
        let result = evaluator(InMemoryCustomerSource::new(vec![]))
            .resolve(&criteria, DegradePolicy::FailOpen)
            .await;
        assert!(matches!(result, Err(CampaignError::Validation(_))));
    }
}
