//! Customer data collaborator. The evaluator reads customers and order
//! history through this trait and never assumes a particular database.

use async_trait::async_trait;
use campaign_core::types::{CompletedOrder, Customer};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

#[async_trait]
pub trait CustomerSource: Send + Sync {
    /// All customers, in a stable order.
    async fn list_customers(&self) -> CampaignResult<Vec<Customer>>;

    /// The customers with the given ids. Unknown ids are skipped; order
    /// of the result is unspecified.
    async fn customers_by_ids(&self, ids: &[String]) -> CampaignResult<Vec<Customer>>;

    /// Completed orders closed at or after `since`.
    async fn completed_orders_since(
        &self,
        since: DateTime<Utc>,
    ) -> CampaignResult<Vec<CompletedOrder>>;
}

/// In-memory customer source for development, the CLI, and tests.
///
/// Order history can be marked unavailable to exercise degraded selection.
pub struct InMemoryCustomerSource {
    customers: RwLock<Vec<Customer>>,
    orders: RwLock<Vec<CompletedOrder>>,
    orders_available: RwLock<bool>,
}

impl InMemoryCustomerSource {
    pub fn new(customers: Vec<Customer>) -> Self {
        info!(customers = customers.len(), "In-memory customer source initialized");
        Self {
            customers: RwLock::new(customers),
            orders: RwLock::new(Vec::new()),
            orders_available: RwLock::new(true),
        }
    }

    pub fn with_orders(self, orders: Vec<CompletedOrder>) -> Self {
        *self.orders.write() = orders;
        self
    }

    pub fn insert_customer(&self, customer: Customer) {
        let mut customers = self.customers.write();
        match customers.iter_mut().find(|c| c.id == customer.id) {
            Some(existing) => *existing = customer,
            None => customers.push(customer),
        }
    }

    pub fn record_order(&self, order: CompletedOrder) {
        self.orders.write().push(order);
    }

    pub fn set_order_history_available(&self, available: bool) {
        *self.orders_available.write() = available;
    }
}

#[async_trait]
impl CustomerSource for InMemoryCustomerSource {
    async fn list_customers(&self) -> CampaignResult<Vec<Customer>> {
        Ok(self.customers.read().clone())
    }

    async fn customers_by_ids(&self, ids: &[String]) -> CampaignResult<Vec<Customer>> {
        let customers = self.customers.read();
        let by_id: HashMap<&str, &Customer> =
            customers.iter().map(|c| (c.id.as_str(), c)).collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|c| (*c).clone()))
            .collect())
    }

    async fn completed_orders_since(
        &self,
        since: DateTime<Utc>,
    ) -> CampaignResult<Vec<CompletedOrder>> {
        if !*self.orders_available.read() {
            return Err(CampaignError::Store("order history unavailable".to_string()));
        }
        Ok(self
            .orders
            .read()
            .iter()
            .filter(|o| o.closed_at >= since)
            .cloned()
            .collect())
    }
}
