//! Recipient selection: resolves declarative campaign criteria into a
//! deduplicated, contactable recipient list over the customer base.

pub mod evaluator;
pub mod predicates;
pub mod source;

pub use evaluator::{CriteriaEvaluator, DegradePolicy, Resolution};
pub use predicates::CustomerFilter;
pub use source::{CustomerSource, InMemoryCustomerSource};
