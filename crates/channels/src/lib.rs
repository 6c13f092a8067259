//! Messaging transports for campaign delivery.
//!
//! The dispatcher only sees the [`Transport`] trait; concrete providers
//! (WhatsApp Business API) and the scripted mock used by tests and dry
//! runs live here.

pub mod mock;
pub mod transport;
pub mod whatsapp;

pub use mock::MockTransport;
pub use transport::{SendOutcome, Transport};
pub use whatsapp::{WhatsAppConfig, WhatsAppProvider};
