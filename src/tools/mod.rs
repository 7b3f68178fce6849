//! Shared integrations used by the agents
//!
//! - `aws`: SDK configuration from the ambient credential chain
//! - `alert`: operator alerting (log and webhook)

pub mod alert;
pub mod aws;

pub use alert::{Alert, Alerter, LogAlerter, WebhookAlerter};
pub use aws::load_sdk_config;
