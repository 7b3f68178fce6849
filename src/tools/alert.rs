//! Operator alerting
//!
//! Used for failures that must not be swallowed, most importantly a JIT
//! revoke that could not complete.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info};

/// An alert for the on-call operator
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub source: String,
    pub summary: String,
    pub subject: Option<String>,
    pub details: serde_json::Value,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(source: &str, summary: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            summary: summary.into(),
            subject: None,
            details: serde_json::Value::Null,
            raised_at: Utc::now(),
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Delivery channel for operator alerts
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn raise(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the structured log at error level
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn raise(&self, alert: &Alert) -> Result<()> {
        error!(
            source = %alert.source,
            subject = ?alert.subject,
            details = %alert.details,
            "ALERT: {}",
            alert.summary
        );
        Ok(())
    }
}

/// Posts alerts as JSON to a webhook (chat or paging integration)
///
/// Always logs as well, so a webhook outage cannot hide the alert.
pub struct WebhookAlerter {
    http_client: Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn raise(&self, alert: &Alert) -> Result<()> {
        LogAlerter.raise(alert).await?;

        let response = self
            .http_client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .context("Failed to deliver alert webhook")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Alert webhook returned {}: {}", status, body);
        }

        info!(summary = %alert.summary, "Alert delivered to webhook");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_builder() {
        let alert = Alert::new("jit_access", "Revoke failed")
            .subject("req-1")
            .details(serde_json::json!({ "attempts": 3 }));

        assert_eq!(alert.source, "jit_access");
        assert_eq!(alert.subject.as_deref(), Some("req-1"));
        assert_eq!(alert.details["attempts"], 3);
    }

    #[tokio::test]
    async fn test_log_alerter_never_fails() {
        assert!(LogAlerter.raise(&Alert::new("test", "hello")).await.is_ok());
    }
}
