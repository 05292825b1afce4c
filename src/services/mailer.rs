//! Notification delivery.
//!
//! The original system mailed over SMTP; here delivery is an HTTP webhook
//! carrying the rendered subject and HTML body, behind the `Mailer` trait so
//! the rest of the system never sees the transport.

use async_trait::async_trait;
use tracing::{error, info};

use crate::errors::ServiceError;
use crate::services::alerts::LowStockAlertMessage;
use crate::services::summary::DailySummaryReport;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_low_stock_alert(&self, alert: &LowStockAlertMessage) -> Result<(), ServiceError>;
    async fn send_daily_summary(&self, summary: &DailySummaryReport) -> Result<(), ServiceError>;
}

pub fn low_stock_subject(alert: &LowStockAlertMessage) -> String {
    format!("Low Stock Alert - {}", alert.product_name)
}

pub fn render_low_stock_body(alert: &LowStockAlertMessage) -> String {
    format!(
        "<html>\
         <body style='font-family:sans-serif;'>\
         <h2>Low Stock Alert</h2>\
         <p><b>{}</b> (product #{}) is down to <b>{}</b> units.</p>\
         <p>Recorded at {}.</p>\
         <p>Please restock soon.</p>\
         </body>\
         </html>",
        alert.product_name,
        alert.product_id,
        alert.current_stock,
        alert.timestamp.to_rfc3339(),
    )
}

pub fn summary_subject(summary: &DailySummaryReport) -> String {
    format!("Daily Sales Summary - {}", summary.date.format("%B %d, %Y"))
}

pub fn render_summary_body(summary: &DailySummaryReport) -> String {
    let date = summary.date.format("%B %d, %Y");

    if summary.quantity_sold == 0 {
        return format!(
            "<html>\
             <body style='font-family:sans-serif;'>\
             <h2>Sales Summary for {date}</h2>\
             <p>No sales recorded for this day.</p>\
             </body>\
             </html>"
        );
    }

    format!(
        "<html>\
         <body style='font-family:sans-serif;'>\
         <h2>Sales Summary for {date}</h2>\
         <table border='1' cellpadding='6' cellspacing='0'>\
         <tr><td>Total sales</td><td>{}</td></tr>\
         <tr><td>Units sold</td><td>{}</td></tr>\
         <tr><td>Top product</td><td>{} ({} units)</td></tr>\
         </table>\
         </body>\
         </html>",
        summary.total_sales,
        summary.quantity_sold,
        summary.top_product_name,
        summary.top_product_quantity,
    )
}

/// Delivers notifications as JSON to a configured webhook endpoint.
pub struct WebhookMailer {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookMailer {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    async fn deliver(&self, subject: String, html: String) -> Result<(), ServiceError> {
        let payload = serde_json::json!({
            "subject": subject,
            "html": html,
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Notification webhook request failed");
                ServiceError::ExternalServiceError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "Notification webhook returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send_low_stock_alert(&self, alert: &LowStockAlertMessage) -> Result<(), ServiceError> {
        info!(product_id = alert.product_id, product_name = %alert.product_name, "Sending low stock alert");
        self.deliver(low_stock_subject(alert), render_low_stock_body(alert))
            .await?;
        info!(product_name = %alert.product_name, "Low stock alert sent");
        Ok(())
    }

    async fn send_daily_summary(&self, summary: &DailySummaryReport) -> Result<(), ServiceError> {
        info!(date = %summary.date, "Sending daily sales summary");
        self.deliver(summary_subject(summary), render_summary_body(summary))
            .await?;
        info!("Daily summary sent");
        Ok(())
    }
}

/// Renders and logs without delivering; used when no webhook is configured.
#[derive(Default)]
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send_low_stock_alert(&self, alert: &LowStockAlertMessage) -> Result<(), ServiceError> {
        info!(
            subject = %low_stock_subject(alert),
            "No notification webhook configured, dropping low stock alert"
        );
        Ok(())
    }

    async fn send_daily_summary(&self, summary: &DailySummaryReport) -> Result<(), ServiceError> {
        info!(
            subject = %summary_subject(summary),
            "No notification webhook configured, dropping daily summary"
        );
        Ok(())
    }
}

/// Test double that records every send and can fail on demand.
#[derive(Default)]
pub struct RecordingMailer {
    pub alerts: std::sync::Mutex<Vec<LowStockAlertMessage>>,
    pub summaries: std::sync::Mutex<Vec<DailySummaryReport>>,
    fail_sends: std::sync::atomic::AtomicUsize,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` sends fail with an external-service error.
    pub fn fail_next(&self, n: usize) {
        self.fail_sends
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        self.fail_sends
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |n| n.checked_sub(1),
            )
            .is_ok()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_low_stock_alert(&self, alert: &LowStockAlertMessage) -> Result<(), ServiceError> {
        if self.should_fail() {
            return Err(ServiceError::ExternalServiceError(
                "simulated mailer outage".to_string(),
            ));
        }
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    async fn send_daily_summary(&self, summary: &DailySummaryReport) -> Result<(), ServiceError> {
        if self.should_fail() {
            return Err(ServiceError::ExternalServiceError(
                "simulated mailer outage".to_string(),
            ));
        }
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}
