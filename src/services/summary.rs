//! End-of-day sales summary job.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::errors::ServiceError;
use crate::repositories::{ProductStore, SaleStore};
use crate::services::mailer::Mailer;

/// Fully resolved summary handed to the mailer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummaryReport {
    pub date: NaiveDate,
    pub total_sales: Decimal,
    pub quantity_sold: i64,
    pub top_product_name: String,
    pub top_product_quantity: i64,
}

/// Sends one aggregate summary per invocation. Scheduling (cron, systemd
/// timer, hosted trigger) is the caller's concern.
pub struct DailySummaryJob {
    sales: Arc<dyn SaleStore>,
    products: Arc<dyn ProductStore>,
    mailer: Arc<dyn Mailer>,
}

impl DailySummaryJob {
    pub fn new(
        sales: Arc<dyn SaleStore>,
        products: Arc<dyn ProductStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            sales,
            products,
            mailer,
        }
    }

    /// Summarizes today's completed sales. Failures are logged, never
    /// propagated; the host process must not die over a missed summary.
    pub async fn run_once(&self) {
        let today = Utc::now().date_naive();
        match self.send_summary_for(today).await {
            Ok(()) => info!(date = %today, "Daily sales summary sent"),
            Err(e) => error!(error = %e, date = %today, "Failed to send daily sales summary"),
        }
    }

    #[instrument(skip(self))]
    pub async fn send_summary_for(&self, day: NaiveDate) -> Result<(), ServiceError> {
        let report = match self.sales.daily_summary(day).await? {
            Some(summary) => {
                let top_product_name = match summary.top_product_id {
                    Some(id) => self
                        .products
                        .find_by_id(id)
                        .await?
                        .map(|p| p.name)
                        .unwrap_or_else(|| "Unknown".to_string()),
                    None => "Unknown".to_string(),
                };
                DailySummaryReport {
                    date: day,
                    total_sales: summary.total_sales,
                    quantity_sold: summary.quantity_sold,
                    top_product_name,
                    top_product_quantity: summary.top_product_quantity,
                }
            }
            // No completed sales; the rendered mail says so
            None => DailySummaryReport {
                date: day,
                total_sales: Decimal::ZERO,
                quantity_sold: 0,
                top_product_name: String::new(),
                top_product_quantity: 0,
            },
        };

        self.mailer.send_daily_summary(&report).await
    }
}
