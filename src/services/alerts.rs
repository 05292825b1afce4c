//! Low-stock alert pipeline: producer (queue side) and polling consumer.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::errors::ServiceError;
use crate::message_queue::{AlertQueue, QueuedMessage};
use crate::services::mailer::Mailer;

/// Wire shape of a low-stock alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockAlertMessage {
    pub product_id: i32,
    pub product_name: String,
    pub current_stock: i32,
    pub timestamp: DateTime<Utc>,
}

/// Producer side: serializes alerts and hands them to the durable queue.
pub struct StockAlertPublisher {
    queue: Arc<dyn AlertQueue>,
}

impl StockAlertPublisher {
    pub fn new(queue: Arc<dyn AlertQueue>) -> Self {
        Self { queue }
    }

    /// Enqueues an alert as base64-encoded JSON (the wire format older
    /// producers used; the consumer reads both encodings).
    #[instrument(skip(self, alert), fields(product_id = alert.product_id))]
    pub async fn publish(&self, alert: &LowStockAlertMessage) -> Result<(), ServiceError> {
        let json = serde_json::to_string(alert)?;
        let payload = BASE64.encode(json.as_bytes());

        self.queue
            .send(payload)
            .await
            .map_err(|e| ServiceError::QueueError(e.to_string()))?;

        info!(product_name = %alert.product_name, "Low stock alert enqueued");
        Ok(())
    }
}

/// Legacy-compatibility shim: payloads may be base64-of-UTF8-JSON or plain
/// JSON; try base64 first and fall back to the raw text.
pub(crate) fn decode_payload(raw: &str) -> String {
    match BASE64.decode(raw.trim()) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct StockAlertProcessorConfig {
    /// Messages fetched per polling cycle
    pub batch_size: usize,
    /// How long a received message stays invisible to other consumers
    pub visibility_timeout: Duration,
    /// Delay after a normal (empty or processed) cycle
    pub poll_interval: Duration,
    /// Delay after a cycle-level failure (queue unreachable)
    pub backoff: Duration,
}

impl Default for StockAlertProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            backoff: Duration::from_secs(30),
        }
    }
}

/// Consumer side: drains the queue and turns alerts into notifications.
///
/// Delivery is at-least-once: a message is deleted only after the
/// notification went out, so a failed send or delete leads to redelivery
/// once the visibility timeout lapses. Duplicate sends on redelivery are an
/// accepted tradeoff.
pub struct StockAlertProcessor {
    queue: Arc<dyn AlertQueue>,
    mailer: Arc<dyn Mailer>,
    config: StockAlertProcessorConfig,
}

impl StockAlertProcessor {
    pub fn new(queue: Arc<dyn AlertQueue>, mailer: Arc<dyn Mailer>) -> Self {
        Self::with_config(queue, mailer, StockAlertProcessorConfig::default())
    }

    pub fn with_config(
        queue: Arc<dyn AlertQueue>,
        mailer: Arc<dyn Mailer>,
        config: StockAlertProcessorConfig,
    ) -> Self {
        Self {
            queue,
            mailer,
            config,
        }
    }

    /// Runs until the shutdown signal flips to `true`. The signal is
    /// observed between cycles and during the inter-cycle delay; in-flight
    /// leases are simply left to expire.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Stock alert processor started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(_) => self.config.poll_interval,
                Err(e) => {
                    error!(error = %e, "Error while polling alert queue");
                    self.config.backoff
                }
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Stock alert processor stopped");
    }

    /// One polling cycle; returns how many messages were fully processed.
    pub async fn poll_once(&self) -> Result<usize, ServiceError> {
        let batch = self
            .queue
            .receive_batch(self.config.batch_size, self.config.visibility_timeout)
            .await
            .map_err(|e| ServiceError::QueueError(e.to_string()))?;

        let mut processed = 0;
        for message in batch {
            match self.process_message(&message).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => {
                    // Leave the message leased; it comes back after the
                    // visibility timeout.
                    error!(error = %e, payload = %message.payload, "Failed to process alert message");
                }
            }
        }
        Ok(processed)
    }

    async fn process_message(&self, message: &QueuedMessage) -> Result<bool, ServiceError> {
        let json = decode_payload(&message.payload);

        let alert: LowStockAlertMessage = match serde_json::from_str(&json) {
            Ok(alert) => alert,
            Err(e) => {
                warn!(error = %e, payload = %message.payload, "Alert message is not a valid alert, skipping");
                return Ok(false);
            }
        };

        self.mailer.send_low_stock_alert(&alert).await?;

        self.queue
            .delete(&message.lease)
            .await
            .map_err(|e| ServiceError::QueueError(e.to_string()))?;

        info!(product_name = %alert.product_name, "Alert processed and message deleted");
        Ok(true)
    }
}
