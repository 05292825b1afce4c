//! At-least-once behavior of the alert pipeline: a message survives failed
//! sends and failed deletes and is reprocessed after its visibility timeout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use salestracker_api::message_queue::{
    AlertQueue, InMemoryAlertQueue, LeaseHandle, QueueError, QueuedMessage,
};
use salestracker_api::services::alerts::{
    LowStockAlertMessage, StockAlertProcessor, StockAlertProcessorConfig, StockAlertPublisher,
};
use salestracker_api::services::mailer::RecordingMailer;

/// Queue wrapper whose `delete` fails a configured number of times, the way
/// a flaky network to the queue service would.
struct FlakyDeleteQueue {
    inner: InMemoryAlertQueue,
    delete_failures: AtomicUsize,
}

impl FlakyDeleteQueue {
    fn new(delete_failures: usize) -> Self {
        Self {
            inner: InMemoryAlertQueue::new(),
            delete_failures: AtomicUsize::new(delete_failures),
        }
    }
}

#[async_trait]
impl AlertQueue for FlakyDeleteQueue {
    async fn send(&self, payload: String) -> Result<(), QueueError> {
        self.inner.send(payload).await
    }

    async fn receive_batch(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        self.inner.receive_batch(max, visibility).await
    }

    async fn delete(&self, lease: &LeaseHandle) -> Result<(), QueueError> {
        if self
            .delete_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(QueueError::OperationFailed(
                "simulated delete failure".to_string(),
            ));
        }
        self.inner.delete(lease).await
    }
}

fn alert() -> LowStockAlertMessage {
    LowStockAlertMessage {
        product_id: 11,
        product_name: "Charger".to_string(),
        current_stock: 2,
        timestamp: Utc::now(),
    }
}

fn short_visibility() -> StockAlertProcessorConfig {
    StockAlertProcessorConfig {
        visibility_timeout: Duration::from_millis(30),
        ..Default::default()
    }
}

#[tokio::test]
async fn failed_delete_leads_to_redelivery_and_duplicate_send() {
    let queue = Arc::new(FlakyDeleteQueue::new(1));
    let mailer = Arc::new(RecordingMailer::new());

    StockAlertPublisher::new(queue.clone())
        .publish(&alert())
        .await
        .unwrap();

    let processor =
        StockAlertProcessor::with_config(queue.clone(), mailer.clone(), short_visibility());

    // First cycle: the notification goes out but the delete fails, so the
    // message stays leased.
    assert_eq!(processor.poll_once().await.unwrap(), 0);
    assert_eq!(mailer.alert_count(), 1);

    // After the visibility timeout the message is redelivered and this time
    // deleted. The duplicate send is the accepted tradeoff.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(processor.poll_once().await.unwrap(), 1);
    assert_eq!(mailer.alert_count(), 2);

    // Nothing left afterwards
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(processor.poll_once().await.unwrap(), 0);
    assert_eq!(mailer.alert_count(), 2);
}

#[tokio::test]
async fn mixed_encodings_and_garbage_in_one_batch() {
    let queue = Arc::new(InMemoryAlertQueue::new());
    let mailer = Arc::new(RecordingMailer::new());

    // base64-encoded (current producer)
    StockAlertPublisher::new(queue.clone())
        .publish(&alert())
        .await
        .unwrap();
    // plain JSON (legacy producer)
    queue
        .send(serde_json::to_string(&alert()).unwrap())
        .await
        .unwrap();
    // garbage, skipped without delivery
    queue.send("%%% not a message %%%".to_string()).await.unwrap();

    let processor = StockAlertProcessor::new(queue.clone(), mailer.clone());
    assert_eq!(processor.poll_once().await.unwrap(), 2);
    assert_eq!(mailer.alert_count(), 2);
}
