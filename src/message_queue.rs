/*!
 * Durable queue abstraction for low-stock alerts.
 *
 * Messages are leased, not consumed, on receive: a received message stays
 * invisible to other consumers until it is deleted or its visibility
 * timeout lapses, at which point it becomes deliverable again
 * (at-least-once delivery).
 */

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Queue operation failed: {0}")]
    OperationFailed(String),
}

/// Opaque receipt identifying a leased message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHandle(pub String);

/// A message pulled from the queue, still owned by the queue until deleted.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub payload: String,
    pub lease: LeaseHandle,
}

/// Queue contract for different backends
#[async_trait]
pub trait AlertQueue: Send + Sync {
    async fn send(&self, payload: String) -> Result<(), QueueError>;
    async fn receive_batch(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage>, QueueError>;
    async fn delete(&self, lease: &LeaseHandle) -> Result<(), QueueError>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    ready: VecDeque<String>,
    leased: HashMap<String, (String, Instant)>,
}

/// In-memory queue implementation with lease bookkeeping; used by tests and
/// as the fallback backend when Redis is not configured.
#[derive(Debug, Clone)]
pub struct InMemoryAlertQueue {
    state: Arc<Mutex<InMemoryState>>,
    max_size: usize,
}

impl Default for InMemoryAlertQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAlertQueue {
    pub fn new() -> Self {
        Self::with_max_size(1000)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState::default())),
            max_size,
        }
    }

    /// Number of messages currently deliverable (not leased).
    pub fn ready_len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    fn reclaim_expired(state: &mut InMemoryState) {
        let now = Instant::now();
        let expired: Vec<String> = state
            .leased
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(lease, _)| lease.clone())
            .collect();
        for lease in expired {
            if let Some((payload, _)) = state.leased.remove(&lease) {
                state.ready.push_back(payload);
            }
        }
    }
}

#[async_trait]
impl AlertQueue for InMemoryAlertQueue {
    async fn send(&self, payload: String) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if state.ready.len() + state.leased.len() >= self.max_size {
            return Err(QueueError::QueueFull);
        }
        state.ready.push_back(payload);
        Ok(())
    }

    async fn receive_batch(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let mut state = self.state.lock().unwrap();
        Self::reclaim_expired(&mut state);

        let deadline = Instant::now() + visibility;
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(payload) = state.ready.pop_front() else {
                break;
            };
            let lease = Uuid::new_v4().to_string();
            state.leased.insert(lease.clone(), (payload.clone(), deadline));
            batch.push(QueuedMessage {
                payload,
                lease: LeaseHandle(lease),
            });
        }
        Ok(batch)
    }

    async fn delete(&self, lease: &LeaseHandle) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        state.leased.remove(&lease.0);
        Ok(())
    }
}

/// Redis-backed queue: a pending list plus a lease hash and a deadline
/// sorted set. Expired leases are requeued at the start of each receive.
pub struct RedisAlertQueue {
    client: Arc<redis::Client>,
    namespace: String,
}

impl RedisAlertQueue {
    pub fn new(client: Arc<redis::Client>, namespace: String) -> Self {
        Self { client, namespace }
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.namespace)
    }

    fn leased_key(&self) -> String {
        format!("{}:leased", self.namespace)
    }

    fn deadlines_key(&self) -> String {
        format!("{}:deadlines", self.namespace)
    }

    async fn reclaim_expired(&self, conn: &mut redis::aio::Connection) -> Result<(), QueueError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.deadlines_key())
            .arg("-inf")
            .arg(now_ms)
            .query_async(conn)
            .await?;

        for lease in expired {
            let payload: Option<String> = redis::cmd("HGET")
                .arg(self.leased_key())
                .arg(&lease)
                .query_async(conn)
                .await?;
            if let Some(payload) = payload {
                redis::cmd("RPUSH")
                    .arg(self.pending_key())
                    .arg(payload)
                    .query_async::<_, ()>(conn)
                    .await?;
            }
            redis::cmd("ZREM")
                .arg(self.deadlines_key())
                .arg(&lease)
                .query_async::<_, ()>(conn)
                .await?;
            redis::cmd("HDEL")
                .arg(self.leased_key())
                .arg(&lease)
                .query_async::<_, ()>(conn)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AlertQueue for RedisAlertQueue {
    async fn send(&self, payload: String) -> Result<(), QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        redis::cmd("RPUSH")
            .arg(self.pending_key())
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn receive_batch(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        self.reclaim_expired(&mut conn).await?;

        let deadline_ms = chrono::Utc::now().timestamp_millis() + visibility.as_millis() as i64;
        let mut batch = Vec::new();
        for _ in 0..max {
            let payload: Option<String> = redis::cmd("LPOP")
                .arg(self.pending_key())
                .query_async(&mut conn)
                .await?;
            let Some(payload) = payload else {
                break;
            };
            let lease = Uuid::new_v4().to_string();
            redis::cmd("ZADD")
                .arg(self.deadlines_key())
                .arg(deadline_ms)
                .arg(&lease)
                .query_async::<_, ()>(&mut conn)
                .await?;
            redis::cmd("HSET")
                .arg(self.leased_key())
                .arg(&lease)
                .arg(&payload)
                .query_async::<_, ()>(&mut conn)
                .await?;
            batch.push(QueuedMessage {
                payload,
                lease: LeaseHandle(lease),
            });
        }
        Ok(batch)
    }

    async fn delete(&self, lease: &LeaseHandle) -> Result<(), QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        redis::cmd("ZREM")
            .arg(self.deadlines_key())
            .arg(&lease.0)
            .query_async::<_, ()>(&mut conn)
            .await?;
        redis::cmd("HDEL")
            .arg(self.leased_key())
            .arg(&lease.0)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Builds the configured queue backend; anything but a working "redis"
/// setup yields the in-memory queue, with the failure logged.
pub fn create_queue(backend: &str, redis_url: &str, namespace: String) -> Arc<dyn AlertQueue> {
    match backend.to_ascii_lowercase().as_str() {
        "redis" => match redis::Client::open(redis_url) {
            Ok(client) => Arc::new(RedisAlertQueue::new(Arc::new(client), namespace)),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to initialize Redis alert queue, falling back to in-memory"
                );
                Arc::new(InMemoryAlertQueue::new())
            }
        },
        _ => Arc::new(InMemoryAlertQueue::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn leased_messages_are_invisible_until_deadline() {
        let queue = InMemoryAlertQueue::new();
        queue.send("alert-1".to_string()).await.unwrap();

        let batch = queue
            .receive_batch(5, Duration::from_millis(40))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, "alert-1");

        // Still leased: a second receive sees nothing
        let empty = queue
            .receive_batch(5, Duration::from_millis(40))
            .await
            .unwrap();
        assert!(empty.is_empty());

        // After the visibility timeout the message is redelivered
        tokio::time::sleep(Duration::from_millis(60)).await;
        let redelivered = queue
            .receive_batch(5, Duration::from_millis(40))
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].payload, "alert-1");
    }

    #[tokio::test]
    async fn deleted_messages_are_gone_for_good() {
        let queue = InMemoryAlertQueue::new();
        queue.send("alert-1".to_string()).await.unwrap();

        let batch = queue
            .receive_batch(5, Duration::from_millis(10))
            .await
            .unwrap();
        queue.delete(&batch[0].lease).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let after = queue
            .receive_batch(5, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn batch_size_is_respected() {
        let queue = InMemoryAlertQueue::new();
        for i in 0..7 {
            queue.send(format!("alert-{i}")).await.unwrap();
        }

        let batch = queue
            .receive_batch(5, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(queue.ready_len(), 2);
    }

    #[tokio::test]
    async fn full_queue_rejects_sends() {
        let queue = InMemoryAlertQueue::with_max_size(1);
        queue.send("a".to_string()).await.unwrap();
        let err = queue.send("b".to_string()).await.unwrap_err();
        assert!(matches!(err, QueueError::QueueFull));
    }
}
