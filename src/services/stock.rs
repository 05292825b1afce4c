//! Stock ledger: the sole owner of stock arithmetic.
//!
//! Every decrement goes through a conditional update in the store, so stock
//! can never go negative even under concurrent reservations. Stock-affecting
//! operations invalidate the cached product listing before returning, and
//! reserve/set-stock evaluate the low-stock threshold afterwards.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::cache::{CacheBackend, PRODUCT_LISTING_CACHE_KEY};
use crate::errors::ServiceError;
use crate::repositories::{ProductStore, StockDecrement};
use crate::services::alerts::{LowStockAlertMessage, StockAlertPublisher};

/// Stock level at or below which a restock alert goes out.
pub const LOW_STOCK_THRESHOLD: i32 = 5;

pub struct StockService {
    products: Arc<dyn ProductStore>,
    cache: Arc<dyn CacheBackend>,
    alerts: Arc<StockAlertPublisher>,
}

impl StockService {
    pub fn new(
        products: Arc<dyn ProductStore>,
        cache: Arc<dyn CacheBackend>,
        alerts: Arc<StockAlertPublisher>,
    ) -> Self {
        Self {
            products,
            cache,
            alerts,
        }
    }

    /// Atomically takes `quantity` units off the product's stock.
    ///
    /// Returns the new stock level. Fails with `InsufficientStock` when the
    /// product cannot cover the quantity and `NotFound` for missing or
    /// inactive products; stock is untouched in both cases.
    #[instrument(skip(self))]
    pub async fn reserve(&self, product_id: i32, quantity: i32) -> Result<i32, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        match self.products.try_decrement_stock(product_id, quantity).await? {
            StockDecrement::Applied { remaining } => {
                info!(product_id, quantity, remaining, "Stock reserved");
                self.invalidate_listing().await;
                self.evaluate_low_stock(product_id, remaining).await;
                Ok(remaining)
            }
            StockDecrement::Insufficient => Err(ServiceError::InsufficientStock(format!(
                "Product {product_id} cannot cover a reservation of {quantity}"
            ))),
            StockDecrement::NotFound => Err(ServiceError::NotFound(format!(
                "Product {product_id} not found"
            ))),
        }
    }

    /// Puts `quantity` units back (cancelled or returned sale). Restores are
    /// trusted unconditionally and apply to inactive products too.
    #[instrument(skip(self))]
    pub async fn restore(&self, product_id: i32, quantity: i32) -> Result<i32, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Restore quantity must be positive".to_string(),
            ));
        }

        let Some(level) = self.products.increment_stock(product_id, quantity).await? else {
            return Err(ServiceError::NotFound(format!(
                "Product {product_id} not found"
            )));
        };

        info!(product_id, quantity, level, "Stock restored");
        self.invalidate_listing().await;
        Ok(level)
    }

    /// Administrative overwrite used by the manual stock-update endpoint.
    #[instrument(skip(self))]
    pub async fn set_stock(&self, product_id: i32, new_stock: i32) -> Result<i32, ServiceError> {
        if new_stock < 0 {
            return Err(ServiceError::ValidationError(
                "Stock level cannot be negative".to_string(),
            ));
        }

        let Some(level) = self.products.set_stock(product_id, new_stock).await? else {
            return Err(ServiceError::NotFound(format!(
                "Product {product_id} not found"
            )));
        };

        info!(product_id, level, "Stock level set");
        self.invalidate_listing().await;
        self.evaluate_low_stock(product_id, level).await;
        Ok(level)
    }

    /// Cache invalidation is fire-and-forget: a failure leaves a bounded
    /// staleness window until the entry's own TTL.
    async fn invalidate_listing(&self) {
        if let Err(e) = self.cache.delete(PRODUCT_LISTING_CACHE_KEY).await {
            warn!(error = %e, "Failed to invalidate product listing cache");
        }
    }

    /// Publishes an alert whenever a mutation leaves the level at or below
    /// the threshold. Alerts fire on every qualifying mutation, not just the
    /// first crossing. Enqueue failures never undo the stock change.
    async fn evaluate_low_stock(&self, product_id: i32, level: i32) {
        if level > LOW_STOCK_THRESHOLD {
            return;
        }

        let product_name = match self.products.find_by_id(product_id).await {
            Ok(Some(product)) => product.name,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, product_id, "Could not load product for low stock alert");
                return;
            }
        };

        let alert = LowStockAlertMessage {
            product_id,
            product_name,
            current_stock: level,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.alerts.publish(&alert).await {
            warn!(error = %e, product_id, "Failed to enqueue low stock alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::message_queue::{AlertQueue, InMemoryAlertQueue};
    use crate::repositories::{InMemoryProductStore, NewProduct};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        products: Arc<InMemoryProductStore>,
        cache: Arc<InMemoryCache>,
        queue: Arc<InMemoryAlertQueue>,
        stock: StockService,
    }

    async fn fixture_with_product(stock: i32) -> (Fixture, i32) {
        let products = Arc::new(InMemoryProductStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let queue = Arc::new(InMemoryAlertQueue::new());

        let product = products
            .insert(NewProduct {
                name: "Monitor".to_string(),
                category: "Displays".to_string(),
                price: dec!(199.99),
                stock,
            })
            .await
            .unwrap();

        let service = StockService::new(
            products.clone(),
            cache.clone(),
            Arc::new(StockAlertPublisher::new(queue.clone())),
        );

        (
            Fixture {
                products,
                cache,
                queue,
                stock: service,
            },
            product.id,
        )
    }

    #[tokio::test]
    async fn reserve_decrements_and_returns_new_level() {
        let (fx, id) = fixture_with_product(10).await;
        assert_eq!(fx.stock.reserve(id, 2).await.unwrap(), 8);
        assert_eq!(fx.products.find_by_id(id).await.unwrap().unwrap().stock, 8);
    }

    #[tokio::test]
    async fn reserve_beyond_stock_fails_and_leaves_stock_unchanged() {
        let (fx, id) = fixture_with_product(3).await;
        let err = fx.stock.reserve(id, 4).await.unwrap_err();
        assert_matches!(err, ServiceError::InsufficientStock(_));
        assert_eq!(fx.products.find_by_id(id).await.unwrap().unwrap().stock, 3);
    }

    #[tokio::test]
    async fn reserve_unknown_product_is_not_found() {
        let (fx, _) = fixture_with_product(3).await;
        let err = fx.stock.reserve(999, 1).await.unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));
    }

    #[tokio::test]
    async fn threshold_alerts_fire_on_every_qualifying_mutation() {
        let (fx, id) = fixture_with_product(7).await;

        // 7 -> 5: at the threshold, first alert
        fx.stock.reserve(id, 2).await.unwrap();
        // 5 -> 4 and 4 -> 3: still at or below, one alert each
        fx.stock.reserve(id, 1).await.unwrap();
        fx.stock.reserve(id, 1).await.unwrap();

        let batch = fx
            .queue
            .receive_batch(10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn no_alert_above_threshold() {
        let (fx, id) = fixture_with_product(20).await;
        fx.stock.reserve(id, 2).await.unwrap();
        assert_eq!(fx.queue.ready_len(), 0);
    }

    #[tokio::test]
    async fn set_stock_to_threshold_alerts_once() {
        let (fx, id) = fixture_with_product(20).await;
        fx.stock.set_stock(id, 5).await.unwrap();
        assert_eq!(fx.queue.ready_len(), 1);
    }

    #[tokio::test]
    async fn restore_does_not_alert() {
        let (fx, id) = fixture_with_product(2).await;
        fx.stock.restore(id, 1).await.unwrap();
        assert_eq!(fx.queue.ready_len(), 0);
        assert_eq!(fx.products.find_by_id(id).await.unwrap().unwrap().stock, 3);
    }

    #[tokio::test]
    async fn set_stock_rejects_negative_targets() {
        let (fx, id) = fixture_with_product(2).await;
        let err = fx.stock.set_stock(id, -1).await.unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn stock_mutations_invalidate_the_listing_cache() {
        let (fx, id) = fixture_with_product(10).await;
        fx.cache
            .set(PRODUCT_LISTING_CACHE_KEY, "[]", None)
            .await
            .unwrap();

        fx.stock.reserve(id, 1).await.unwrap();

        assert_eq!(fx.cache.get(PRODUCT_LISTING_CACHE_KEY).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_reservations_never_oversell() {
        let (fx, id) = fixture_with_product(10).await;
        let stock = Arc::new(fx.stock);

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let stock = stock.clone();
            tasks.push(tokio::spawn(async move {
                stock.reserve(id, 1).await.is_ok()
            }));
        }

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 10, "exactly 10 reservations should succeed");
        assert_eq!(fx.products.find_by_id(id).await.unwrap().unwrap().stock, 0);
    }
}
