pub mod products;
pub mod sales;

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;

use crate::cache::CacheBackend;
use crate::message_queue::AlertQueue;
use crate::repositories::{ProductRepository, SaleRepository};
use crate::services::{
    ProductService, SaleService, StockAlertPublisher, StockService,
};

/// Business services used by the HTTP handlers, wired explicitly — no
/// container, just constructors.
#[derive(Clone)]
pub struct AppServices {
    pub products: Arc<ProductService>,
    pub sales: Arc<SaleService>,
    pub stock: Arc<StockService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        cache: Arc<dyn CacheBackend>,
        queue: Arc<dyn AlertQueue>,
        cache_ttl: Duration,
    ) -> Self {
        let product_store = Arc::new(ProductRepository::new(db.clone()));
        let sale_store = Arc::new(SaleRepository::new(db));

        let publisher = Arc::new(StockAlertPublisher::new(queue));
        let stock = Arc::new(StockService::new(
            product_store.clone(),
            cache.clone(),
            publisher,
        ));
        let products = Arc::new(ProductService::new(
            product_store.clone(),
            cache,
            cache_ttl,
        ));
        let sales = Arc::new(SaleService::new(sale_store, product_store, stock.clone()));

        Self {
            products,
            sales,
            stock,
        }
    }
}
