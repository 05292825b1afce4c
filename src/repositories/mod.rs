use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::entities::{product, sale, sale_item, SaleStatus};
use crate::errors::ServiceError;

pub mod memory;
pub mod product_repository;
pub mod sale_repository;

pub use memory::{InMemoryProductStore, InMemorySaleStore};
pub use product_repository::ProductRepository;
pub use sale_repository::SaleRepository;

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub category: String,
    pub price: Decimal,
    pub stock: i32,
}

#[derive(Debug, Clone)]
pub struct ProductChanges {
    pub name: String,
    pub category: String,
    pub price: Decimal,
    pub stock: i32,
}

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    Applied { remaining: i32 },
    Insufficient,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct NewSaleItem {
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount_percentage: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewSale {
    pub user_id: i32,
    pub date: DateTime<Utc>,
    pub total_amount: Decimal,
    pub status: SaleStatus,
    pub items: Vec<NewSaleItem>,
}

/// A sale together with its line items, fully resolved by the store.
#[derive(Debug, Clone)]
pub struct SaleWithItems {
    pub sale: sale::Model,
    pub items: Vec<sale_item::Model>,
}

/// End-of-day aggregate over completed sales. The top product is returned
/// by id; callers resolve the display name through the product store.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySalesSummary {
    pub total_sales: Decimal,
    pub quantity_sold: i64,
    pub top_product_id: Option<i32>,
    pub top_product_quantity: i64,
}

/// Product persistence contract.
///
/// `find_by_id` returns the row regardless of `is_active`; callers that only
/// want sellable products check the flag themselves. The stock primitives
/// are the only place stock arithmetic touches storage, and
/// `try_decrement_stock` closes the read-then-write race with a conditional
/// update.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert(&self, new: NewProduct) -> Result<product::Model, ServiceError>;
    async fn find_by_id(&self, id: i32) -> Result<Option<product::Model>, ServiceError>;
    async fn find_all_active(&self) -> Result<Vec<product::Model>, ServiceError>;
    async fn update(
        &self,
        id: i32,
        changes: ProductChanges,
    ) -> Result<Option<product::Model>, ServiceError>;
    async fn soft_delete(&self, id: i32) -> Result<bool, ServiceError>;
    async fn find_low_stock(&self, threshold: i32) -> Result<Vec<product::Model>, ServiceError>;
    async fn search(&self, keyword: &str) -> Result<Vec<product::Model>, ServiceError>;
    async fn categories(&self) -> Result<Vec<String>, ServiceError>;

    async fn try_decrement_stock(
        &self,
        id: i32,
        quantity: i32,
    ) -> Result<StockDecrement, ServiceError>;
    async fn increment_stock(&self, id: i32, quantity: i32)
        -> Result<Option<i32>, ServiceError>;
    async fn set_stock(&self, id: i32, stock: i32) -> Result<Option<i32>, ServiceError>;
}

/// Sale persistence contract.
///
/// `insert` persists the sale and its items in one transaction; `transition`
/// flips the status only when the current status still matches `from`.
#[async_trait]
pub trait SaleStore: Send + Sync {
    async fn insert(&self, new: NewSale) -> Result<SaleWithItems, ServiceError>;
    async fn find_by_id(&self, id: i32) -> Result<Option<SaleWithItems>, ServiceError>;
    async fn find_all(&self) -> Result<Vec<SaleWithItems>, ServiceError>;
    async fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SaleWithItems>, ServiceError>;
    async fn find_by_product(&self, product_id: i32) -> Result<Vec<SaleWithItems>, ServiceError>;
    async fn find_by_user(&self, user_id: i32) -> Result<Vec<SaleWithItems>, ServiceError>;
    async fn transition(
        &self,
        id: i32,
        from: SaleStatus,
        to: SaleStatus,
    ) -> Result<bool, ServiceError>;
    async fn completed_items_for_product(
        &self,
        product_id: i32,
    ) -> Result<Vec<sale_item::Model>, ServiceError>;
    async fn daily_summary(&self, day: NaiveDate)
        -> Result<Option<DailySalesSummary>, ServiceError>;
}
