//! Sale engine: creation, lifecycle transitions, and read projections.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::entities::{sale_item, SaleStatus};
use crate::errors::ServiceError;
use crate::repositories::{NewSale, NewSaleItem, ProductStore, SaleStore, SaleWithItems};
use crate::services::stock::StockService;

const MAX_DISCOUNT_PERCENTAGE: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSaleItem {
    pub product_id: i32,
    pub quantity: i32,
    #[serde(default)]
    pub discount_percentage: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSaleRequest {
    pub user_id: i32,
    /// Business date; defaults to now
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[validate(length(min = 1, message = "A sale requires at least one item"))]
    pub items: Vec<CreateSaleItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleItemResponse {
    pub id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount_percentage: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleResponse {
    pub id: i32,
    pub date: DateTime<Utc>,
    pub total_amount: Decimal,
    pub user_id: i32,
    pub status: SaleStatus,
    pub items: Vec<SaleItemResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSalesReport {
    pub product_id: i32,
    pub product_name: String,
    pub total_quantity_sold: i64,
}

pub struct SaleService {
    sales: Arc<dyn SaleStore>,
    products: Arc<dyn ProductStore>,
    stock: Arc<StockService>,
}

impl SaleService {
    pub fn new(
        sales: Arc<dyn SaleStore>,
        products: Arc<dyn ProductStore>,
        stock: Arc<StockService>,
    ) -> Self {
        Self {
            sales,
            products,
            stock,
        }
    }

    /// Creates a sale with status `Pending`.
    ///
    /// Each line reserves stock atomically; the unit price is snapshotted
    /// from the product at reservation time. If any line fails, every
    /// reservation already taken for this request is rolled back and no sale
    /// is persisted.
    #[instrument(skip(self, request), fields(user_id = request.user_id))]
    pub async fn create_sale(
        &self,
        request: CreateSaleRequest,
    ) -> Result<SaleResponse, ServiceError> {
        request.validate()?;

        for item in &request.items {
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for product {} must be positive",
                    item.product_id
                )));
            }
            if let Some(discount) = item.discount_percentage {
                if discount < Decimal::ZERO || discount > MAX_DISCOUNT_PERCENTAGE {
                    return Err(ServiceError::ValidationError(format!(
                        "Discount for product {} must be between 0 and 100",
                        item.product_id
                    )));
                }
            }
        }

        let date = request.date.unwrap_or_else(Utc::now);
        let mut reserved: Vec<(i32, i32)> = Vec::new();
        let mut items: Vec<NewSaleItem> = Vec::new();
        let mut total = Decimal::ZERO;

        for item in &request.items {
            match self.reserve_line(item).await {
                Ok(new_item) => {
                    total += new_item.unit_price * Decimal::from(new_item.quantity);
                    reserved.push((new_item.product_id, new_item.quantity));
                    items.push(new_item);
                }
                Err(e) => {
                    self.rollback_reservations(&reserved).await;
                    return Err(e);
                }
            }
        }

        let new_sale = NewSale {
            user_id: request.user_id,
            date,
            total_amount: total,
            status: SaleStatus::Pending,
            items,
        };

        match self.sales.insert(new_sale).await {
            Ok(stored) => {
                info!(sale_id = stored.sale.id, total = %stored.sale.total_amount, "Sale created");
                Ok(Self::to_response(stored))
            }
            Err(e) => {
                error!(error = %e, "Failed to persist sale, rolling back reservations");
                self.rollback_reservations(&reserved).await;
                Err(e)
            }
        }
    }

    async fn reserve_line(&self, item: &CreateSaleItem) -> Result<NewSaleItem, ServiceError> {
        let product = self.products.find_by_id(item.product_id).await?;

        let Some(product) = product.filter(|p| p.is_active && p.stock >= item.quantity) else {
            warn!(
                product_id = item.product_id,
                requested = item.quantity,
                "Invalid product or insufficient stock"
            );
            return Err(ServiceError::OutOfStockOrInvalidProduct(format!(
                "Product {} is invalid or out of stock",
                item.product_id
            )));
        };

        // The conditional decrement may still lose a race the pre-check won
        match self.stock.reserve(item.product_id, item.quantity).await {
            Ok(_) => {}
            Err(ServiceError::InsufficientStock(_)) | Err(ServiceError::NotFound(_)) => {
                return Err(ServiceError::OutOfStockOrInvalidProduct(format!(
                    "Product {} is invalid or out of stock",
                    item.product_id
                )));
            }
            Err(e) => return Err(e),
        }

        Ok(NewSaleItem {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: product.price,
            discount_percentage: item.discount_percentage.unwrap_or(Decimal::ZERO),
        })
    }

    async fn rollback_reservations(&self, reserved: &[(i32, i32)]) {
        for (product_id, quantity) in reserved {
            if let Err(e) = self.stock.restore(*product_id, *quantity).await {
                error!(error = %e, product_id, "Failed to roll back stock reservation");
            }
        }
    }

    /// Pending -> Completed. `false` for unknown sales or any other status.
    #[instrument(skip(self))]
    pub async fn mark_completed(&self, sale_id: i32) -> Result<bool, ServiceError> {
        Ok(self
            .try_transition(sale_id, SaleStatus::Completed)
            .await?
            .is_some())
    }

    /// Pending -> Cancelled, restoring stock for every item. Completed sales
    /// cannot be cancelled (only returned), and terminal sales accept
    /// nothing.
    #[instrument(skip(self))]
    pub async fn cancel(&self, sale_id: i32) -> Result<bool, ServiceError> {
        match self.try_transition(sale_id, SaleStatus::Cancelled).await? {
            Some(sale) => {
                self.restore_items(&sale.items).await;
                info!(sale_id, "Sale cancelled and stock restored");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Completed -> Returned, restoring stock for every item.
    #[instrument(skip(self))]
    pub async fn record_return(&self, sale_id: i32) -> Result<bool, ServiceError> {
        match self.try_transition(sale_id, SaleStatus::Returned).await? {
            Some(sale) => {
                self.restore_items(&sale.items).await;
                info!(sale_id, "Return recorded and stock restored");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Loads the sale, checks the state machine, and flips the status with a
    /// compare-and-set against the observed status. Returns the sale (as
    /// loaded) on success so callers can apply side effects exactly once.
    async fn try_transition(
        &self,
        sale_id: i32,
        to: SaleStatus,
    ) -> Result<Option<SaleWithItems>, ServiceError> {
        let Some(sale) = self.sales.find_by_id(sale_id).await? else {
            return Ok(None);
        };

        if !sale.sale.status.can_transition(to) {
            return Ok(None);
        }

        if !self.sales.transition(sale_id, sale.sale.status, to).await? {
            return Ok(None);
        }

        Ok(Some(sale))
    }

    async fn restore_items(&self, items: &[sale_item::Model]) {
        for item in items {
            if let Err(e) = self.stock.restore(item.product_id, item.quantity).await {
                error!(
                    error = %e,
                    product_id = item.product_id,
                    quantity = item.quantity,
                    "Failed to restore stock for sale item"
                );
            }
        }
    }

    pub async fn get_by_id(&self, sale_id: i32) -> Result<Option<SaleResponse>, ServiceError> {
        Ok(self
            .sales
            .find_by_id(sale_id)
            .await?
            .map(Self::to_response))
    }

    pub async fn get_all(&self) -> Result<Vec<SaleResponse>, ServiceError> {
        Ok(self
            .sales
            .find_all()
            .await?
            .into_iter()
            .map(Self::to_response)
            .collect())
    }

    pub async fn get_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SaleResponse>, ServiceError> {
        Ok(self
            .sales
            .find_by_date_range(from, to)
            .await?
            .into_iter()
            .map(Self::to_response)
            .collect())
    }

    pub async fn get_by_product(
        &self,
        product_id: i32,
    ) -> Result<Vec<SaleResponse>, ServiceError> {
        Ok(self
            .sales
            .find_by_product(product_id)
            .await?
            .into_iter()
            .map(Self::to_response)
            .collect())
    }

    pub async fn get_by_user(&self, user_id: i32) -> Result<Vec<SaleResponse>, ServiceError> {
        Ok(self
            .sales
            .find_by_user(user_id)
            .await?
            .into_iter()
            .map(Self::to_response)
            .collect())
    }

    /// Sums quantities across sale items of **Completed** sales only;
    /// cancelled and returned sales never count.
    #[instrument(skip(self))]
    pub async fn product_sales_report(
        &self,
        product_id: i32,
    ) -> Result<ProductSalesReport, ServiceError> {
        let items = self.sales.completed_items_for_product(product_id).await?;
        let total_quantity_sold: i64 = items.iter().map(|i| i.quantity as i64).sum();

        let product_name = self
            .products
            .find_by_id(product_id)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| "Unknown".to_string());

        Ok(ProductSalesReport {
            product_id,
            product_name,
            total_quantity_sold,
        })
    }

    fn to_response(sale: SaleWithItems) -> SaleResponse {
        SaleResponse {
            id: sale.sale.id,
            date: sale.sale.date,
            total_amount: sale.sale.total_amount,
            user_id: sale.sale.user_id,
            status: sale.sale.status,
            items: sale
                .items
                .into_iter()
                .map(|item| SaleItemResponse {
                    id: item.id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    discount_percentage: item.discount_percentage,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::message_queue::InMemoryAlertQueue;
    use crate::repositories::{InMemoryProductStore, InMemorySaleStore, NewProduct};
    use crate::services::alerts::StockAlertPublisher;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    struct Fixture {
        products: Arc<InMemoryProductStore>,
        sales: SaleService,
    }

    fn fixture() -> Fixture {
        let products = Arc::new(InMemoryProductStore::new());
        let sale_store = Arc::new(InMemorySaleStore::new());
        let stock = Arc::new(StockService::new(
            products.clone(),
            Arc::new(InMemoryCache::new()),
            Arc::new(StockAlertPublisher::new(Arc::new(
                InMemoryAlertQueue::new(),
            ))),
        ));
        let sales = SaleService::new(sale_store, products.clone(), stock);
        Fixture { products, sales }
    }

    async fn seed_product(fx: &Fixture, price: Decimal, stock: i32) -> i32 {
        fx.products
            .insert(NewProduct {
                name: "Laptop".to_string(),
                category: "Computers".to_string(),
                price,
                stock,
            })
            .await
            .unwrap()
            .id
    }

    fn one_line_request(product_id: i32, quantity: i32) -> CreateSaleRequest {
        CreateSaleRequest {
            user_id: 1,
            date: None,
            items: vec![CreateSaleItem {
                product_id,
                quantity,
                discount_percentage: None,
            }],
        }
    }

    #[tokio::test]
    async fn create_sale_computes_total_and_reserves_stock() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(50.00), 10).await;

        let sale = fx
            .sales
            .create_sale(one_line_request(product_id, 2))
            .await
            .unwrap();

        assert_eq!(sale.total_amount, dec!(100.00));
        assert_eq!(sale.status, SaleStatus::Pending);
        assert_eq!(sale.items.len(), 1);
        assert_eq!(sale.items[0].unit_price, dec!(50.00));
        assert_eq!(
            fx.products
                .find_by_id(product_id)
                .await
                .unwrap()
                .unwrap()
                .stock,
            8
        );
    }

    #[tokio::test]
    async fn create_sale_with_empty_items_is_rejected() {
        let fx = fixture();
        let err = fx
            .sales
            .create_sale(CreateSaleRequest {
                user_id: 1,
                date: None,
                items: vec![],
            })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn create_sale_rejects_non_positive_quantity_before_any_mutation() {
        let fx = fixture();
        let good = seed_product(&fx, dec!(10.00), 10).await;

        let err = fx
            .sales
            .create_sale(CreateSaleRequest {
                user_id: 1,
                date: None,
                items: vec![
                    CreateSaleItem {
                        product_id: good,
                        quantity: 2,
                        discount_percentage: None,
                    },
                    CreateSaleItem {
                        product_id: good,
                        quantity: 0,
                        discount_percentage: None,
                    },
                ],
            })
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::ValidationError(_));
        assert_eq!(fx.products.find_by_id(good).await.unwrap().unwrap().stock, 10);
    }

    #[tokio::test]
    async fn failed_line_rolls_back_earlier_reservations() {
        let fx = fixture();
        let plentiful = seed_product(&fx, dec!(10.00), 10).await;
        let scarce = seed_product(&fx, dec!(20.00), 1).await;

        let err = fx
            .sales
            .create_sale(CreateSaleRequest {
                user_id: 1,
                date: None,
                items: vec![
                    CreateSaleItem {
                        product_id: plentiful,
                        quantity: 3,
                        discount_percentage: None,
                    },
                    CreateSaleItem {
                        product_id: scarce,
                        quantity: 5,
                        discount_percentage: None,
                    },
                ],
            })
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::OutOfStockOrInvalidProduct(_));
        // Full rollback: both products back at their original levels
        assert_eq!(
            fx.products
                .find_by_id(plentiful)
                .await
                .unwrap()
                .unwrap()
                .stock,
            10
        );
        assert_eq!(
            fx.products.find_by_id(scarce).await.unwrap().unwrap().stock,
            1
        );
        // And no sale was persisted
        assert!(fx.sales.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inactive_products_cannot_be_sold() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(10.00), 10).await;
        fx.products.soft_delete(product_id).await.unwrap();

        let err = fx
            .sales
            .create_sale(one_line_request(product_id, 1))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::OutOfStockOrInvalidProduct(_));
    }

    #[tokio::test]
    async fn unit_price_is_snapshotted_at_sale_time() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(50.00), 10).await;

        let sale = fx
            .sales
            .create_sale(one_line_request(product_id, 1))
            .await
            .unwrap();

        // Price change after the sale leaves the recorded price untouched
        fx.products
            .update(
                product_id,
                crate::repositories::ProductChanges {
                    name: "Laptop".to_string(),
                    category: "Computers".to_string(),
                    price: dec!(80.00),
                    stock: 9,
                },
            )
            .await
            .unwrap();

        let reloaded = fx.sales.get_by_id(sale.id).await.unwrap().unwrap();
        assert_eq!(reloaded.items[0].unit_price, dec!(50.00));
    }

    #[tokio::test]
    async fn mark_completed_only_from_pending() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(10.00), 10).await;
        let sale = fx
            .sales
            .create_sale(one_line_request(product_id, 1))
            .await
            .unwrap();

        assert!(fx.sales.mark_completed(sale.id).await.unwrap());
        // Already completed
        assert!(!fx.sales.mark_completed(sale.id).await.unwrap());
        // Unknown sale
        assert!(!fx.sales.mark_completed(9999).await.unwrap());
    }

    #[tokio::test]
    async fn mark_completed_on_returned_sale_is_rejected() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(10.00), 10).await;
        let sale = fx
            .sales
            .create_sale(one_line_request(product_id, 1))
            .await
            .unwrap();
        fx.sales.mark_completed(sale.id).await.unwrap();
        fx.sales.record_return(sale.id).await.unwrap();

        assert!(!fx.sales.mark_completed(sale.id).await.unwrap());
        let reloaded = fx.sales.get_by_id(sale.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SaleStatus::Returned);
    }

    #[tokio::test]
    async fn cancel_pending_sale_restores_stock() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(10.00), 10).await;
        let sale = fx
            .sales
            .create_sale(one_line_request(product_id, 4))
            .await
            .unwrap();
        assert_eq!(
            fx.products
                .find_by_id(product_id)
                .await
                .unwrap()
                .unwrap()
                .stock,
            6
        );

        assert!(fx.sales.cancel(sale.id).await.unwrap());

        let reloaded = fx.sales.get_by_id(sale.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SaleStatus::Cancelled);
        assert_eq!(
            fx.products
                .find_by_id(product_id)
                .await
                .unwrap()
                .unwrap()
                .stock,
            10
        );
    }

    #[tokio::test]
    async fn completed_sales_cannot_be_cancelled() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(10.00), 10).await;
        let sale = fx
            .sales
            .create_sale(one_line_request(product_id, 2))
            .await
            .unwrap();
        fx.sales.mark_completed(sale.id).await.unwrap();

        assert!(!fx.sales.cancel(sale.id).await.unwrap());
        let reloaded = fx.sales.get_by_id(sale.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SaleStatus::Completed);
        // No stock came back
        assert_eq!(
            fx.products
                .find_by_id(product_id)
                .await
                .unwrap()
                .unwrap()
                .stock,
            8
        );
    }

    #[tokio::test]
    async fn return_restores_each_item_and_never_double_restores() {
        let fx = fixture();
        let first = seed_product(&fx, dec!(10.00), 10).await;
        let second = seed_product(&fx, dec!(5.00), 10).await;

        let sale = fx
            .sales
            .create_sale(CreateSaleRequest {
                user_id: 1,
                date: None,
                items: vec![
                    CreateSaleItem {
                        product_id: first,
                        quantity: 3,
                        discount_percentage: None,
                    },
                    CreateSaleItem {
                        product_id: second,
                        quantity: 1,
                        discount_percentage: None,
                    },
                ],
            })
            .await
            .unwrap();
        fx.sales.mark_completed(sale.id).await.unwrap();

        assert!(fx.sales.record_return(sale.id).await.unwrap());
        assert_eq!(fx.products.find_by_id(first).await.unwrap().unwrap().stock, 10);
        assert_eq!(
            fx.products.find_by_id(second).await.unwrap().unwrap().stock,
            10
        );

        // A second return is rejected and restores nothing
        assert!(!fx.sales.record_return(sale.id).await.unwrap());
        assert_eq!(fx.products.find_by_id(first).await.unwrap().unwrap().stock, 10);
    }

    #[tokio::test]
    async fn returning_a_pending_sale_is_rejected() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(10.00), 10).await;
        let sale = fx
            .sales
            .create_sale(one_line_request(product_id, 1))
            .await
            .unwrap();

        assert!(!fx.sales.record_return(sale.id).await.unwrap());
    }

    #[tokio::test]
    async fn report_counts_completed_sales_only() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(10.00), 100).await;

        let completed = fx
            .sales
            .create_sale(one_line_request(product_id, 4))
            .await
            .unwrap();
        fx.sales.mark_completed(completed.id).await.unwrap();

        let cancelled = fx
            .sales
            .create_sale(one_line_request(product_id, 7))
            .await
            .unwrap();
        fx.sales.cancel(cancelled.id).await.unwrap();

        // Pending sale, also excluded
        fx.sales
            .create_sale(one_line_request(product_id, 9))
            .await
            .unwrap();

        let report = fx.sales.product_sales_report(product_id).await.unwrap();
        assert_eq!(report.total_quantity_sold, 4);
        assert_eq!(report.product_name, "Laptop");
    }

    #[tokio::test]
    async fn report_for_unknown_product_is_empty() {
        let fx = fixture();
        let report = fx.sales.product_sales_report(42).await.unwrap();
        assert_eq!(report.total_quantity_sold, 0);
        assert_eq!(report.product_name, "Unknown");
    }

    #[tokio::test]
    async fn discount_is_recorded_but_not_applied_to_total() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(100.00), 10).await;

        let sale = fx
            .sales
            .create_sale(CreateSaleRequest {
                user_id: 1,
                date: None,
                items: vec![CreateSaleItem {
                    product_id,
                    quantity: 2,
                    discount_percentage: Some(dec!(25)),
                }],
            })
            .await
            .unwrap();

        assert_eq!(sale.items[0].discount_percentage, dec!(25));
        assert_eq!(sale.total_amount, dec!(200.00));
    }

    #[tokio::test]
    async fn discount_outside_range_is_rejected() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(100.00), 10).await;

        let err = fx
            .sales
            .create_sale(CreateSaleRequest {
                user_id: 1,
                date: None,
                items: vec![CreateSaleItem {
                    product_id,
                    quantity: 1,
                    discount_percentage: Some(dec!(101)),
                }],
            })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn queries_filter_by_user_and_product() {
        let fx = fixture();
        let product_id = seed_product(&fx, dec!(10.00), 100).await;
        let other_product = seed_product(&fx, dec!(10.00), 100).await;

        fx.sales
            .create_sale(CreateSaleRequest {
                user_id: 7,
                date: None,
                items: vec![CreateSaleItem {
                    product_id,
                    quantity: 1,
                    discount_percentage: None,
                }],
            })
            .await
            .unwrap();
        fx.sales
            .create_sale(CreateSaleRequest {
                user_id: 8,
                date: None,
                items: vec![CreateSaleItem {
                    product_id: other_product,
                    quantity: 1,
                    discount_percentage: None,
                }],
            })
            .await
            .unwrap();

        assert_eq!(fx.sales.get_by_user(7).await.unwrap().len(), 1);
        assert_eq!(fx.sales.get_by_product(product_id).await.unwrap().len(), 1);
        assert_eq!(fx.sales.get_all().await.unwrap().len(), 2);
    }
}
