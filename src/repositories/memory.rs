//! In-memory store implementations.
//!
//! Used by the test suite and as a zero-dependency backend for local
//! experiments; the mutex gives the same per-product serialization the SQL
//! stores get from conditional updates.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::entities::{product, sale, sale_item, SaleStatus};
use crate::errors::ServiceError;

use super::{
    DailySalesSummary, NewProduct, NewSale, ProductChanges, ProductStore, SaleStore,
    SaleWithItems, StockDecrement,
};

#[derive(Default)]
struct ProductState {
    products: HashMap<i32, product::Model>,
    next_id: i32,
}

#[derive(Default)]
pub struct InMemoryProductStore {
    state: Mutex<ProductState>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: seed a product with a fixed id.
    pub fn seed(&self, model: product::Model) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(model.id);
        state.products.insert(model.id, model);
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn insert(&self, new: NewProduct) -> Result<product::Model, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let model = product::Model {
            id: state.next_id,
            name: new.name,
            category: new.category,
            price: new.price,
            stock: new.stock,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Some(Utc::now()),
        };
        state.products.insert(model.id, model.clone());
        Ok(model)
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<product::Model>, ServiceError> {
        let state = self.state.lock().unwrap();
        Ok(state.products.get(&id).cloned())
    }

    async fn find_all_active(&self) -> Result<Vec<product::Model>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut products: Vec<_> = state
            .products
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        products.sort_by_key(|p| p.id);
        Ok(products)
    }

    async fn update(
        &self,
        id: i32,
        changes: ProductChanges,
    ) -> Result<Option<product::Model>, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.products.get_mut(&id) else {
            return Ok(None);
        };
        if !existing.is_active {
            return Ok(None);
        }
        existing.name = changes.name;
        existing.category = changes.category;
        existing.price = changes.price;
        existing.stock = changes.stock;
        existing.updated_at = Some(Utc::now());
        Ok(Some(existing.clone()))
    }

    async fn soft_delete(&self, id: i32) -> Result<bool, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.products.get_mut(&id) else {
            return Ok(false);
        };
        if !existing.is_active {
            return Ok(false);
        }
        existing.is_active = false;
        existing.updated_at = Some(Utc::now());
        Ok(true)
    }

    async fn find_low_stock(&self, threshold: i32) -> Result<Vec<product::Model>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut products: Vec<_> = state
            .products
            .values()
            .filter(|p| p.is_active && p.stock <= threshold)
            .cloned()
            .collect();
        products.sort_by_key(|p| p.stock);
        Ok(products)
    }

    async fn search(&self, keyword: &str) -> Result<Vec<product::Model>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut products: Vec<_> = state
            .products
            .values()
            .filter(|p| p.is_active && (p.name.contains(keyword) || p.category.contains(keyword)))
            .cloned()
            .collect();
        products.sort_by_key(|p| p.id);
        Ok(products)
    }

    async fn categories(&self) -> Result<Vec<String>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut categories: Vec<String> = state
            .products
            .values()
            .filter(|p| p.is_active)
            .map(|p| p.category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    async fn try_decrement_stock(
        &self,
        id: i32,
        quantity: i32,
    ) -> Result<StockDecrement, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let Some(p) = state.products.get_mut(&id) else {
            return Ok(StockDecrement::NotFound);
        };
        if !p.is_active {
            return Ok(StockDecrement::NotFound);
        }
        if p.stock < quantity {
            return Ok(StockDecrement::Insufficient);
        }
        p.stock -= quantity;
        Ok(StockDecrement::Applied { remaining: p.stock })
    }

    async fn increment_stock(
        &self,
        id: i32,
        quantity: i32,
    ) -> Result<Option<i32>, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let Some(p) = state.products.get_mut(&id) else {
            return Ok(None);
        };
        p.stock += quantity;
        Ok(Some(p.stock))
    }

    async fn set_stock(&self, id: i32, stock: i32) -> Result<Option<i32>, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let Some(p) = state.products.get_mut(&id) else {
            return Ok(None);
        };
        if !p.is_active {
            return Ok(None);
        }
        p.stock = stock;
        Ok(Some(p.stock))
    }
}

#[derive(Default)]
struct SaleState {
    sales: HashMap<i32, sale::Model>,
    items: HashMap<i32, Vec<sale_item::Model>>,
    next_sale_id: i32,
    next_item_id: i32,
}

#[derive(Default)]
pub struct InMemorySaleStore {
    state: Mutex<SaleState>,
}

impl InMemorySaleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(state: &SaleState, sale: &sale::Model) -> SaleWithItems {
        SaleWithItems {
            sale: sale.clone(),
            items: state.items.get(&sale.id).cloned().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SaleStore for InMemorySaleStore {
    async fn insert(&self, new: NewSale) -> Result<SaleWithItems, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.next_sale_id += 1;
        let sale_id = state.next_sale_id;

        let sale_model = sale::Model {
            id: sale_id,
            date: new.date,
            total_amount: new.total_amount,
            user_id: new.user_id,
            status: new.status,
            created_at: Utc::now(),
        };

        let mut item_models = Vec::with_capacity(new.items.len());
        for item in new.items {
            state.next_item_id += 1;
            item_models.push(sale_item::Model {
                id: state.next_item_id,
                sale_id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                discount_percentage: item.discount_percentage,
            });
        }

        state.sales.insert(sale_id, sale_model.clone());
        state.items.insert(sale_id, item_models.clone());

        Ok(SaleWithItems {
            sale: sale_model,
            items: item_models,
        })
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<SaleWithItems>, ServiceError> {
        let state = self.state.lock().unwrap();
        Ok(state.sales.get(&id).map(|s| Self::resolve(&state, s)))
    }

    async fn find_all(&self) -> Result<Vec<SaleWithItems>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut sales: Vec<_> = state.sales.values().cloned().collect();
        sales.sort_by_key(|s| s.id);
        Ok(sales.iter().map(|s| Self::resolve(&state, s)).collect())
    }

    async fn find_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SaleWithItems>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut sales: Vec<_> = state
            .sales
            .values()
            .filter(|s| s.date >= from && s.date <= to)
            .cloned()
            .collect();
        sales.sort_by_key(|s| s.date);
        Ok(sales.iter().map(|s| Self::resolve(&state, s)).collect())
    }

    async fn find_by_product(&self, product_id: i32) -> Result<Vec<SaleWithItems>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut sales: Vec<_> = state
            .sales
            .values()
            .filter(|s| {
                state
                    .items
                    .get(&s.id)
                    .map(|items| items.iter().any(|i| i.product_id == product_id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        sales.sort_by_key(|s| s.id);
        Ok(sales.iter().map(|s| Self::resolve(&state, s)).collect())
    }

    async fn find_by_user(&self, user_id: i32) -> Result<Vec<SaleWithItems>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut sales: Vec<_> = state
            .sales
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sales.sort_by_key(|s| s.id);
        Ok(sales.iter().map(|s| Self::resolve(&state, s)).collect())
    }

    async fn transition(
        &self,
        id: i32,
        from: SaleStatus,
        to: SaleStatus,
    ) -> Result<bool, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let Some(sale) = state.sales.get_mut(&id) else {
            return Ok(false);
        };
        if sale.status != from {
            return Ok(false);
        }
        sale.status = to;
        Ok(true)
    }

    async fn completed_items_for_product(
        &self,
        product_id: i32,
    ) -> Result<Vec<sale_item::Model>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<_> = state
            .sales
            .values()
            .filter(|s| s.status == SaleStatus::Completed)
            .flat_map(|s| {
                state
                    .items
                    .get(&s.id)
                    .into_iter()
                    .flatten()
                    .filter(|i| i.product_id == product_id)
                    .cloned()
            })
            .collect();
        items.sort_by_key(|i| i.id);
        Ok(items)
    }

    async fn daily_summary(
        &self,
        day: NaiveDate,
    ) -> Result<Option<DailySalesSummary>, ServiceError> {
        let start = Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN));
        let end = start + chrono::Duration::days(1);

        let state = self.state.lock().unwrap();
        let completed: Vec<&sale::Model> = state
            .sales
            .values()
            .filter(|s| s.status == SaleStatus::Completed && s.date >= start && s.date < end)
            .collect();

        if completed.is_empty() {
            return Ok(None);
        }

        let total_sales: Decimal = completed.iter().map(|s| s.total_amount).sum();

        let mut quantity_sold: i64 = 0;
        let mut per_product: HashMap<i32, i64> = HashMap::new();
        for sale in &completed {
            for item in state.items.get(&sale.id).into_iter().flatten() {
                quantity_sold += item.quantity as i64;
                *per_product.entry(item.product_id).or_default() += item.quantity as i64;
            }
        }

        let top = per_product.into_iter().max_by_key(|(_, qty)| *qty);

        Ok(Some(DailySalesSummary {
            total_sales,
            quantity_sold,
            top_product_id: top.map(|(id, _)| id),
            top_product_quantity: top.map(|(_, qty)| qty).unwrap_or(0),
        }))
    }
}
