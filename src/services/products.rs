//! Product catalog service with a read-through listing cache.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::cache::{CacheBackend, PRODUCT_LISTING_CACHE_KEY};
use crate::entities::product;
use crate::errors::ServiceError;
use crate::repositories::{NewProduct, ProductChanges, ProductStore};
use crate::services::stock::LOW_STOCK_THRESHOLD;

#[derive(Debug, Deserialize, Validate)]
pub struct AddProductRequest {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: String,
    #[validate(length(max = 100, message = "Category cannot exceed 100 characters"))]
    pub category: String,
    pub price: Decimal,
    pub stock: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: String,
    #[validate(length(max = 100, message = "Category cannot exceed 100 characters"))]
    pub category: String,
    pub price: Decimal,
    pub stock: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: i32,
    pub name: String,
    pub category: String,
    pub price: Decimal,
    pub stock: i32,
}

pub struct ProductService {
    products: Arc<dyn ProductStore>,
    cache: Arc<dyn CacheBackend>,
    cache_ttl: Duration,
}

impl ProductService {
    pub fn new(
        products: Arc<dyn ProductStore>,
        cache: Arc<dyn CacheBackend>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            products,
            cache,
            cache_ttl,
        }
    }

    /// Active products, served from the cache when possible. The cache is
    /// best-effort: any failure falls back to the database and is logged as
    /// a warning.
    #[instrument(skip(self))]
    pub async fn get_all(&self) -> Result<Vec<ProductResponse>, ServiceError> {
        match self.cache.get(PRODUCT_LISTING_CACHE_KEY).await {
            Ok(Some(json)) => match serde_json::from_str::<Vec<ProductResponse>>(&json) {
                Ok(products) => {
                    info!("Retrieved products from cache");
                    return Ok(products);
                }
                Err(e) => warn!(error = %e, "Discarding undecodable product listing cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cache unavailable, falling back to database"),
        }

        let products: Vec<ProductResponse> = self
            .products
            .find_all_active()
            .await?
            .into_iter()
            .map(Self::to_response)
            .collect();

        match serde_json::to_string(&products) {
            Ok(json) => {
                if let Err(e) = self
                    .cache
                    .set(PRODUCT_LISTING_CACHE_KEY, &json, Some(self.cache_ttl))
                    .await
                {
                    warn!(error = %e, "Failed to cache product listing");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize product listing for cache"),
        }

        Ok(products)
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<ProductResponse>, ServiceError> {
        let product = self.products.find_by_id(id).await?;
        Ok(product.filter(|p| p.is_active).map(Self::to_response))
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn add(&self, request: AddProductRequest) -> Result<ProductResponse, ServiceError> {
        request.validate()?;
        Self::check_price_and_stock(request.price, request.stock)?;

        let product = self
            .products
            .insert(NewProduct {
                name: request.name,
                category: request.category,
                price: request.price,
                stock: request.stock,
            })
            .await?;

        self.invalidate_listing().await;
        info!(product_id = product.id, "Product added and cache invalidated");
        Ok(Self::to_response(product))
    }

    /// Updates an active product; missing or inactive products yield `None`.
    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: i32,
        request: UpdateProductRequest,
    ) -> Result<Option<ProductResponse>, ServiceError> {
        request.validate()?;
        Self::check_price_and_stock(request.price, request.stock)?;

        let updated = self
            .products
            .update(
                id,
                ProductChanges {
                    name: request.name,
                    category: request.category,
                    price: request.price,
                    stock: request.stock,
                },
            )
            .await?;

        match updated {
            Some(product) => {
                self.invalidate_listing().await;
                info!(product_id = id, "Product updated and cache cleared");
                Ok(Some(Self::to_response(product)))
            }
            None => {
                warn!(product_id = id, "Update skipped: product not found or inactive");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn soft_delete(&self, id: i32) -> Result<bool, ServiceError> {
        let deleted = self.products.soft_delete(id).await?;
        if deleted {
            self.invalidate_listing().await;
            info!(product_id = id, "Product soft deleted and cache cleared");
        } else {
            warn!(product_id = id, "Soft delete skipped: product not found or inactive");
        }
        Ok(deleted)
    }

    pub async fn low_stock(&self) -> Result<Vec<ProductResponse>, ServiceError> {
        let products = self.products.find_low_stock(LOW_STOCK_THRESHOLD).await?;
        if products.is_empty() {
            info!("No low-stock products found");
        }
        Ok(products.into_iter().map(Self::to_response).collect())
    }

    pub async fn search(&self, keyword: &str) -> Result<Vec<ProductResponse>, ServiceError> {
        let products = self.products.search(keyword).await?;
        if products.is_empty() {
            info!(keyword, "No products found for keyword");
        }
        Ok(products.into_iter().map(Self::to_response).collect())
    }

    pub async fn categories(&self) -> Result<Vec<String>, ServiceError> {
        self.products.categories().await
    }

    fn check_price_and_stock(price: Decimal, stock: i32) -> Result<(), ServiceError> {
        if price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Price cannot be negative".to_string(),
            ));
        }
        if stock < 0 {
            return Err(ServiceError::ValidationError(
                "Stock cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    async fn invalidate_listing(&self) {
        if let Err(e) = self.cache.delete(PRODUCT_LISTING_CACHE_KEY).await {
            warn!(error = %e, "Failed to invalidate product listing cache");
        }
    }

    fn to_response(model: product::Model) -> ProductResponse {
        ProductResponse {
            id: model.id,
            name: model.name,
            category: model.category,
            price: model.price,
            stock: model.stock,
        }
    }
}
