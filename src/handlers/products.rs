use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::errors::ServiceError;
use crate::services::products::{AddProductRequest, ProductResponse, UpdateProductRequest};
use crate::{ApiResponse, ApiResult, AppState};

pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<AddProductRequest>,
) -> ApiResult<ProductResponse> {
    let product = state.services.products.add(request).await?;
    Ok(Json(ApiResponse::success(product)))
}

pub async fn list_products(State(state): State<AppState>) -> ApiResult<Vec<ProductResponse>> {
    let products = state.services.products.get_all().await?;
    Ok(Json(ApiResponse::success(products)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<ProductResponse> {
    let product = state
        .services
        .products
        .get_by_id(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {id} not found")))?;
    Ok(Json(ApiResponse::success(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(request): Json<UpdateProductRequest>,
) -> ApiResult<ProductResponse> {
    let product = state
        .services
        .products
        .update(id, request)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {id} not found")))?;
    Ok(Json(ApiResponse::success(product)))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<()> {
    if !state.services.products.soft_delete(id).await? {
        return Err(ServiceError::NotFound(format!("Product {id} not found")));
    }
    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStockRequest {
    pub stock: i32,
}

/// Administrative stock overwrite; goes through the stock ledger so cache
/// invalidation and low-stock alerting apply.
pub async fn update_stock(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(request): Json<UpdateStockRequest>,
) -> ApiResult<i32> {
    let level = state.services.stock.set_stock(id, request.stock).await?;
    Ok(Json(ApiResponse::success(level)))
}

pub async fn low_stock(State(state): State<AppState>) -> ApiResult<Vec<ProductResponse>> {
    let products = state.services.products.low_stock().await?;
    Ok(Json(ApiResponse::success(products)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keyword: String,
}

pub async fn search_products(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<ProductResponse>> {
    let products = state.services.products.search(&query.keyword).await?;
    Ok(Json(ApiResponse::success(products)))
}

pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    let categories = state.services.products.categories().await?;
    Ok(Json(ApiResponse::success(categories)))
}
