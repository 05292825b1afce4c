use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::ServiceError;
use crate::services::sales::{CreateSaleRequest, ProductSalesReport, SaleResponse};
use crate::{ApiResponse, ApiResult, AppState};

pub async fn create_sale(
    State(state): State<AppState>,
    Json(request): Json<CreateSaleRequest>,
) -> ApiResult<SaleResponse> {
    let sale = state.services.sales.create_sale(request).await?;
    Ok(Json(ApiResponse::success(sale)))
}

pub async fn list_sales(State(state): State<AppState>) -> ApiResult<Vec<SaleResponse>> {
    let sales = state.services.sales.get_all().await?;
    Ok(Json(ApiResponse::success(sales)))
}

pub async fn get_sale(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<SaleResponse> {
    let sale = state
        .services
        .sales
        .get_by_id(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Sale {id} not found")))?;
    Ok(Json(ApiResponse::success(sale)))
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

pub async fn sales_by_date_range(
    State(state): State<AppState>,
    Query(range): Query<DateRangeQuery>,
) -> ApiResult<Vec<SaleResponse>> {
    let sales = state
        .services
        .sales
        .get_by_date_range(range.from, range.to)
        .await?;
    Ok(Json(ApiResponse::success(sales)))
}

pub async fn sales_by_product(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> ApiResult<Vec<SaleResponse>> {
    let sales = state.services.sales.get_by_product(product_id).await?;
    Ok(Json(ApiResponse::success(sales)))
}

pub async fn sales_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> ApiResult<Vec<SaleResponse>> {
    let sales = state.services.sales.get_by_user(user_id).await?;
    Ok(Json(ApiResponse::success(sales)))
}

pub async fn product_sales_report(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> ApiResult<ProductSalesReport> {
    let report = state
        .services
        .sales
        .product_sales_report(product_id)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}

/// Lifecycle transitions return a business boolean; `false` surfaces as a
/// 409 so clients can tell "not possible" from "not found".
pub async fn complete_sale(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<bool> {
    if !state.services.sales.mark_completed(id).await? {
        return Err(ServiceError::InvalidOperation(format!(
            "Sale {id} cannot be completed"
        )));
    }
    Ok(Json(ApiResponse::success(true)))
}

pub async fn cancel_sale(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<bool> {
    if !state.services.sales.cancel(id).await? {
        return Err(ServiceError::InvalidOperation(format!(
            "Sale {id} cannot be cancelled"
        )));
    }
    Ok(Json(ApiResponse::success(true)))
}

pub async fn return_sale(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<bool> {
    if !state.services.sales.record_return(id).await? {
        return Err(ServiceError::InvalidOperation(format!(
            "Sale {id} cannot be returned"
        )));
    }
    Ok(Json(ApiResponse::success(true)))
}
