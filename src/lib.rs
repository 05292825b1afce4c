//! SalesTracker API Library
//!
//! Product and sale management with a stock ledger, a read-through product
//! cache, and asynchronous low-stock alerting over a durable queue.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod message_queue;
pub mod migrator;
pub mod repositories;
pub mod services;

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use handlers::AppServices;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: AppServices,
}

/// Standard response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let products = Router::new()
        .route(
            "/products",
            get(handlers::products::list_products).post(handlers::products::create_product),
        )
        .route("/products/low-stock", get(handlers::products::low_stock))
        .route("/products/search", get(handlers::products::search_products))
        .route(
            "/products/categories",
            get(handlers::products::list_categories),
        )
        .route(
            "/products/:id",
            get(handlers::products::get_product)
                .put(handlers::products::update_product)
                .delete(handlers::products::delete_product),
        )
        .route(
            "/products/:id/stock",
            axum::routing::patch(handlers::products::update_stock),
        );

    let sales = Router::new()
        .route(
            "/sales",
            get(handlers::sales::list_sales).post(handlers::sales::create_sale),
        )
        .route(
            "/sales/date-range",
            get(handlers::sales::sales_by_date_range),
        )
        .route("/sales/:id", get(handlers::sales::get_sale))
        .route(
            "/sales/product/:product_id",
            get(handlers::sales::sales_by_product),
        )
        .route("/sales/user/:user_id", get(handlers::sales::sales_by_user))
        .route(
            "/sales/product-report/:product_id",
            get(handlers::sales::product_sales_report),
        )
        .route("/sales/:id/complete", post(handlers::sales::complete_sale))
        .route("/sales/:id/cancel", post(handlers::sales::cancel_sale))
        .route("/sales/:id/return", post(handlers::sales::return_sale));

    products.merge(sales)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Builds the complete application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
