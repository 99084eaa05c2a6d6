use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/warehouses", get(list_warehouses))
        .route("/products", get(list_products))
}

/// GET /warehouses
pub async fn list_warehouses(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.query().list_warehouses().await {
        Ok(warehouses) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "warehouses": warehouses.iter().map(dto::warehouse_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /products
///
/// Every product with its stock in each warehouse that holds a balance.
pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.query().list_products().await {
        Ok(products) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "products": products.iter().map(dto::product_stock_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
