use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stockflow_core::OrderId;
use stockflow_infra::EngineError;
use stockflow_orders::{OrderOperation, OrderSnapshot};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:id", get(get_order).put(update_order))
        .route("/:id/complete", post(complete_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/resume", post(resume_order))
}

fn order_body(body: Result<Json<dto::OrderRequest>, JsonRejection>) -> Result<dto::OrderRequest, axum::response::Response> {
    match body {
        Ok(Json(body)) => Ok(body),
        Err(e) => Err(errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text())),
    }
}

fn transition_response(
    operation: OrderOperation,
    success: StatusCode,
    result: Result<OrderSnapshot, EngineError>,
) -> axum::response::Response {
    match result {
        Ok(order) => {
            tracing::info!(
                %operation,
                order_id = %order.id,
                status = %order.status,
                "order transition committed"
            );
            (success, Json(dto::order_to_json(&order))).into_response()
        }
        Err(e) => {
            tracing::info!(%operation, error = %e, "order transition rejected");
            errors::engine_error_to_response(e)
        }
    }
}

/// GET /orders?status=&warehouse_id=&limit=&offset=
///
/// Newest first, 15 per page unless `limit` says otherwise (at most 100).
pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::ListOrdersQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", e.body_text()),
    };
    let filter = match query.filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    if let Some(warehouse_id) = filter.warehouse_id {
        match services.query().warehouse_exists(warehouse_id).await {
            Ok(true) => {}
            Ok(false) => {
                return errors::engine_error_to_response(EngineError::warehouse_not_found(warehouse_id));
            }
            Err(e) => return errors::store_error_to_response(e),
        }
    }

    match services.query().list_orders(filter, query.pagination()).await {
        Ok(page) => {
            let page = page.map(|o| dto::order_to_json(&o));
            (StatusCode::OK, Json(dto::page_to_json("orders", page))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match dto::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.query().get_order(order_id).await {
        Ok(Some(order)) => (StatusCode::OK, Json(dto::order_to_json(&order))).into_response(),
        Ok(None) => errors::engine_error_to_response(EngineError::order_not_found(order_id)),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::OrderRequest>, JsonRejection>,
) -> axum::response::Response {
    let input = match order_body(body).and_then(dto::OrderRequest::into_input) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let result = services.create_order(input).await;
    transition_response(OrderOperation::Create, StatusCode::CREATED, result)
}

pub async fn update_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::OrderRequest>, JsonRejection>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let input = match order_body(body).and_then(dto::OrderRequest::into_input) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let result = services.update_order(order_id, input).await;
    transition_response(OrderOperation::Update, StatusCode::OK, result)
}

pub async fn complete_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services.complete_order(order_id).await;
    transition_response(OrderOperation::Complete, StatusCode::OK, result)
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services.cancel_order(order_id).await;
    transition_response(OrderOperation::Cancel, StatusCode::OK, result)
}

pub async fn resume_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services.resume_order(order_id).await;
    transition_response(OrderOperation::Resume, StatusCode::OK, result)
}
