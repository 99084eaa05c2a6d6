use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use stockflow_infra::EngineError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/stock-movements", get(list_movements))
}

/// GET /stock-movements?product_id=&warehouse_id=&start_date=&end_date=&order=&limit=&offset=
///
/// Ledger entries, oldest first unless `order=newest`. Filtering by an unknown
/// product or warehouse is a 404 rather than an empty page.
pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::MovementsQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", e.body_text()),
    };
    let filter = match query.filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    let store = services.query();
    if let Some(product_id) = filter.product_id {
        match store.product_exists(product_id).await {
            Ok(true) => {}
            Ok(false) => {
                return errors::engine_error_to_response(EngineError::product_not_found(product_id));
            }
            Err(e) => return errors::store_error_to_response(e),
        }
    }
    if let Some(warehouse_id) = filter.warehouse_id {
        match store.warehouse_exists(warehouse_id).await {
            Ok(true) => {}
            Ok(false) => {
                return errors::engine_error_to_response(EngineError::warehouse_not_found(warehouse_id));
            }
            Err(e) => return errors::store_error_to_response(e),
        }
    }

    match store.query_movements(filter, query.pagination()).await {
        Ok(page) => {
            let page = page.map(|m| dto::movement_to_json(&m));
            (StatusCode::OK, Json(dto::page_to_json("movements", page))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
