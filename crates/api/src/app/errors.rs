use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value, json};

use stockflow_infra::{EngineError, StoreError};

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        EngineError::NotFound { entity, id } => json_error_with(
            StatusCode::NOT_FOUND,
            "not_found",
            message,
            json!({ "entity": entity, "id": id }),
        ),
        EngineError::InvalidTransition {
            operation,
            order_id,
            status,
        } => json_error_with(
            StatusCode::CONFLICT,
            "invalid_transition",
            message,
            json!({
                "operation": operation.to_string(),
                "order_id": order_id.to_string(),
                "status": status.as_str(),
            }),
        ),
        EngineError::InsufficientStock {
            operation,
            order_id,
            product_id,
            warehouse_id,
            requested,
            available,
        } => json_error_with(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_stock",
            message,
            json!({
                "operation": operation.to_string(),
                "order_id": order_id.to_string(),
                "product_id": product_id.to_string(),
                "warehouse_id": warehouse_id.to_string(),
                "requested": requested,
                "available": available,
            }),
        ),
        EngineError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        EngineError::ConcurrencyConflict(_) => json_error_with(
            StatusCode::CONFLICT,
            "conflict",
            message,
            json!({ "retryable": true }),
        ),
        EngineError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    tracing::warn!(error = %err, "store failure");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "store_error",
        err.to_string(),
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    json_error_with(status, code, message, Value::Null)
}

/// Like [`json_error`], with the fields of `details` merged into the body.
pub fn json_error_with(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    details: Value,
) -> axum::response::Response {
    let mut body = json!({
        "error": code,
        "message": message.into(),
    });
    if let (Some(obj), Value::Object(extra)) = (body.as_object_mut(), details) {
        obj.extend(extra);
    }
    (status, axum::Json(body)).into_response()
}
