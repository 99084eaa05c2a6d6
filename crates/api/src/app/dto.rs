use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use stockflow_catalog::Warehouse;
use stockflow_core::{OrderId, ProductId, WarehouseId};
use stockflow_infra::{OrderFilter, Page, Pagination, ProductStock};
use stockflow_inventory::{Movement, MovementFilter, SortOrder};
use stockflow_orders::{OrderItem, OrderSnapshot, OrderStatus};

use crate::app::errors;
use crate::app::services::OrderInput;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    #[serde(alias = "count")]
    pub quantity: i64,
}

/// Body of `POST /orders` and `PUT /orders/:id`.
#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub customer: String,
    pub warehouse_id: String,
    pub items: Vec<OrderItemRequest>,
}

impl OrderRequest {
    /// Parse ids. Customer and quantity rules are enforced by the order itself.
    pub fn into_input(self) -> Result<OrderInput, axum::response::Response> {
        let warehouse_id = parse_warehouse_id(&self.warehouse_id)?;
        if self.items.is_empty() {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "items must not be empty",
            ));
        }
        let items = self
            .items
            .into_iter()
            .map(|item| Ok(OrderItem::new(parse_product_id(&item.product_id)?, item.quantity)))
            .collect::<Result<Vec<_>, axum::response::Response>>()?;
        Ok(OrderInput {
            customer: self.customer,
            warehouse_id,
            items,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub warehouse_id: Option<String>,
    #[serde(alias = "per_page")]
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListOrdersQuery {
    pub fn filter(&self) -> Result<OrderFilter, axum::response::Response> {
        let status = match non_empty(&self.status) {
            None => None,
            Some(raw) => Some(raw.parse::<OrderStatus>().map_err(|_| {
                errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_status",
                    "status must be one of: active, completed, canceled",
                )
            })?),
        };
        let warehouse_id = non_empty(&self.warehouse_id)
            .map(parse_warehouse_id)
            .transpose()?;
        Ok(OrderFilter {
            status,
            warehouse_id,
        })
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.limit, self.offset)
    }
}

/// `GET /stock-movements` parameters. Dates accept RFC 3339 or `YYYY-MM-DD`;
/// a bare date covers the whole day on both ends.
#[derive(Debug, Default, Deserialize)]
pub struct MovementsQuery {
    pub product_id: Option<String>,
    pub warehouse_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub order: Option<String>,
    #[serde(alias = "per_page")]
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl MovementsQuery {
    pub fn filter(&self) -> Result<MovementFilter, axum::response::Response> {
        let filter = MovementFilter {
            product_id: non_empty(&self.product_id).map(parse_product_id).transpose()?,
            warehouse_id: non_empty(&self.warehouse_id)
                .map(parse_warehouse_id)
                .transpose()?,
            created_from: non_empty(&self.start_date)
                .map(|s| parse_date_bound(s, DateBound::Start))
                .transpose()?,
            created_to: non_empty(&self.end_date)
                .map(|s| parse_date_bound(s, DateBound::End))
                .transpose()?,
            order: match non_empty(&self.order) {
                None => SortOrder::default(),
                Some(raw) => parse_sort_order(raw)?,
            },
        };
        filter
            .validate()
            .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))?;
        Ok(filter)
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.limit, self.offset)
    }
}

// -------------------------
// Parsing helpers
// -------------------------

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn parse_order_id(raw: &str) -> Result<OrderId, axum::response::Response> {
    raw.trim()
        .parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"))
}

pub fn parse_product_id(raw: &str) -> Result<ProductId, axum::response::Response> {
    raw.trim()
        .parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"))
}

pub fn parse_warehouse_id(raw: &str) -> Result<WarehouseId, axum::response::Response> {
    raw.trim().parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid warehouse id")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateBound {
    Start,
    End,
}

fn parse_date_bound(raw: &str, bound: DateBound) -> Result<DateTime<Utc>, axum::response::Response> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let invalid = || {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_date",
            format!("invalid date {raw:?}: expected RFC 3339 or YYYY-MM-DD"),
        )
    };
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
    let at = match bound {
        DateBound::Start => date.and_hms_opt(0, 0, 0),
        DateBound::End => date.and_hms_nano_opt(23, 59, 59, 999_999_999),
    };
    at.map(|t| t.and_utc()).ok_or_else(invalid)
}

fn parse_sort_order(raw: &str) -> Result<SortOrder, axum::response::Response> {
    match raw.to_lowercase().as_str() {
        "oldest" | "asc" => Ok(SortOrder::Oldest),
        "newest" | "desc" => Ok(SortOrder::Newest),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_order",
            "order must be one of: oldest, newest",
        )),
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn order_to_json(order: &OrderSnapshot) -> serde_json::Value {
    json!({
        "id": order.id.to_string(),
        "customer": order.customer,
        "warehouse_id": order.warehouse_id.to_string(),
        "status": order.status.as_str(),
        "items": order.items.iter().map(|item| json!({
            "product_id": item.product_id.to_string(),
            "quantity": item.quantity,
        })).collect::<Vec<_>>(),
        "created_at": order.created_at.to_rfc3339(),
        "updated_at": order.updated_at.to_rfc3339(),
        "completed_at": order.completed_at.map(|t| t.to_rfc3339()),
        "version": order.version,
    })
}

pub fn movement_to_json(movement: &Movement) -> serde_json::Value {
    json!({
        "id": movement.id.to_string(),
        "product_id": movement.product_id.to_string(),
        "warehouse_id": movement.warehouse_id.to_string(),
        "delta": movement.delta,
        "reason": movement.reason,
        "created_at": movement.created_at.to_rfc3339(),
    })
}

pub fn warehouse_to_json(warehouse: &Warehouse) -> serde_json::Value {
    json!({
        "id": warehouse.id_typed().to_string(),
        "name": warehouse.name(),
    })
}

pub fn product_stock_to_json(product: &ProductStock) -> serde_json::Value {
    json!({
        "id": product.product.id_typed().to_string(),
        "name": product.product.name(),
        "price": product.product.price(),
        "stocks": product.stocks.iter().map(|s| json!({
            "warehouse_id": s.warehouse_id.to_string(),
            "warehouse_name": s.warehouse_name,
            "quantity": s.quantity,
        })).collect::<Vec<_>>(),
    })
}

/// Paginated list body: `{ <key>: [...], total, pagination, has_more }`.
pub fn page_to_json(key: &str, page: Page<serde_json::Value>) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert(key.to_string(), serde_json::Value::Array(page.items));
    body.insert("total".to_string(), json!(page.total));
    body.insert(
        "pagination".to_string(),
        json!({
            "limit": page.pagination.limit,
            "offset": page.pagination.offset,
        }),
    );
    body.insert("has_more".to_string(), json!(page.has_more));
    serde_json::Value::Object(body)
}
