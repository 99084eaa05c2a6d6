//! Read-side query interface used by the HTTP layer.
//!
//! Nothing here mutates state. Lists are paginated by default.

use serde::{Deserialize, Serialize};

use stockflow_catalog::{Product, Warehouse};
use stockflow_core::{OrderId, ProductId, WarehouseId};
use stockflow_inventory::{Movement, MovementFilter};
use stockflow_orders::{OrderSnapshot, OrderStatus};

use super::r#trait::StoreError;

pub const DEFAULT_PAGE_SIZE: u32 = 15;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    /// Slice an already filtered and ordered collection.
    pub fn apply<T>(&self, rows: Vec<T>) -> Page<T> {
        let total = rows.len() as u64;
        let items: Vec<T> = rows
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect();
        Page::new(items, total, *self)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of rows matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            pagination: self.pagination,
            has_more: self.has_more,
        }
    }
}

/// Order list filter. Results are newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub warehouse_id: Option<WarehouseId>,
}

impl OrderFilter {
    pub fn matches(&self, order: &OrderSnapshot) -> bool {
        self.status.is_none_or(|s| s == order.status)
            && self.warehouse_id.is_none_or(|w| w == order.warehouse_id)
    }
}

/// Quantity of a product held in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseStock {
    pub warehouse_id: WarehouseId,
    pub warehouse_name: String,
    pub quantity: i64,
}

/// A product together with its stock in every warehouse that has a balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    pub product: Product,
    pub stocks: Vec<WarehouseStock>,
}

#[async_trait::async_trait]
pub trait InventoryQuery: Send + Sync {
    async fn list_orders(
        &self,
        filter: OrderFilter,
        pagination: Pagination,
    ) -> Result<Page<OrderSnapshot>, StoreError>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>, StoreError>;

    /// Ledger entries matching `filter`, in `filter.order`. The caller validates
    /// the filter first.
    async fn query_movements(
        &self,
        filter: MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError>;

    /// All warehouses, by name.
    async fn list_warehouses(&self) -> Result<Vec<Warehouse>, StoreError>;

    /// All products with their per-warehouse stock, by name.
    async fn list_products(&self) -> Result<Vec<ProductStock>, StoreError>;

    async fn product_exists(&self, product_id: ProductId) -> Result<bool, StoreError>;

    async fn warehouse_exists(&self, warehouse_id: WarehouseId) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_caps() {
        assert_eq!(Pagination::new(None, None), Pagination::default());
        assert_eq!(Pagination::new(Some(500), None).limit, MAX_PAGE_SIZE);
        assert_eq!(Pagination::new(Some(0), Some(3)).limit, 1);
    }

    #[test]
    fn apply_slices_and_reports_has_more() {
        let pagination = Pagination::new(Some(2), Some(1));
        let page = pagination.apply(vec![1, 2, 3, 4]);
        assert_eq!(page.items, vec![2, 3]);
        assert_eq!(page.total, 4);
        assert!(page.has_more);

        let last = Pagination::new(Some(2), Some(2)).apply(vec![1, 2, 3, 4]);
        assert_eq!(last.items, vec![3, 4]);
        assert!(!last.has_more);
    }
}
