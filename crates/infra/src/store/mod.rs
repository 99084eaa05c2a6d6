//! Order and stock persistence boundary.
//!
//! The write side (`InventoryStore`) is what the lifecycle engine consumes;
//! the read side (`InventoryQuery`) serves list/detail views.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use query::{
    InventoryQuery, OrderFilter, Page, Pagination, ProductStock, WarehouseStock, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
pub use r#trait::{CommittedTransition, InventoryStore, OrderTransition, StoreError};
