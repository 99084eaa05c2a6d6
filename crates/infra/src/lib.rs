//! Infrastructure layer: order/stock stores and the lifecycle engine.

pub mod engine;
pub mod store;

mod integration_tests;

pub use engine::{EngineError, OrderLifecycleEngine};
pub use store::{
    CommittedTransition, InMemoryInventoryStore, InventoryQuery, InventoryStore, OrderFilter,
    OrderTransition, Page, Pagination, PostgresInventoryStore, ProductStock, StoreError,
    WarehouseStock,
};
