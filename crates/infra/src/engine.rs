//! Order lifecycle engine (application-level orchestration).
//!
//! Every lifecycle operation runs the same pipeline:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the order from the store (absent for create)
//!   ↓
//! 2. Handle command (pure decision logic, produces events)
//!   ↓
//! 3. Apply events to a working copy, derive the ledger entries they imply
//!   ↓
//! 4. Preflight: net deltas per stock key against current levels
//!   ↓
//! 5. Commit balances + ledger + order in one store transaction,
//!    guarded by the version loaded in step 1
//! ```
//!
//! Step 4 gives a precise error without opening a transaction; step 5 still
//! re-checks every decrement, so a shortfall caused by a concurrent
//! transition between 4 and 5 is reported the same way and nothing is written.
//!
//! This module contains no IO itself; it composes the `InventoryStore` trait.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::instrument;

use stockflow_core::{
    Aggregate, AggregateRoot, DomainError, Event, ExpectedVersion, OrderId, ProductId, WarehouseId,
};
use stockflow_inventory::{InsufficientStock, NewMovement, StockKey, check_sufficiency};
use stockflow_orders::{
    CancelOrder, CompleteOrder, CreateOrder, Order, OrderCommand, OrderError, OrderEvent,
    OrderItem, OrderOperation, OrderSnapshot, OrderStatus, ResumeOrder, UpdateOrder,
};

use crate::store::{InventoryStore, OrderTransition, StoreError};

/// Structured outcome of a failed lifecycle operation. Nothing was persisted.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot {operation} order {order_id}: order is {status}")]
    InvalidTransition {
        operation: OrderOperation,
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error(
        "cannot {operation} order {order_id}: insufficient stock for product {product_id} \
         in warehouse {warehouse_id} (requested {requested}, available {available})"
    )]
    InsufficientStock {
        operation: OrderOperation,
        order_id: OrderId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        requested: i64,
        available: i64,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    /// The order changed concurrently; reloading and retrying is safe.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error(transparent)]
    Store(StoreError),
}

impl EngineError {
    pub fn order_not_found(order_id: OrderId) -> Self {
        Self::NotFound {
            entity: "order",
            id: order_id.to_string(),
        }
    }

    pub fn product_not_found(product_id: ProductId) -> Self {
        Self::NotFound {
            entity: "product",
            id: product_id.to_string(),
        }
    }

    pub fn warehouse_not_found(warehouse_id: WarehouseId) -> Self {
        Self::NotFound {
            entity: "warehouse",
            id: warehouse_id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict(_))
    }

    fn insufficient(operation: OrderOperation, order_id: OrderId, short: InsufficientStock) -> Self {
        Self::InsufficientStock {
            operation,
            order_id,
            product_id: short.key.product_id,
            warehouse_id: short.key.warehouse_id,
            requested: short.requested,
            available: short.available,
        }
    }

    fn from_order(operation: OrderOperation, order_id: OrderId, err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { operation, status } => Self::InvalidTransition {
                operation,
                order_id,
                status,
            },
            OrderError::Domain(DomainError::NotFound) => Self::order_not_found(order_id),
            OrderError::Domain(DomainError::Conflict(msg)) => Self::ConcurrencyConflict(format!(
                "cannot {operation} order {order_id}: {msg}"
            )),
            OrderError::Domain(DomainError::Validation(msg))
            | OrderError::Domain(DomainError::InvalidId(msg))
            | OrderError::Domain(DomainError::InvariantViolation(msg)) => Self::Validation(msg),
        }
    }

    fn from_store(operation: OrderOperation, order_id: OrderId, err: StoreError) -> Self {
        match err {
            StoreError::Concurrency(msg) => Self::ConcurrencyConflict(msg),
            StoreError::InsufficientStock(short) => Self::insufficient(operation, order_id, short),
            other => Self::Store(other),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => EngineError::ConcurrencyConflict(msg),
            other => EngineError::Store(other),
        }
    }
}

/// The only component that decides when balances move and ledger entries
/// are written.
///
/// Every public operation returns the full updated order, or an
/// [`EngineError`] with no persisted change.
#[derive(Debug, Clone)]
pub struct OrderLifecycleEngine<S> {
    store: S,
}

impl<S> OrderLifecycleEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> OrderLifecycleEngine<S>
where
    S: InventoryStore,
{
    /// Create an Active order and reserve stock for every item.
    pub async fn create_order(
        &self,
        customer: impl Into<String>,
        warehouse_id: WarehouseId,
        items: Vec<OrderItem>,
    ) -> Result<OrderSnapshot, EngineError> {
        let occurred_at = Utc::now();
        let command = OrderCommand::CreateOrder(CreateOrder {
            order_id: OrderId::new(),
            customer: customer.into(),
            warehouse_id,
            items,
            occurred_at,
        });
        self.execute(command, occurred_at).await
    }

    /// Replace customer and items of an Active order: full release of the old
    /// items, then full reservation of the new ones.
    pub async fn update_order(
        &self,
        order_id: OrderId,
        customer: impl Into<String>,
        warehouse_id: WarehouseId,
        items: Vec<OrderItem>,
    ) -> Result<OrderSnapshot, EngineError> {
        let occurred_at = Utc::now();
        let command = OrderCommand::UpdateOrder(UpdateOrder {
            order_id,
            customer: customer.into(),
            warehouse_id,
            items,
            occurred_at,
        });
        self.execute(command, occurred_at).await
    }

    pub async fn complete_order(&self, order_id: OrderId) -> Result<OrderSnapshot, EngineError> {
        let occurred_at = Utc::now();
        let command = OrderCommand::CompleteOrder(CompleteOrder {
            order_id,
            occurred_at,
        });
        self.execute(command, occurred_at).await
    }

    pub async fn cancel_order(&self, order_id: OrderId) -> Result<OrderSnapshot, EngineError> {
        let occurred_at = Utc::now();
        let command = OrderCommand::CancelOrder(CancelOrder {
            order_id,
            occurred_at,
        });
        self.execute(command, occurred_at).await
    }

    pub async fn resume_order(&self, order_id: OrderId) -> Result<OrderSnapshot, EngineError> {
        let occurred_at = Utc::now();
        let command = OrderCommand::ResumeOrder(ResumeOrder {
            order_id,
            occurred_at,
        });
        self.execute(command, occurred_at).await
    }

    #[instrument(
        skip_all,
        fields(operation = %command.operation(), order_id = %command.order_id())
    )]
    async fn execute(
        &self,
        command: OrderCommand,
        occurred_at: DateTime<Utc>,
    ) -> Result<OrderSnapshot, EngineError> {
        let operation = command.operation();
        let order_id = command.order_id();

        // 1) Load
        let mut order = match self.store.load_order(order_id).await? {
            Some(snapshot) => Order::from_snapshot(snapshot),
            None => Order::empty(order_id),
        };
        let expected = ExpectedVersion::Exact(order.version());

        // 2) Decide (no mutation)
        let events = order
            .handle(&command)
            .map_err(|e| EngineError::from_order(operation, order_id, e))?;

        // 3) Evolve the working copy, collect stock effects
        let movements: Vec<NewMovement> = events.iter().flat_map(OrderEvent::stock_effects).collect();
        for event in &events {
            tracing::debug!(event_type = event.event_type(), "applying event");
            order.apply(event);
        }
        let snapshot = order.snapshot().ok_or_else(|| {
            EngineError::Store(StoreError::Corrupt(format!(
                "order {order_id} has no state after {operation}"
            )))
        })?;

        // 4) Preflight
        if !movements.is_empty() {
            let mut keys: Vec<StockKey> = movements.iter().map(|m| m.key).collect();
            keys.sort();
            keys.dedup();
            let levels = self.store.stock_levels(&keys).await?;
            check_sufficiency(movements.iter().map(|m| (m.key, m.delta)), &levels)
                .map_err(|short| EngineError::insufficient(operation, order_id, short))?;
        }

        // 5) Commit atomically
        let committed = self
            .store
            .apply_transition(OrderTransition {
                order: snapshot,
                expected_version: expected,
                movements,
                occurred_at,
            })
            .await
            .map_err(|e| EngineError::from_store(operation, order_id, e))?;

        Ok(committed.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_shortfall_keeps_operation_context() {
        let order_id = OrderId::new();
        let key = StockKey::new(ProductId::new(), WarehouseId::new());
        let err = EngineError::from_store(
            OrderOperation::Resume,
            order_id,
            StoreError::InsufficientStock(InsufficientStock {
                key,
                requested: 10,
                available: 3,
            }),
        );
        match err {
            EngineError::InsufficientStock {
                operation,
                order_id: id,
                product_id,
                requested,
                available,
                ..
            } => {
                assert_eq!(operation, OrderOperation::Resume);
                assert_eq!(id, order_id);
                assert_eq!(product_id, key.product_id);
                assert_eq!((requested, available), (10, 3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn concurrency_is_retryable_and_store_failures_are_not() {
        let conflict = EngineError::from(StoreError::Concurrency("stale".into()));
        assert!(conflict.is_retryable());
        let backend = EngineError::from(StoreError::Backend("down".into()));
        assert!(!backend.is_retryable());
    }

    #[test]
    fn domain_not_found_names_the_order() {
        let order_id = OrderId::new();
        let err = EngineError::from_order(
            OrderOperation::Cancel,
            order_id,
            OrderError::Domain(DomainError::NotFound),
        );
        assert_eq!(err.to_string(), format!("order {order_id} not found"));
    }
}
