use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use stockflow_core::{ExpectedVersion, OrderId};
use stockflow_inventory::{AdjustError, InsufficientStock, Movement, NewMovement, StockKey};
use stockflow_orders::OrderSnapshot;

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) plus the one
/// business failure a store can observe on its own: a balance that would go
/// negative when the adjustment is actually applied.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error(transparent)]
    InsufficientStock(#[from] InsufficientStock),

    /// A balance would leave the representable range.
    #[error("stock out of range: {0}")]
    OutOfRange(String),

    /// Seeding a balance that already exists.
    #[error("stock balance already exists: {0}")]
    AlreadyExists(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl From<AdjustError> for StoreError {
    fn from(value: AdjustError) -> Self {
        match value {
            AdjustError::Insufficient(short) => StoreError::InsufficientStock(short),
            overflow @ AdjustError::Overflow { .. } => StoreError::OutOfRange(overflow.to_string()),
        }
    }
}

/// Everything one lifecycle transition writes, committed as a unit.
///
/// `movements` are applied in order: each one adjusts its balance through the
/// conditional primitive and is then appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTransition {
    /// Order state after the transition (version already bumped).
    pub order: OrderSnapshot,
    /// Version the stored order must have for the write to go through.
    pub expected_version: ExpectedVersion,
    pub movements: Vec<NewMovement>,
    /// Timestamp stamped on every ledger entry of this transition.
    pub occurred_at: DateTime<Utc>,
}

/// Result of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransition {
    pub order: OrderSnapshot,
    pub movements: Vec<Movement>,
}

/// Order + stock store used by the lifecycle engine.
///
/// ## Atomicity
///
/// `apply_transition()` must:
/// - check `expected_version` against the stored order (`Exact(0)`: must not exist)
/// - adjust every balance with a compare-and-apply (`quantity + delta >= 0`)
/// - append one ledger entry per adjustment
/// - write the order header and items
///
/// all in one unit of work. Any failure leaves balances, ledger and order
/// untouched.
#[async_trait::async_trait]
pub trait InventoryStore: Send + Sync {
    /// Fetch an order by id (`None` if it was never created).
    async fn load_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>, StoreError>;

    /// Current quantities for `keys`. Keys without a stored balance are omitted.
    async fn stock_levels(&self, keys: &[StockKey]) -> Result<HashMap<StockKey, i64>, StoreError>;

    /// Apply a transition atomically.
    async fn apply_transition(
        &self,
        transition: OrderTransition,
    ) -> Result<CommittedTransition, StoreError>;
}

#[async_trait::async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn load_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>, StoreError> {
        (**self).load_order(order_id).await
    }

    async fn stock_levels(&self, keys: &[StockKey]) -> Result<HashMap<StockKey, i64>, StoreError> {
        (**self).stock_levels(keys).await
    }

    async fn apply_transition(
        &self,
        transition: OrderTransition,
    ) -> Result<CommittedTransition, StoreError> {
        (**self).apply_transition(transition).await
    }
}
