use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::{DomainError, DomainResult, ProductId, ValueObject, WarehouseId};

/// Composite key of a stock balance: one product in one warehouse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }
}

impl ValueObject for StockKey {}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)
    }
}

/// Not enough stock on hand to remove `requested` units from `key`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "insufficient stock for product {} in warehouse {}: requested {requested}, available {available}",
    key.product_id,
    key.warehouse_id
)]
pub struct InsufficientStock {
    pub key: StockKey,
    pub requested: i64,
    pub available: i64,
}

impl InsufficientStock {
    pub fn shortfall(&self) -> i64 {
        self.requested - self.available
    }
}

/// Why [`StockBalance::try_adjust`] refused a delta.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdjustError {
    #[error(transparent)]
    Insufficient(#[from] InsufficientStock),

    #[error(
        "stock for product {} in warehouse {} out of range: {quantity} + {delta}",
        key.product_id,
        key.warehouse_id
    )]
    Overflow {
        key: StockKey,
        quantity: i64,
        delta: i64,
    },
}

/// Quantity on hand for one [`StockKey`]. Never negative.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    key: StockKey,
    quantity: i64,
}

impl StockBalance {
    /// Balance of a key that has no stored row yet.
    pub fn empty(key: StockKey) -> Self {
        Self { key, quantity: 0 }
    }

    pub fn new(key: StockKey, quantity: i64) -> DomainResult<Self> {
        if quantity < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }
        Ok(Self { key, quantity })
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Compare-and-apply: returns the adjusted balance, or the shortfall if the
    /// result would be negative. `self` is never modified.
    pub fn try_adjust(&self, delta: i64) -> Result<StockBalance, AdjustError> {
        let next = self.quantity.checked_add(delta).ok_or(AdjustError::Overflow {
            key: self.key,
            quantity: self.quantity,
            delta,
        })?;
        if next < 0 {
            return Err(InsufficientStock {
                key: self.key,
                requested: delta.saturating_neg(),
                available: self.quantity,
            }
            .into());
        }
        Ok(StockBalance {
            key: self.key,
            quantity: next,
        })
    }
}

/// Preflight: check that a batch of signed deltas can be applied against the
/// given levels without any balance going negative.
///
/// Deltas are netted per key, so units released earlier in the batch count as
/// available to requests for the same key later in the batch. Keys missing from
/// `levels` are treated as empty. The first short key (in batch order) is
/// reported.
pub fn check_sufficiency<I>(deltas: I, levels: &HashMap<StockKey, i64>) -> Result<(), InsufficientStock>
where
    I: IntoIterator<Item = (StockKey, i64)>,
{
    let mut order: Vec<StockKey> = Vec::new();
    // key -> (released, requested)
    let mut totals: HashMap<StockKey, (i64, i64)> = HashMap::new();

    for (key, delta) in deltas {
        let entry = totals.entry(key).or_insert_with(|| {
            order.push(key);
            (0, 0)
        });
        if delta >= 0 {
            entry.0 = entry.0.saturating_add(delta);
        } else {
            entry.1 = entry.1.saturating_sub(delta);
        }
    }

    for key in order {
        let (released, requested) = totals[&key];
        if requested == 0 {
            continue;
        }
        let available = levels.get(&key).copied().unwrap_or(0).saturating_add(released);
        if requested > available {
            return Err(InsufficientStock {
                key,
                requested,
                available,
            });
        }
    }

    Ok(())
}
