use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, MovementId, ProductId, WarehouseId};

use crate::stock::StockKey;

/// A ledger entry that has not been written yet (no id, no timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub key: StockKey,
    /// Signed change: positive adds stock, negative removes it.
    pub delta: i64,
    pub reason: String,
}

impl NewMovement {
    pub fn new(key: StockKey, delta: i64, reason: impl Into<String>) -> Self {
        Self {
            key,
            delta,
            reason: reason.into(),
        }
    }

    /// Stamp the entry with its identity and creation time.
    pub fn record(self, id: MovementId, created_at: DateTime<Utc>) -> Movement {
        Movement {
            id,
            product_id: self.key.product_id,
            warehouse_id: self.key.warehouse_id,
            delta: self.delta,
            reason: self.reason,
            created_at,
        }
    }
}

/// An immutable, written ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub delta: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }
}

/// Sum of deltas recorded for `key`; replaying the ledger onto the initial
/// balance yields the current balance.
pub fn net_delta<'a>(movements: impl IntoIterator<Item = &'a Movement>, key: StockKey) -> i64 {
    movements
        .into_iter()
        .filter(|m| m.key() == key)
        .map(|m| m.delta)
        .sum()
}

/// Result ordering for ledger queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Oldest,
    Newest,
}

/// Filter criteria for ledger queries. All criteria are optional; the time
/// range is inclusive on both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order: SortOrder,
}

impl MovementFilter {
    pub fn validate(&self) -> DomainResult<()> {
        if let (Some(from), Some(to)) = (self.created_from, self.created_to) {
            if from > to {
                return Err(DomainError::validation(
                    "created_to must be on or after created_from",
                ));
            }
        }
        Ok(())
    }

    pub fn matches(&self, m: &Movement) -> bool {
        self.product_id.is_none_or(|p| p == m.product_id)
            && self.warehouse_id.is_none_or(|w| w == m.warehouse_id)
            && self.created_from.is_none_or(|from| m.created_at >= from)
            && self.created_to.is_none_or(|to| m.created_at <= to)
    }

    /// Sort in the requested order; ties on timestamp fall back to id.
    pub fn sort(&self, movements: &mut [Movement]) {
        movements.sort_by(|a, b| {
            let ord = a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id));
            match self.order {
                SortOrder::Oldest => ord,
                SortOrder::Newest => ord.reverse(),
            }
        });
    }
}
