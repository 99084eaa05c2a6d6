//! Inventory domain module: stock balances and the movement ledger.
//!
//! This crate contains business rules for stock, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). Stores call
//! [`StockBalance::try_adjust`] as their compare-and-apply primitive.

pub mod movement;
pub mod stock;

pub use movement::{Movement, MovementFilter, NewMovement, SortOrder, net_delta};
pub use stock::{AdjustError, InsufficientStock, StockBalance, StockKey, check_sufficiency};
