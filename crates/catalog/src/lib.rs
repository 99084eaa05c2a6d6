//! Catalog reference data (products, warehouses).
//!
//! Read-only from the order engine's point of view: orders reference these by
//! id, stock is keyed by their pairing.

pub mod product;
pub mod warehouse;

pub use product::Product;
pub use warehouse::Warehouse;
