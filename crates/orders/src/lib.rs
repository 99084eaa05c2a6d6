//! Orders domain module.
//!
//! This crate contains the order state machine, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). Stock side effects
//! are described by [`OrderEvent::stock_effects`] and applied by the engine.

pub mod order;

pub use order::{
    CancelOrder, CompleteOrder, CreateOrder, MAX_CUSTOMER_LEN, MAX_LINE_QUANTITY, Order,
    OrderCanceled, OrderCommand, OrderCompleted, OrderCreated, OrderError, OrderEvent, OrderItem,
    OrderOperation, OrderResumed, OrderSnapshot, OrderStatus, OrderUpdated, ResumeOrder,
    UpdateOrder,
};
