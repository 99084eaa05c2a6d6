use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::{
    Aggregate, AggregateRoot, DomainError, Event, OrderId, ProductId, ValueObject, WarehouseId,
};
use stockflow_inventory::{NewMovement, StockKey};

pub const MAX_CUSTOMER_LEN: usize = 255;
pub const MAX_LINE_QUANTITY: i64 = 10_000;

/// Order status lifecycle. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Completed,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::Completed => "completed",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(OrderStatus::Active),
            "completed" => Ok(OrderStatus::Completed),
            "canceled" => Ok(OrderStatus::Canceled),
            other => Err(DomainError::validation(format!(
                "unknown order status '{other}' (expected active, completed or canceled)"
            ))),
        }
    }
}

/// Lifecycle operations, as named in transition errors and movement reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderOperation {
    Create,
    Update,
    Complete,
    Cancel,
    Resume,
}

impl core::fmt::Display for OrderOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            OrderOperation::Create => "create",
            OrderOperation::Update => "update",
            OrderOperation::Complete => "complete",
            OrderOperation::Cancel => "cancel",
            OrderOperation::Resume => "resume",
        })
    }
}

/// Order line: product and requested quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl OrderItem {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

impl ValueObject for OrderItem {}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("cannot {operation} an order that is {status}")]
    InvalidTransition {
        operation: OrderOperation,
        status: OrderStatus,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Persisted / transported shape of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: OrderId,
    pub customer: String,
    pub warehouse_id: WarehouseId,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    customer: String,
    warehouse_id: Option<WarehouseId>,
    status: OrderStatus,
    items: Vec<OrderItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            customer: String::new(),
            warehouse_id: None,
            status: OrderStatus::Active,
            items: Vec::new(),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            completed_at: None,
            version: 0,
            created: false,
        }
    }

    /// Restore a previously persisted order.
    pub fn from_snapshot(snapshot: OrderSnapshot) -> Self {
        Self {
            id: snapshot.id,
            customer: snapshot.customer,
            warehouse_id: Some(snapshot.warehouse_id),
            status: snapshot.status,
            items: snapshot.items,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            completed_at: snapshot.completed_at,
            version: snapshot.version,
            created: true,
        }
    }

    /// Returns `None` for an order that has not been created.
    pub fn snapshot(&self) -> Option<OrderSnapshot> {
        let warehouse_id = self.warehouse_id.filter(|_| self.created)?;
        Some(OrderSnapshot {
            id: self.id,
            customer: self.customer.clone(),
            warehouse_id,
            status: self.status,
            items: self.items.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            version: self.version,
        })
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Items currently holding stock (empty unless Active).
    pub fn reserved_items(&self) -> &[OrderItem] {
        match self.status {
            OrderStatus::Active => &self.items,
            OrderStatus::Completed | OrderStatus::Canceled => &[],
        }
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub customer: String,
    pub warehouse_id: WarehouseId,
    pub items: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateOrder (full replacement of customer and items).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOrder {
    pub order_id: OrderId,
    pub customer: String,
    pub warehouse_id: WarehouseId,
    pub items: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResumeOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    CreateOrder(CreateOrder),
    UpdateOrder(UpdateOrder),
    CompleteOrder(CompleteOrder),
    CancelOrder(CancelOrder),
    ResumeOrder(ResumeOrder),
}

impl OrderCommand {
    pub fn operation(&self) -> OrderOperation {
        match self {
            OrderCommand::CreateOrder(_) => OrderOperation::Create,
            OrderCommand::UpdateOrder(_) => OrderOperation::Update,
            OrderCommand::CompleteOrder(_) => OrderOperation::Complete,
            OrderCommand::CancelOrder(_) => OrderOperation::Cancel,
            OrderCommand::ResumeOrder(_) => OrderOperation::Resume,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            OrderCommand::CreateOrder(c) => c.order_id,
            OrderCommand::UpdateOrder(c) => c.order_id,
            OrderCommand::CompleteOrder(c) => c.order_id,
            OrderCommand::CancelOrder(c) => c.order_id,
            OrderCommand::ResumeOrder(c) => c.order_id,
        }
    }
}

/// Event: OrderCreated (stock reserved for every item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub customer: String,
    pub warehouse_id: WarehouseId,
    pub items: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderUpdated (old reservation released, new one taken).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdated {
    pub order_id: OrderId,
    pub customer: String,
    pub warehouse_id: WarehouseId,
    pub released: Vec<OrderItem>,
    pub items: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCanceled (reservation released).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCanceled {
    pub order_id: OrderId,
    pub warehouse_id: WarehouseId,
    pub released: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderResumed (reservation taken again).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResumed {
    pub order_id: OrderId,
    pub warehouse_id: WarehouseId,
    pub reserved: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    OrderUpdated(OrderUpdated),
    OrderCompleted(OrderCompleted),
    OrderCanceled(OrderCanceled),
    OrderResumed(OrderResumed),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "orders.order.created",
            OrderEvent::OrderUpdated(_) => "orders.order.updated",
            OrderEvent::OrderCompleted(_) => "orders.order.completed",
            OrderEvent::OrderCanceled(_) => "orders.order.canceled",
            OrderEvent::OrderResumed(_) => "orders.order.resumed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::OrderUpdated(e) => e.occurred_at,
            OrderEvent::OrderCompleted(e) => e.occurred_at,
            OrderEvent::OrderCanceled(e) => e.occurred_at,
            OrderEvent::OrderResumed(e) => e.occurred_at,
        }
    }
}

impl OrderEvent {
    /// Ledger entries (and therefore balance deltas) this event implies, one
    /// per affected line, in application order. Releases precede reservations.
    pub fn stock_effects(&self) -> Vec<NewMovement> {
        fn lines(
            items: &[OrderItem],
            warehouse_id: WarehouseId,
            sign: i64,
            reason: &str,
        ) -> impl Iterator<Item = NewMovement> {
            items.iter().map(move |item| {
                NewMovement::new(
                    StockKey::new(item.product_id, warehouse_id),
                    sign * item.quantity,
                    reason,
                )
            })
        }

        match self {
            OrderEvent::OrderCreated(e) => {
                let reason = format!("create order #{}", e.order_id);
                lines(&e.items, e.warehouse_id, -1, &reason).collect()
            }
            OrderEvent::OrderUpdated(e) => {
                let release = format!("update order #{}: release", e.order_id);
                let reserve = format!("update order #{}: reserve", e.order_id);
                lines(&e.released, e.warehouse_id, 1, &release)
                    .chain(lines(&e.items, e.warehouse_id, -1, &reserve))
                    .collect()
            }
            OrderEvent::OrderCompleted(_) => Vec::new(),
            OrderEvent::OrderCanceled(e) => {
                let reason = format!("cancel order #{}", e.order_id);
                lines(&e.released, e.warehouse_id, 1, &reason).collect()
            }
            OrderEvent::OrderResumed(e) => {
                let reason = format!("resume order #{}", e.order_id);
                lines(&e.reserved, e.warehouse_id, -1, &reason).collect()
            }
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = OrderError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.customer = e.customer.clone();
                self.warehouse_id = Some(e.warehouse_id);
                self.status = OrderStatus::Active;
                self.items = e.items.clone();
                self.created_at = e.occurred_at;
                self.updated_at = e.occurred_at;
                self.completed_at = None;
                self.created = true;
            }
            OrderEvent::OrderUpdated(e) => {
                self.customer = e.customer.clone();
                self.items = e.items.clone();
                self.updated_at = e.occurred_at;
            }
            OrderEvent::OrderCompleted(e) => {
                self.status = OrderStatus::Completed;
                self.completed_at = Some(e.occurred_at);
                self.updated_at = e.occurred_at;
            }
            OrderEvent::OrderCanceled(e) => {
                self.status = OrderStatus::Canceled;
                self.updated_at = e.occurred_at;
            }
            OrderEvent::OrderResumed(e) => {
                self.status = OrderStatus::Active;
                self.updated_at = e.occurred_at;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            OrderCommand::UpdateOrder(cmd) => self.handle_update(cmd),
            OrderCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            OrderCommand::ResumeOrder(cmd) => self.handle_resume(cmd),
        }
    }
}

fn validate_customer(customer: &str) -> Result<(), DomainError> {
    if customer.trim().is_empty() {
        return Err(DomainError::validation("customer cannot be empty"));
    }
    if customer.chars().count() > MAX_CUSTOMER_LEN {
        return Err(DomainError::validation(format!(
            "customer cannot exceed {MAX_CUSTOMER_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_items(items: &[OrderItem]) -> Result<(), DomainError> {
    if items.is_empty() {
        return Err(DomainError::validation("order must have at least one item"));
    }
    for (idx, item) in items.iter().enumerate() {
        if item.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "item {idx}: quantity must be positive"
            )));
        }
        if item.quantity > MAX_LINE_QUANTITY {
            return Err(DomainError::validation(format!(
                "item {idx}: quantity cannot exceed {MAX_LINE_QUANTITY}"
            )));
        }
    }
    Ok(())
}

impl Order {
    fn ensure_created(&self) -> Result<WarehouseId, OrderError> {
        match self.warehouse_id {
            Some(w) if self.created => Ok(w),
            _ => Err(DomainError::not_found().into()),
        }
    }

    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), OrderError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch").into());
        }
        Ok(())
    }

    fn ensure_status(&self, operation: OrderOperation, expected: OrderStatus) -> Result<(), OrderError> {
        if self.status != expected {
            return Err(OrderError::InvalidTransition {
                operation,
                status: self.status,
            });
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, OrderError> {
        if self.created {
            return Err(DomainError::conflict("order already exists").into());
        }
        self.ensure_order_id(cmd.order_id)?;
        validate_customer(&cmd.customer)?;
        validate_items(&cmd.items)?;

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            customer: cmd.customer.clone(),
            warehouse_id: cmd.warehouse_id,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateOrder) -> Result<Vec<OrderEvent>, OrderError> {
        let warehouse_id = self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_status(OrderOperation::Update, OrderStatus::Active)?;

        if cmd.warehouse_id != warehouse_id {
            return Err(DomainError::validation("an order cannot move to a different warehouse").into());
        }
        validate_customer(&cmd.customer)?;
        validate_items(&cmd.items)?;

        Ok(vec![OrderEvent::OrderUpdated(OrderUpdated {
            order_id: cmd.order_id,
            customer: cmd.customer.clone(),
            warehouse_id,
            released: self.items.clone(),
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteOrder) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_status(OrderOperation::Complete, OrderStatus::Active)?;

        Ok(vec![OrderEvent::OrderCompleted(OrderCompleted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, OrderError> {
        let warehouse_id = self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_status(OrderOperation::Cancel, OrderStatus::Active)?;

        Ok(vec![OrderEvent::OrderCanceled(OrderCanceled {
            order_id: cmd.order_id,
            warehouse_id,
            released: self.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resume(&self, cmd: &ResumeOrder) -> Result<Vec<OrderEvent>, OrderError> {
        let warehouse_id = self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_status(OrderOperation::Resume, OrderStatus::Canceled)?;

        Ok(vec![OrderEvent::OrderResumed(OrderResumed {
            order_id: cmd.order_id,
            warehouse_id,
            reserved: self.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_order(items: Vec<OrderItem>) -> (Order, WarehouseId) {
        let order_id = OrderId::new();
        let warehouse_id = WarehouseId::new();
        let mut order = Order::empty(order_id);
        let events = order
            .handle(&OrderCommand::CreateOrder(CreateOrder {
                order_id,
                customer: "ACME".to_string(),
                warehouse_id,
                items,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            order.apply(e);
        }
        (order, warehouse_id)
    }

    fn run(order: &mut Order, cmd: OrderCommand) -> Result<Vec<OrderEvent>, OrderError> {
        let events = order.handle(&cmd)?;
        for e in &events {
            order.apply(e);
        }
        Ok(events)
    }

    fn cancel(order_id: OrderId) -> OrderCommand {
        OrderCommand::CancelOrder(CancelOrder {
            order_id,
            occurred_at: test_time(),
        })
    }

    fn complete(order_id: OrderId) -> OrderCommand {
        OrderCommand::CompleteOrder(CompleteOrder {
            order_id,
            occurred_at: test_time(),
        })
    }

    fn resume(order_id: OrderId) -> OrderCommand {
        OrderCommand::ResumeOrder(ResumeOrder {
            order_id,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_emits_one_reservation_per_item() {
        let p1 = ProductId::new();
        let p2 = ProductId::new();
        let (order, warehouse_id) =
            created_order(vec![OrderItem::new(p1, 10), OrderItem::new(p2, 3)]);
        assert_eq!(order.status(), OrderStatus::Active);
        assert_eq!(order.version(), 1);

        let snapshot = order.snapshot().unwrap();
        let created = OrderEvent::OrderCreated(OrderCreated {
            order_id: snapshot.id,
            customer: snapshot.customer.clone(),
            warehouse_id,
            items: snapshot.items.clone(),
            occurred_at: snapshot.created_at,
        });
        let effects = created.stock_effects();
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].key, StockKey::new(p1, warehouse_id));
        assert_eq!(effects[0].delta, -10);
        assert_eq!(effects[1].delta, -3);
        assert!(effects[0].reason.starts_with("create order #"));
    }

    #[test]
    fn create_rejects_empty_items_and_non_positive_quantity() {
        let order_id = OrderId::new();
        let order = Order::empty(order_id);
        let base = CreateOrder {
            order_id,
            customer: "ACME".to_string(),
            warehouse_id: WarehouseId::new(),
            items: vec![],
            occurred_at: test_time(),
        };

        let err = order
            .handle(&OrderCommand::CreateOrder(base.clone()))
            .unwrap_err();
        assert!(matches!(err, OrderError::Domain(DomainError::Validation(_))));

        let zero = CreateOrder {
            items: vec![OrderItem::new(ProductId::new(), 0)],
            ..base.clone()
        };
        let err = order.handle(&OrderCommand::CreateOrder(zero)).unwrap_err();
        assert!(matches!(err, OrderError::Domain(DomainError::Validation(_))));

        let too_many = CreateOrder {
            items: vec![OrderItem::new(ProductId::new(), MAX_LINE_QUANTITY + 1)],
            ..base.clone()
        };
        assert!(order.handle(&OrderCommand::CreateOrder(too_many)).is_err());

        let blank_customer = CreateOrder {
            customer: "  ".to_string(),
            items: vec![OrderItem::new(ProductId::new(), 1)],
            ..base
        };
        assert!(order.handle(&OrderCommand::CreateOrder(blank_customer)).is_err());
    }

    #[test]
    fn create_twice_is_a_conflict() {
        let (order, warehouse_id) = created_order(vec![OrderItem::new(ProductId::new(), 1)]);
        let err = order
            .handle(&OrderCommand::CreateOrder(CreateOrder {
                order_id: order.id_typed(),
                customer: "ACME".to_string(),
                warehouse_id,
                items: vec![OrderItem::new(ProductId::new(), 1)],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, OrderError::Domain(DomainError::Conflict(_))));
    }

    #[test]
    fn update_releases_old_items_before_reserving_new_ones() {
        let p = ProductId::new();
        let (mut order, warehouse_id) = created_order(vec![OrderItem::new(p, 10)]);
        let order_id = order.id_typed();

        let events = run(
            &mut order,
            OrderCommand::UpdateOrder(UpdateOrder {
                order_id,
                customer: "ACME Ltd".to_string(),
                warehouse_id,
                items: vec![OrderItem::new(p, 15)],
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let effects = events[0].stock_effects();
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0].delta, 10);
        assert!(effects[0].reason.ends_with("release"));
        assert_eq!(effects[1].delta, -15);
        assert!(effects[1].reason.ends_with("reserve"));

        assert_eq!(order.customer(), "ACME Ltd");
        assert_eq!(order.items(), &[OrderItem::new(p, 15)]);
        assert_eq!(order.version(), 2);
    }

    #[test]
    fn update_cannot_move_warehouses() {
        let (order, _) = created_order(vec![OrderItem::new(ProductId::new(), 1)]);
        let err = order
            .handle(&OrderCommand::UpdateOrder(UpdateOrder {
                order_id: order.id_typed(),
                customer: "ACME".to_string(),
                warehouse_id: WarehouseId::new(),
                items: vec![OrderItem::new(ProductId::new(), 1)],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, OrderError::Domain(DomainError::Validation(_))));
    }

    #[test]
    fn complete_is_terminal_and_has_no_stock_effect() {
        let (mut order, _) = created_order(vec![OrderItem::new(ProductId::new(), 4)]);
        let order_id = order.id_typed();

        let events = run(&mut order, complete(order_id)).unwrap();
        assert!(events[0].stock_effects().is_empty());
        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(order.completed_at().is_some());
        assert!(order.status().is_terminal());
        assert!(order.reserved_items().is_empty());

        for cmd in [complete(order_id), cancel(order_id), resume(order_id)] {
            let err = order.handle(&cmd).unwrap_err();
            assert!(
                matches!(err, OrderError::InvalidTransition { status: OrderStatus::Completed, .. }),
                "{cmd:?} should be rejected"
            );
        }
    }

    #[test]
    fn cancel_releases_and_resume_reserves_the_same_items() {
        let p = ProductId::new();
        let (mut order, warehouse_id) = created_order(vec![OrderItem::new(p, 10)]);
        let order_id = order.id_typed();

        let canceled = run(&mut order, cancel(order_id)).unwrap();
        let released = canceled[0].stock_effects();
        assert_eq!(released[0].key, StockKey::new(p, warehouse_id));
        assert_eq!(released[0].delta, 10);
        assert!(released[0].reason.contains("cancel"));
        assert_eq!(order.status(), OrderStatus::Canceled);

        let resumed = run(&mut order, resume(order_id)).unwrap();
        let reserved = resumed[0].stock_effects();
        assert_eq!(reserved[0].delta, -10);
        assert_eq!(order.status(), OrderStatus::Active);
        assert_eq!(order.version(), 3);
    }

    #[test]
    fn canceled_order_rejects_everything_but_resume() {
        let (mut order, warehouse_id) = created_order(vec![OrderItem::new(ProductId::new(), 1)]);
        let order_id = order.id_typed();
        run(&mut order, cancel(order_id)).unwrap();

        let update = OrderCommand::UpdateOrder(UpdateOrder {
            order_id,
            customer: "ACME".to_string(),
            warehouse_id,
            items: vec![OrderItem::new(ProductId::new(), 1)],
            occurred_at: test_time(),
        });
        for cmd in [complete(order_id), cancel(order_id), update] {
            let err = order.handle(&cmd).unwrap_err();
            assert_eq!(
                err,
                OrderError::InvalidTransition {
                    operation: cmd.operation(),
                    status: OrderStatus::Canceled,
                }
            );
        }
    }

    #[test]
    fn active_order_cannot_be_resumed() {
        let (order, _) = created_order(vec![OrderItem::new(ProductId::new(), 1)]);
        let err = order.handle(&resume(order.id_typed())).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { operation: OrderOperation::Resume, .. }));
    }

    #[test]
    fn transitions_on_missing_order_are_not_found() {
        let order_id = OrderId::new();
        let order = Order::empty(order_id);
        let err = order.handle(&cancel(order_id)).unwrap_err();
        assert_eq!(err, OrderError::Domain(DomainError::NotFound));
        assert!(order.snapshot().is_none());
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (order, _) = created_order(vec![OrderItem::new(ProductId::new(), 2)]);
        let before = order.clone();
        let e1 = order.handle(&cancel(order.id_typed())).unwrap();
        let e2 = order.handle(&cancel(order.id_typed())).unwrap();
        assert_eq!(order, before);
        assert_eq!(e1, e2);
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let (order, _) = created_order(vec![OrderItem::new(ProductId::new(), 2)]);
        let restored = Order::from_snapshot(order.snapshot().unwrap());
        assert_eq!(restored, order);
    }

    #[test]
    fn status_parses_from_lowercase_names() {
        assert_eq!("canceled".parse::<OrderStatus>().unwrap(), OrderStatus::Canceled);
        assert!("cancelled".parse::<OrderStatus>().is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn net_stock_effect_always_equals_current_reservation(
                quantity in 1i64..50,
                ops in prop::collection::vec((0u8..4, 0usize..2, 1i64..50), 1..30),
            ) {
                let products = [ProductId::new(), ProductId::new()];
                let (mut order, warehouse_id) = created_order(vec![OrderItem::new(products[0], quantity)]);
                let order_id = order.id_typed();
                let mut net = -quantity;

                for (code, product, qty) in ops {
                    let cmd = match code {
                        0 => OrderCommand::UpdateOrder(UpdateOrder {
                            order_id,
                            customer: "ACME".to_string(),
                            warehouse_id,
                            items: vec![OrderItem::new(products[product], qty)],
                            occurred_at: test_time(),
                        }),
                        1 => complete(order_id),
                        2 => cancel(order_id),
                        _ => resume(order_id),
                    };
                    if let Ok(events) = order.handle(&cmd) {
                        for e in &events {
                            net += e.stock_effects().iter().map(|m| m.delta).sum::<i64>();
                            order.apply(e);
                        }
                    }
                    let reserved: i64 = order.reserved_items().iter().map(|i| i.quantity).sum();
                    prop_assert_eq!(net, -reserved);
                }
            }
        }
    }
}
