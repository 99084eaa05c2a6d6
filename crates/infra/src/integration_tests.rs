//! Integration tests for the full lifecycle pipeline.
//!
//! Tests: Engine → InventoryStore (in-memory) → balances + ledger + order
//!
//! Verifies:
//! - Stock effects of every transition, including the worked scenarios
//! - Failed transitions leave no trace (balances, ledger, order)
//! - Illegal transitions are rejected with the current status
//! - Concurrent reservations never drive a balance negative
//!
//! The `postgres` module runs the same kind of checks against a real database
//! when `DATABASE_URL` is set, and skips otherwise.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    use stockflow_catalog::{Product, Warehouse};
    use stockflow_core::{OrderId, ProductId, WarehouseId};
    use stockflow_inventory::{MovementFilter, SortOrder, StockKey, net_delta};
    use stockflow_orders::{OrderItem, OrderOperation, OrderSnapshot, OrderStatus};

    use crate::engine::{EngineError, OrderLifecycleEngine};
    use crate::store::{InMemoryInventoryStore, InventoryQuery, OrderFilter, Pagination};

    type Engine = OrderLifecycleEngine<Arc<InMemoryInventoryStore>>;

    struct Fixture {
        engine: Engine,
        store: Arc<InMemoryInventoryStore>,
        warehouse_id: WarehouseId,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryInventoryStore::new());
            let warehouse_id = WarehouseId::new();
            store
                .insert_warehouse(Warehouse::new(warehouse_id, "Main").unwrap())
                .unwrap();
            Self {
                engine: OrderLifecycleEngine::new(store.clone()),
                store,
                warehouse_id,
            }
        }

        fn product(&self, name: &str, quantity: i64) -> ProductId {
            let product_id = ProductId::new();
            self.store
                .insert_product(Product::new(product_id, name, 100).unwrap())
                .unwrap();
            self.store.set_stock(self.key(product_id), quantity).unwrap();
            product_id
        }

        fn key(&self, product_id: ProductId) -> StockKey {
            StockKey::new(product_id, self.warehouse_id)
        }

        fn quantity(&self, product_id: ProductId) -> i64 {
            self.store.quantity(self.key(product_id)).unwrap()
        }

        fn ledger_len(&self) -> usize {
            self.store.movements().unwrap().len()
        }

        async fn create(&self, items: &[(ProductId, i64)]) -> Result<OrderSnapshot, EngineError> {
            self.engine
                .create_order("ACME", self.warehouse_id, lines(items))
                .await
        }

        async fn update(
            &self,
            order_id: OrderId,
            items: &[(ProductId, i64)],
        ) -> Result<OrderSnapshot, EngineError> {
            self.engine
                .update_order(order_id, "ACME", self.warehouse_id, lines(items))
                .await
        }
    }

    fn lines(items: &[(ProductId, i64)]) -> Vec<OrderItem> {
        items.iter().map(|(p, q)| OrderItem::new(*p, *q)).collect()
    }

    #[tokio::test]
    async fn scenario_a_create_reserves_stock_and_writes_one_entry() {
        let f = Fixture::new();
        let p = f.product("Widget", 50);

        let order = f.create(&[(p, 10)]).await.unwrap();

        assert_eq!(order.status, OrderStatus::Active);
        assert_eq!(order.version, 1);
        assert_eq!(f.quantity(p), 40);

        let ledger = f.store.movements().unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].delta, -10);
        assert_eq!(ledger[0].key(), f.key(p));
        assert_eq!(ledger[0].reason, format!("create order #{}", order.id));
        assert_eq!(ledger[0].created_at, order.created_at);
    }

    #[tokio::test]
    async fn scenario_b_create_beyond_balance_is_rejected_without_trace() {
        let f = Fixture::new();
        let p = f.product("Widget", 5);

        let err = f.create(&[(p, 10)]).await.unwrap_err();

        match err {
            EngineError::InsufficientStock {
                operation,
                product_id,
                warehouse_id,
                requested,
                available,
                ..
            } => {
                assert_eq!(operation, OrderOperation::Create);
                assert_eq!(product_id, p);
                assert_eq!(warehouse_id, f.warehouse_id);
                assert_eq!((requested, available), (10, 5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.quantity(p), 5);
        assert_eq!(f.ledger_len(), 0);
        let page = f
            .store
            .list_orders(OrderFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn scenario_c_cancel_releases_the_reservation() {
        let f = Fixture::new();
        let p = f.product("Widget", 50);
        let order = f.create(&[(p, 10)]).await.unwrap();
        assert_eq!(f.quantity(p), 40);

        let canceled = f.engine.cancel_order(order.id).await.unwrap();

        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(canceled.items, order.items);
        assert_eq!(f.quantity(p), 50);
        let ledger = f.store.movements().unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[1].delta, 10);
        assert!(ledger[1].reason.contains("cancel"));
    }

    #[tokio::test]
    async fn scenario_d_resume_without_stock_keeps_order_canceled() {
        let f = Fixture::new();
        let p = f.product("Widget", 50);
        let order = f.create(&[(p, 10)]).await.unwrap();
        f.engine.cancel_order(order.id).await.unwrap();
        f.create(&[(p, 47)]).await.unwrap();
        assert_eq!(f.quantity(p), 3);
        let before = f.ledger_len();

        let err = f.engine.resume_order(order.id).await.unwrap_err();

        assert!(matches!(
            err,
            EngineError::InsufficientStock {
                operation: OrderOperation::Resume,
                requested: 10,
                available: 3,
                ..
            }
        ));
        let stored = f.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Canceled);
        assert_eq!(f.quantity(p), 3);
        assert_eq!(f.ledger_len(), before);
    }

    #[tokio::test]
    async fn scenario_e_update_releases_then_reserves() {
        let f = Fixture::new();
        let p = f.product("Widget", 50);
        let order = f.create(&[(p, 10)]).await.unwrap();
        assert_eq!(f.quantity(p), 40);

        let updated = f.update(order.id, &[(p, 15)]).await.unwrap();

        assert_eq!(f.quantity(p), 35);
        assert_eq!(updated.items, vec![OrderItem::new(p, 15)]);
        assert_eq!(updated.version, 2);

        let ledger = f.store.movements().unwrap();
        let update_entries: Vec<_> = ledger.iter().skip(1).collect();
        assert_eq!(update_entries.len(), 2);
        assert_eq!(update_entries[0].delta, 10);
        assert_eq!(update_entries[0].reason, format!("update order #{}: release", order.id));
        assert_eq!(update_entries[1].delta, -15);
        assert_eq!(update_entries[1].reason, format!("update order #{}: reserve", order.id));
    }

    #[tokio::test]
    async fn update_counts_released_units_toward_new_request() {
        // 40 on hand after the reservation: 50 only fits once the old 10 are back.
        let f = Fixture::new();
        let p = f.product("Widget", 50);
        let order = f.create(&[(p, 10)]).await.unwrap();

        f.update(order.id, &[(p, 50)]).await.unwrap();
        assert_eq!(f.quantity(p), 0);

        let err = f.update(order.id, &[(p, 51)]).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientStock {
                requested: 51,
                available: 50,
                ..
            }
        ));
        assert_eq!(f.quantity(p), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn scenario_f_concurrent_creates_never_oversell() {
        let f = Fixture::new();
        let p = f.product("Widget", 40);
        let engine = Arc::new(f.engine.clone());
        let warehouse_id = f.warehouse_id;

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .create_order("ACME", warehouse_id, vec![OrderItem::new(p, 30)])
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(EngineError::InsufficientStock { .. }) | Err(EngineError::ConcurrencyConflict(_)) => {
                    rejected += 1
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!((ok, rejected), (1, 1));
        assert_eq!(f.quantity(p), 10);
        assert_eq!(f.ledger_len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_concurrent_creates_stop_exactly_at_zero() {
        let f = Fixture::new();
        let p = f.product("Widget", 25);
        let engine = Arc::new(f.engine.clone());
        let warehouse_id = f.warehouse_id;

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .create_order("ACME", warehouse_id, vec![OrderItem::new(p, 1)])
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            if task.await.unwrap() {
                ok += 1;
            }
        }

        assert_eq!(ok, 25);
        assert_eq!(f.quantity(p), 0);
    }

    #[tokio::test]
    async fn failing_item_rolls_back_earlier_items() {
        let f = Fixture::new();
        let p1 = f.product("A", 10);
        let p2 = f.product("B", 10);
        let p3 = f.product("C", 2);

        let err = f.create(&[(p1, 5), (p2, 5), (p3, 5)]).await.unwrap_err();

        assert!(matches!(err, EngineError::InsufficientStock { product_id, .. } if product_id == p3));
        assert_eq!((f.quantity(p1), f.quantity(p2), f.quantity(p3)), (10, 10, 2));
        assert_eq!(f.ledger_len(), 0);
    }

    #[tokio::test]
    async fn unknown_stock_key_counts_as_empty() {
        let f = Fixture::new();
        let p = ProductId::new();

        let err = f.create(&[(p, 1)]).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientStock {
                requested: 1,
                available: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn completed_orders_are_terminal() {
        let f = Fixture::new();
        let p = f.product("Widget", 50);
        let order = f.create(&[(p, 10)]).await.unwrap();

        let completed = f.engine.complete_order(order.id).await.unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(f.quantity(p), 40);
        assert_eq!(f.ledger_len(), 1);

        let attempts = [
            f.engine.complete_order(order.id).await,
            f.engine.cancel_order(order.id).await,
            f.engine.resume_order(order.id).await,
            f.update(order.id, &[(p, 1)]).await,
        ];
        for result in attempts {
            assert!(matches!(
                result,
                Err(EngineError::InvalidTransition {
                    status: OrderStatus::Completed,
                    ..
                })
            ));
        }
        assert_eq!(f.quantity(p), 40);
        assert_eq!(f.ledger_len(), 1);
        let stored = f.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn canceled_orders_only_resume() {
        let f = Fixture::new();
        let p = f.product("Widget", 50);
        let order = f.create(&[(p, 10)]).await.unwrap();
        f.engine.cancel_order(order.id).await.unwrap();
        let ledger_before = f.ledger_len();

        for result in [
            f.engine.complete_order(order.id).await,
            f.engine.cancel_order(order.id).await,
            f.update(order.id, &[(p, 1)]).await,
        ] {
            assert!(matches!(
                result,
                Err(EngineError::InvalidTransition {
                    status: OrderStatus::Canceled,
                    ..
                })
            ));
        }
        assert_eq!(f.ledger_len(), ledger_before);

        let resumed = f.engine.resume_order(order.id).await;
        assert!(resumed.is_ok());
        let err = f.engine.resume_order(order.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                operation: OrderOperation::Resume,
                status: OrderStatus::Active,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn create_cancel_resume_round_trip_restores_reservation() {
        let f = Fixture::new();
        let p1 = f.product("A", 50);
        let p2 = f.product("B", 20);
        let order = f.create(&[(p1, 10), (p2, 4), (p1, 3)]).await.unwrap();
        let reserved = (f.quantity(p1), f.quantity(p2));
        assert_eq!(reserved, (37, 16));

        f.engine.cancel_order(order.id).await.unwrap();
        assert_eq!((f.quantity(p1), f.quantity(p2)), (50, 20));

        let resumed = f.engine.resume_order(order.id).await.unwrap();
        assert_eq!(resumed.items, order.items);
        assert_eq!(resumed.status, OrderStatus::Active);
        assert_eq!((f.quantity(p1), f.quantity(p2)), reserved);
        assert_eq!(resumed.version, 3);
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let f = Fixture::new();
        let order_id = OrderId::new();
        let err = f.engine.cancel_order(order_id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "order", .. }));
    }

    #[tokio::test]
    async fn validation_failures_have_no_side_effects() {
        let f = Fixture::new();
        let p = f.product("Widget", 50);

        for items in [vec![], vec![(p, 0)], vec![(p, -3)]] {
            let err = f.create(&items).await.unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{items:?}");
        }
        let err = f
            .engine
            .create_order("   ", f.warehouse_id, vec![OrderItem::new(p, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let order = f.create(&[(p, 5)]).await.unwrap();
        let err = f
            .engine
            .update_order(order.id, "ACME", WarehouseId::new(), vec![OrderItem::new(p, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(f.quantity(p), 45);
        assert_eq!(f.ledger_len(), 1);
    }

    #[tokio::test]
    async fn ledger_query_filters_and_orders() {
        let f = Fixture::new();
        let p1 = f.product("A", 50);
        let p2 = f.product("B", 50);
        let order = f.create(&[(p1, 1), (p2, 2)]).await.unwrap();
        f.engine.cancel_order(order.id).await.unwrap();

        let all = f
            .store
            .query_movements(MovementFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(all.total, 4);

        let only_p1 = f
            .store
            .query_movements(
                MovementFilter {
                    product_id: Some(p1),
                    order: SortOrder::Newest,
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        let deltas: Vec<i64> = only_p1.items.iter().map(|m| m.delta).collect();
        assert_eq!(deltas, vec![1, -1]);

        let future = f
            .store
            .query_movements(
                MovementFilter {
                    created_from: Some(Utc::now() + Duration::hours(1)),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(future.total, 0);
    }

    #[tokio::test]
    async fn order_list_filters_by_status() {
        let f = Fixture::new();
        let p = f.product("Widget", 50);
        let a = f.create(&[(p, 1)]).await.unwrap();
        let b = f.create(&[(p, 1)]).await.unwrap();
        f.engine.cancel_order(a.id).await.unwrap();

        let active = f
            .store
            .list_orders(
                OrderFilter {
                    status: Some(OrderStatus::Active),
                    warehouse_id: None,
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(active.total, 1);
        assert_eq!(active.items[0].id, b.id);
    }

    // Property tests over random operation sequences.

    #[derive(Debug, Clone)]
    enum Op {
        Create(Vec<(usize, i64)>),
        Update(usize, Vec<(usize, i64)>),
        Complete(usize),
        Cancel(usize),
        Resume(usize),
    }

    const PRODUCTS: usize = 3;

    fn items_strategy() -> impl Strategy<Value = Vec<(usize, i64)>> {
        prop::collection::vec((0..PRODUCTS, 1i64..20), 1..4)
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            items_strategy().prop_map(Op::Create),
            (0usize..8, items_strategy()).prop_map(|(o, items)| Op::Update(o, items)),
            (0usize..8).prop_map(Op::Complete),
            (0usize..8).prop_map(Op::Cancel),
            (0usize..8).prop_map(Op::Resume),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn balances_stay_non_negative_and_ledger_explains_them(
            initial in prop::collection::vec(0i64..40, PRODUCTS),
            ops in prop::collection::vec(op_strategy(), 1..25),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let f = Fixture::new();
                let products: Vec<ProductId> = initial
                    .iter()
                    .enumerate()
                    .map(|(i, q)| f.product(&format!("P{i}"), *q))
                    .collect();
                let mut orders: Vec<OrderId> = Vec::new();

                for op in ops {
                    let target = match &op {
                        Op::Create(_) => None,
                        Op::Update(idx, _) | Op::Complete(idx) | Op::Cancel(idx) | Op::Resume(idx) => {
                            orders.get(idx % orders.len().max(1)).copied()
                        }
                    };
                    let to_items = |items: &[(usize, i64)]| -> Vec<(ProductId, i64)> {
                        items.iter().map(|(p, q)| (products[*p], *q)).collect()
                    };
                    match (op, target) {
                        (Op::Create(items), _) => {
                            if let Ok(order) = f.create(&to_items(&items)).await {
                                orders.push(order.id);
                            }
                        }
                        (Op::Update(_, items), Some(id)) => {
                            let _ = f.update(id, &to_items(&items)).await;
                        }
                        (Op::Complete(_), Some(id)) => {
                            let _ = f.engine.complete_order(id).await;
                        }
                        (Op::Cancel(_), Some(id)) => {
                            let _ = f.engine.cancel_order(id).await;
                        }
                        (Op::Resume(_), Some(id)) => {
                            let _ = f.engine.resume_order(id).await;
                        }
                        (_, None) => {}
                    }

                    let ledger = f.store.movements().unwrap();
                    let mut reserved: HashMap<ProductId, i64> = HashMap::new();
                    for id in &orders {
                        let order = f.store.get_order(*id).await.unwrap().unwrap();
                        if order.status == OrderStatus::Active {
                            for item in &order.items {
                                *reserved.entry(item.product_id).or_default() += item.quantity;
                            }
                        }
                    }

                    for (i, p) in products.iter().enumerate() {
                        let current = f.quantity(*p);
                        prop_assert!(current >= 0);
                        prop_assert_eq!(initial[i] + net_delta(&ledger, f.key(*p)), current);
                        prop_assert_eq!(initial[i] - reserved.get(p).copied().unwrap_or(0), current);
                    }
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}

#[cfg(test)]
mod postgres {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::OnceCell;

    use stockflow_catalog::{Product, Warehouse};
    use stockflow_core::{ExpectedVersion, OrderId, ProductId, WarehouseId};
    use stockflow_inventory::{MovementFilter, NewMovement, StockKey};
    use stockflow_orders::{OrderItem, OrderSnapshot, OrderStatus};

    use crate::engine::{EngineError, OrderLifecycleEngine};
    use crate::store::{
        InventoryQuery, InventoryStore, OrderTransition, Pagination, PostgresInventoryStore,
        StoreError,
    };

    static SCHEMA_READY: OnceCell<()> = OnceCell::const_new();

    struct PgFixture {
        engine: OrderLifecycleEngine<Arc<PostgresInventoryStore>>,
        store: Arc<PostgresInventoryStore>,
        warehouse_id: WarehouseId,
    }

    impl PgFixture {
        /// `None` when `DATABASE_URL` is unset.
        async fn connect() -> Option<Self> {
            let Ok(url) = std::env::var("DATABASE_URL") else {
                eprintln!("DATABASE_URL not set, skipping postgres test");
                return None;
            };
            let store = PostgresInventoryStore::connect(&url, 10).await.unwrap();
            SCHEMA_READY
                .get_or_try_init(|| store.migrate())
                .await
                .unwrap();

            let warehouse_id = WarehouseId::new();
            store
                .insert_warehouse(&Warehouse::new(warehouse_id, format!("WH {warehouse_id}")).unwrap())
                .await
                .unwrap();

            let store = Arc::new(store);
            Some(Self {
                engine: OrderLifecycleEngine::new(store.clone()),
                store,
                warehouse_id,
            })
        }

        async fn product(&self, quantity: i64) -> ProductId {
            let product_id = ProductId::new();
            self.store
                .insert_product(&Product::new(product_id, format!("P {product_id}"), 100).unwrap())
                .await
                .unwrap();
            self.store.set_stock(self.key(product_id), quantity).await.unwrap();
            product_id
        }

        fn key(&self, product_id: ProductId) -> StockKey {
            StockKey::new(product_id, self.warehouse_id)
        }

        async fn quantity(&self, product_id: ProductId) -> i64 {
            let key = self.key(product_id);
            self.store
                .stock_levels(&[key])
                .await
                .unwrap()
                .get(&key)
                .copied()
                .unwrap_or(0)
        }

        async fn ledger_len(&self, product_id: ProductId) -> u64 {
            self.store
                .query_movements(
                    MovementFilter {
                        product_id: Some(product_id),
                        ..Default::default()
                    },
                    Pagination::default(),
                )
                .await
                .unwrap()
                .total
        }

        fn snapshot(&self, items: Vec<OrderItem>, version: u64) -> OrderSnapshot {
            let now = Utc::now();
            OrderSnapshot {
                id: OrderId::new(),
                customer: "ACME".to_string(),
                warehouse_id: self.warehouse_id,
                status: OrderStatus::Active,
                items,
                created_at: now,
                updated_at: now,
                completed_at: None,
                version,
            }
        }
    }

    #[tokio::test]
    async fn seeding_an_existing_balance_is_rejected() {
        let Some(f) = PgFixture::connect().await else {
            return;
        };
        let p = f.product(50).await;
        f.engine
            .create_order("ACME", f.warehouse_id, vec![OrderItem::new(p, 10)])
            .await
            .unwrap();

        let err = f.store.set_stock(f.key(p), 50).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(f.quantity(p).await, 40);
        assert_eq!(f.ledger_len(p).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_never_oversell() {
        let Some(f) = PgFixture::connect().await else {
            return;
        };
        let p = f.product(40).await;
        let engine = Arc::new(f.engine.clone());
        let warehouse_id = f.warehouse_id;

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .create_order("ACME", warehouse_id, vec![OrderItem::new(p, 30)])
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(EngineError::InsufficientStock {
                    requested,
                    available,
                    ..
                }) => assert_eq!((requested, available), (30, 10)),
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(f.quantity(p).await, 10);
        assert_eq!(f.ledger_len(p).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_concurrent_creates_stop_exactly_at_zero() {
        let Some(f) = PgFixture::connect().await else {
            return;
        };
        let p = f.product(25).await;
        let engine = Arc::new(f.engine.clone());
        let warehouse_id = f.warehouse_id;

        let tasks: Vec<_> = (0..60)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .create_order("ACME", warehouse_id, vec![OrderItem::new(p, 1)])
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(EngineError::InsufficientStock { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(ok, 25);
        assert_eq!(f.quantity(p).await, 0);
        assert_eq!(f.ledger_len(p).await, 25);
    }

    #[tokio::test]
    async fn shortfall_inside_the_transaction_rolls_back_earlier_adjustments() {
        let Some(f) = PgFixture::connect().await else {
            return;
        };
        let p1 = f.product(10).await;
        let p2 = f.product(2).await;
        let order = f.snapshot(vec![OrderItem::new(p1, 5), OrderItem::new(p2, 5)], 1);
        let order_id = order.id;

        let err = f
            .store
            .apply_transition(OrderTransition {
                order,
                expected_version: ExpectedVersion::Exact(0),
                movements: vec![
                    NewMovement::new(f.key(p1), -5, "t"),
                    NewMovement::new(f.key(p2), -5, "t"),
                ],
                occurred_at: Utc::now(),
            })
            .await
            .unwrap_err();

        match err {
            StoreError::InsufficientStock(short) => {
                assert_eq!(short.key, f.key(p2));
                assert_eq!((short.requested, short.available), (5, 2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!((f.quantity(p1).await, f.quantity(p2).await), (10, 2));
        assert_eq!(f.ledger_len(p1).await + f.ledger_len(p2).await, 0);
        assert!(f.store.load_order(order_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_touching_stock() {
        let Some(f) = PgFixture::connect().await else {
            return;
        };
        let p = f.product(5).await;
        let created = f
            .engine
            .create_order("ACME", f.warehouse_id, vec![OrderItem::new(p, 1)])
            .await
            .unwrap();

        let mut stale = created.clone();
        stale.status = OrderStatus::Canceled;
        stale.version = created.version + 1;
        let err = f
            .store
            .apply_transition(OrderTransition {
                order: stale,
                expected_version: ExpectedVersion::Exact(created.version - 1),
                movements: vec![NewMovement::new(f.key(p), 1, "t")],
                occurred_at: Utc::now(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Concurrency(_)));
        assert_eq!(f.quantity(p).await, 4);
        assert_eq!(f.ledger_len(p).await, 1);
        let stored = f.store.load_order(created.id).await.unwrap().unwrap();
        assert_eq!((stored.status, stored.version), (OrderStatus::Active, created.version));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cancels_release_stock_once() {
        let Some(f) = PgFixture::connect().await else {
            return;
        };
        let p = f.product(20).await;
        let order = f
            .engine
            .create_order("ACME", f.warehouse_id, vec![OrderItem::new(p, 8)])
            .await
            .unwrap();
        let order_id = order.id;
        let engine = Arc::new(f.engine.clone());

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.cancel_order(order_id).await })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(o) => {
                    assert_eq!(o.status, OrderStatus::Canceled);
                    ok += 1;
                }
                // lost the version race, or loaded the order after it was canceled
                Err(EngineError::ConcurrencyConflict(_)) | Err(EngineError::InvalidTransition { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(f.quantity(p).await, 20);
        assert_eq!(f.ledger_len(p).await, 2);
    }
}
