use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tracing::instrument;

use stockflow_catalog::{Product, Warehouse};
use stockflow_core::{Entity, MovementId, OrderId, ProductId, WarehouseId};
use stockflow_inventory::{Movement, MovementFilter, StockBalance, StockKey};
use stockflow_orders::OrderSnapshot;

use super::query::{InventoryQuery, OrderFilter, Page, Pagination, ProductStock, WarehouseStock};
use super::r#trait::{CommittedTransition, InventoryStore, OrderTransition, StoreError};

#[derive(Debug, Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    warehouses: BTreeMap<WarehouseId, Warehouse>,
    balances: HashMap<StockKey, StockBalance>,
    orders: HashMap<OrderId, OrderSnapshot>,
    movements: Vec<Movement>,
}

impl State {
    fn balance(&self, key: StockKey) -> StockBalance {
        self.balances
            .get(&key)
            .copied()
            .unwrap_or_else(|| StockBalance::empty(key))
    }
}

/// In-memory order and stock store.
///
/// Intended for tests/dev. Every transition runs under the single write lock,
/// so adjustments on any key serialize, including transitions whose keys are
/// disjoint: there is no per-key parallelism here, unlike the row locks of
/// the Postgres store. A failed transition is rolled back from an undo log
/// before the lock is released.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.products.insert(*product.id(), product);
        Ok(())
    }

    pub fn insert_warehouse(&self, warehouse: Warehouse) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.warehouses.insert(*warehouse.id(), warehouse);
        Ok(())
    }

    /// Seed the opening balance of a key. Writes no ledger entry, so it is
    /// create-only: an existing balance is left as is and reported as
    /// [`StoreError::AlreadyExists`].
    pub fn set_stock(&self, key: StockKey, quantity: i64) -> Result<(), StoreError> {
        let balance = StockBalance::new(key, quantity)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut state = self.write()?;
        if state.balances.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        state.balances.insert(key, balance);
        Ok(())
    }

    /// Current quantity for `key` (0 when no balance exists).
    pub fn quantity(&self, key: StockKey) -> Result<i64, StoreError> {
        Ok(self.read()?.balance(key).quantity())
    }

    /// Full ledger in append order.
    pub fn movements(&self) -> Result<Vec<Movement>, StoreError> {
        Ok(self.read()?.movements.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn load_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>, StoreError> {
        Ok(self.read()?.orders.get(&order_id).cloned())
    }

    async fn stock_levels(&self, keys: &[StockKey]) -> Result<HashMap<StockKey, i64>, StoreError> {
        let state = self.read()?;
        Ok(keys
            .iter()
            .filter_map(|k| state.balances.get(k).map(|b| (*k, b.quantity())))
            .collect())
    }

    #[instrument(
        skip(self, transition),
        fields(
            order_id = %transition.order.id,
            movement_count = transition.movements.len(),
            expected_version = ?transition.expected_version
        ),
        err
    )]
    async fn apply_transition(
        &self,
        transition: OrderTransition,
    ) -> Result<CommittedTransition, StoreError> {
        let OrderTransition {
            order,
            expected_version,
            movements,
            occurred_at,
        } = transition;

        let mut state = self.write()?;

        let current = state.orders.get(&order.id).map(|o| o.version).unwrap_or(0);
        if !expected_version.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // (key, balance before) in application order.
        let mut undo: Vec<(StockKey, Option<StockBalance>)> = Vec::with_capacity(movements.len());
        for m in &movements {
            let before = state.balances.get(&m.key).copied();
            let adjusted = before
                .unwrap_or_else(|| StockBalance::empty(m.key))
                .try_adjust(m.delta);
            match adjusted {
                Ok(next) => {
                    undo.push((m.key, before));
                    state.balances.insert(m.key, next);
                }
                Err(rejected) => {
                    for (key, prev) in undo.into_iter().rev() {
                        match prev {
                            Some(b) => state.balances.insert(key, b),
                            None => state.balances.remove(&key),
                        };
                    }
                    return Err(rejected.into());
                }
            }
        }

        let committed: Vec<Movement> = movements
            .into_iter()
            .map(|m| m.record(MovementId::new(), occurred_at))
            .collect();
        state.movements.extend(committed.iter().cloned());
        state.orders.insert(order.id, order.clone());

        Ok(CommittedTransition {
            order,
            movements: committed,
        })
    }
}

#[async_trait::async_trait]
impl InventoryQuery for InMemoryInventoryStore {
    async fn list_orders(
        &self,
        filter: OrderFilter,
        pagination: Pagination,
    ) -> Result<Page<OrderSnapshot>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<OrderSnapshot> = state
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(pagination.apply(rows))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>, StoreError> {
        self.load_order(order_id).await
    }

    async fn query_movements(
        &self,
        filter: MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<Movement> = state
            .movements
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        filter.sort(&mut rows);
        Ok(pagination.apply(rows))
    }

    async fn list_warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<Warehouse> = state.warehouses.values().cloned().collect();
        rows.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(rows)
    }

    async fn list_products(&self) -> Result<Vec<ProductStock>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<ProductStock> = state
            .products
            .values()
            .map(|product| {
                let stocks = state
                    .warehouses
                    .values()
                    .filter_map(|w| {
                        let key = StockKey::new(product.id_typed(), w.id_typed());
                        state.balances.get(&key).map(|b| WarehouseStock {
                            warehouse_id: w.id_typed(),
                            warehouse_name: w.name().to_string(),
                            quantity: b.quantity(),
                        })
                    })
                    .collect();
                ProductStock {
                    product: product.clone(),
                    stocks,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.product.name().cmp(b.product.name()));
        Ok(rows)
    }

    async fn product_exists(&self, product_id: ProductId) -> Result<bool, StoreError> {
        Ok(self.read()?.products.contains_key(&product_id))
    }

    async fn warehouse_exists(&self, warehouse_id: WarehouseId) -> Result<bool, StoreError> {
        Ok(self.read()?.warehouses.contains_key(&warehouse_id))
    }
}
