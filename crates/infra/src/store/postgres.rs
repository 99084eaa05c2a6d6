//! Postgres-backed order and stock store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Two transactions created the same order |
//! | Database (serialization failure) | `40001` | `Concurrency` | Conflicting concurrent transaction |
//! | Database (deadlock detected) | `40P01` | `Concurrency` | Conflicting concurrent transaction |
//! | Database (check constraint violation) | `23514` | `Backend` | Invalid data reached the schema |
//! | Database (numeric value out of range) | `22003` | `OutOfRange` | A release would push a balance past `BIGINT` |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | RowNotFound | N/A | `Corrupt` | Unexpected missing row |
//! | Other | N/A | `Backend` | Network errors, pool closed, etc. |
//!
//! ## Stock adjustment
//!
//! A decrement is one conditional statement:
//!
//! ```sql
//! UPDATE stock_balances SET quantity = quantity + $delta
//! WHERE product_id = $p AND warehouse_id = $w AND quantity + $delta >= 0
//! ```
//!
//! No returned row means the balance is missing or too low. Increments upsert.
//! Balances touched by a transition are locked up front in key order, so two
//! transitions over overlapping keys queue instead of deadlocking.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockflow_catalog::{Product, Warehouse};
use stockflow_core::{ExpectedVersion, MovementId, OrderId, ProductId, WarehouseId};
use stockflow_inventory::{
    InsufficientStock, Movement, MovementFilter, SortOrder, StockBalance, StockKey,
};
use stockflow_orders::{OrderItem, OrderSnapshot, OrderStatus};

use super::query::{InventoryQuery, OrderFilter, Page, Pagination, ProductStock, WarehouseStock};
use super::r#trait::{CommittedTransition, InventoryStore, OrderTransition, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

/// Postgres-backed order and stock store.
///
/// Every transition runs in one `sqlx::Transaction`; dropping it before
/// commit rolls everything back.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        let price = i64::try_from(product.price())
            .map_err(|_| StoreError::Backend(format!("price out of range: {}", product.price())))?;
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, price = EXCLUDED.price
            "#,
        )
        .bind(product.id_typed().as_uuid())
        .bind(product.name())
        .bind(price)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    pub async fn insert_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO warehouses (id, name) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(warehouse.id_typed().as_uuid())
        .bind(warehouse.name())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_warehouse", e))?;
        Ok(())
    }

    /// Seed the opening balance of a key. Writes no ledger entry, so it is
    /// create-only: an existing row is left as is and reported as
    /// [`StoreError::AlreadyExists`].
    pub async fn set_stock(&self, key: StockKey, quantity: i64) -> Result<(), StoreError> {
        StockBalance::new(key, quantity).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_balances (product_id, warehouse_id, quantity) VALUES ($1, $2, $3)
            ON CONFLICT (product_id, warehouse_id) DO NOTHING
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(quantity)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_stock", e))?
        .rows_affected();
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        Ok(())
    }

    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let order_id: Uuid = row.try_get("order_id").map_err(corrupt)?;
            let product_id: Uuid = row.try_get("product_id").map_err(corrupt)?;
            let quantity: i64 = row.try_get("quantity").map_err(corrupt)?;
            items
                .entry(order_id)
                .or_default()
                .push(OrderItem::new(ProductId::from_uuid(product_id), quantity));
        }
        Ok(items)
    }
}

#[async_trait::async_trait]
impl InventoryStore for PostgresInventoryStore {
    #[instrument(skip(self), err)]
    async fn load_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, customer, warehouse_id, status, created_at, updated_at, completed_at, version
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_order", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let header = OrderRow::from_row(&row)?;
        let mut items = self.load_items(&[header.id]).await?;
        let items = items.remove(&header.id).unwrap_or_default();
        Ok(Some(header.into_snapshot(items)?))
    }

    #[instrument(skip(self, keys), fields(key_count = keys.len()), err)]
    async fn stock_levels(&self, keys: &[StockKey]) -> Result<HashMap<StockKey, i64>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let products: Vec<Uuid> = keys.iter().map(|k| *k.product_id.as_uuid()).collect();
        let warehouses: Vec<Uuid> = keys.iter().map(|k| *k.warehouse_id.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT b.product_id, b.warehouse_id, b.quantity
            FROM stock_balances b
            JOIN UNNEST($1::uuid[], $2::uuid[]) AS k(product_id, warehouse_id)
              ON b.product_id = k.product_id AND b.warehouse_id = k.warehouse_id
            "#,
        )
        .bind(&products)
        .bind(&warehouses)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_levels", e))?;

        let mut levels = HashMap::with_capacity(rows.len());
        for row in rows {
            let product_id: Uuid = row.try_get("product_id").map_err(corrupt)?;
            let warehouse_id: Uuid = row.try_get("warehouse_id").map_err(corrupt)?;
            let quantity: i64 = row.try_get("quantity").map_err(corrupt)?;
            levels.insert(
                StockKey::new(ProductId::from_uuid(product_id), WarehouseId::from_uuid(warehouse_id)),
                quantity,
            );
        }
        Ok(levels)
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // 1) Optimistic version check (row locked for the rest of the transaction)
        let current = current_order_version(&mut tx, order.id).await?;
        if !expected_version.matches(current.unwrap_or(0)) {
            return abort(
                tx,
                StoreError::Concurrency(format!(
                    "expected {expected_version:?}, found {}",
                    current.unwrap_or(0)
                )),
            )
            .await;
        }

        // 2) Adjust balances and append the ledger
        let mut keys: Vec<StockKey> = movements.iter().map(|m| m.key).collect();
        keys.sort();
        keys.dedup();
        lock_balances(&mut tx, &keys).await?;

        let mut committed = Vec::with_capacity(movements.len());
        for m in movements {
            if let Err(short) = adjust_balance(&mut tx, m.key, m.delta).await? {
                return abort(tx, short.into()).await;
            }
            let movement = m.record(MovementId::new(), occurred_at);
            insert_movement(&mut tx, &movement).await?;
            committed.push(movement);
        }

        // 3) Write the order header and items
        write_order(&mut tx, &order, current, expected_version).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(CommittedTransition {
            order,
            movements: committed,
        })
    }
}

#[async_trait::async_trait]
impl InventoryQuery for PostgresInventoryStore {
    #[instrument(skip(self), err)]
    async fn list_orders(
        &self,
        filter: OrderFilter,
        pagination: Pagination,
    ) -> Result<Page<OrderSnapshot>, StoreError> {
        let status = filter.status.map(OrderStatus::as_str);
        let warehouse_id = filter.warehouse_id.map(|w| *w.as_uuid());

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM orders
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR warehouse_id = $2)
            "#,
        )
        .bind(status)
        .bind(warehouse_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_orders", e))?
        .try_get("total")
        .map_err(corrupt)?;

        let rows = sqlx::query(
            r#"
            SELECT id, customer, warehouse_id, status, created_at, updated_at, completed_at, version
            FROM orders
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR warehouse_id = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(status)
        .bind(warehouse_id)
        .bind(i64::from(pagination.limit))
        .bind(i64::from(pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_orders", e))?;

        let headers = rows
            .iter()
            .map(OrderRow::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = headers.iter().map(|h| h.id).collect();
        let mut items = self.load_items(&ids).await?;

        let orders = headers
            .into_iter()
            .map(|h| {
                let its = items.remove(&h.id).unwrap_or_default();
                h.into_snapshot(its)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(orders, total as u64, pagination))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderSnapshot>, StoreError> {
        self.load_order(order_id).await
    }

    #[instrument(skip(self), err)]
    async fn query_movements(
        &self,
        filter: MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError> {
        const WHERE: &str = r#"
            WHERE ($1::uuid IS NULL OR product_id = $1)
              AND ($2::uuid IS NULL OR warehouse_id = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
        "#;
        let direction = match filter.order {
            SortOrder::Oldest => "ASC",
            SortOrder::Newest => "DESC",
        };
        let product_id = filter.product_id.map(|p| *p.as_uuid());
        let warehouse_id = filter.warehouse_id.map(|w| *w.as_uuid());

        let count_sql = format!("SELECT COUNT(*) AS total FROM stock_movements {WHERE}");
        let total: i64 = sqlx::query(&count_sql)
            .bind(product_id)
            .bind(warehouse_id)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_movements", e))?
            .try_get("total")
            .map_err(corrupt)?;

        let select_sql = format!(
            "SELECT id, product_id, warehouse_id, delta, reason, created_at \
             FROM stock_movements {WHERE} \
             ORDER BY created_at {direction}, id {direction} \
             LIMIT $5 OFFSET $6"
        );
        let rows = sqlx::query(&select_sql)
            .bind(product_id)
            .bind(warehouse_id)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_movements", e))?;

        let movements = rows
            .iter()
            .map(movement_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(movements, total as u64, pagination))
    }

    async fn list_warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM warehouses ORDER BY name ASC, id ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_warehouses", e))?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(corrupt)?;
                let name: String = row.try_get("name").map_err(corrupt)?;
                Warehouse::new(WarehouseId::from_uuid(id), name)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect()
    }

    async fn list_products(&self) -> Result<Vec<ProductStock>, StoreError> {
        let products = sqlx::query("SELECT id, name, price FROM products ORDER BY name ASC, id ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;

        let balances = sqlx::query(
            r#"
            SELECT b.product_id, b.warehouse_id, w.name AS warehouse_name, b.quantity
            FROM stock_balances b
            JOIN warehouses w ON w.id = b.warehouse_id
            ORDER BY w.name ASC, w.id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_balances", e))?;

        let mut stocks: BTreeMap<Uuid, Vec<WarehouseStock>> = BTreeMap::new();
        for row in balances {
            let product_id: Uuid = row.try_get("product_id").map_err(corrupt)?;
            let warehouse_id: Uuid = row.try_get("warehouse_id").map_err(corrupt)?;
            stocks.entry(product_id).or_default().push(WarehouseStock {
                warehouse_id: WarehouseId::from_uuid(warehouse_id),
                warehouse_name: row.try_get("warehouse_name").map_err(corrupt)?,
                quantity: row.try_get("quantity").map_err(corrupt)?,
            });
        }

        products
            .iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(corrupt)?;
                let name: String = row.try_get("name").map_err(corrupt)?;
                let price: i64 = row.try_get("price").map_err(corrupt)?;
                let price = u64::try_from(price)
                    .map_err(|_| StoreError::Corrupt(format!("negative price for product {id}")))?;
                let product = Product::new(ProductId::from_uuid(id), name, price)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok(ProductStock {
                    product,
                    stocks: stocks.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn product_exists(&self, product_id: ProductId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS one FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("product_exists", e))?;
        Ok(row.is_some())
    }

    async fn warehouse_exists(&self, warehouse_id: WarehouseId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS one FROM warehouses WHERE id = $1")
            .bind(warehouse_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("warehouse_exists", e))?;
        Ok(row.is_some())
    }
}

/// Roll back explicitly, then surface `err`.
async fn abort<T>(tx: Transaction<'_, Postgres>, err: StoreError) -> Result<T, StoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))?;
    Err(err)
}

/// Stored version of the order (`None` if it does not exist), locking the row.
async fn current_order_version(
    tx: &mut Transaction<'_, Postgres>,
    order_id: OrderId,
) -> Result<Option<u64>, StoreError> {
    let row = sqlx::query("SELECT version FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("check_order_version", e))?;

    row.map(|r| r.try_get::<i64, _>("version").map(|v| v as u64))
        .transpose()
        .map_err(corrupt)
}

async fn lock_balances(
    tx: &mut Transaction<'_, Postgres>,
    keys: &[StockKey],
) -> Result<(), StoreError> {
    if keys.is_empty() {
        return Ok(());
    }
    let products: Vec<Uuid> = keys.iter().map(|k| *k.product_id.as_uuid()).collect();
    let warehouses: Vec<Uuid> = keys.iter().map(|k| *k.warehouse_id.as_uuid()).collect();

    sqlx::query(
        r#"
        SELECT b.quantity
        FROM stock_balances b
        JOIN UNNEST($1::uuid[], $2::uuid[]) AS k(product_id, warehouse_id)
          ON b.product_id = k.product_id AND b.warehouse_id = k.warehouse_id
        ORDER BY b.product_id, b.warehouse_id
        FOR UPDATE OF b
        "#,
    )
    .bind(&products)
    .bind(&warehouses)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_balances", e))?;
    Ok(())
}

/// The adjustment primitive. `Ok(Err(_))` is a shortfall: nothing was written.
async fn adjust_balance(
    tx: &mut Transaction<'_, Postgres>,
    key: StockKey,
    delta: i64,
) -> Result<Result<i64, InsufficientStock>, StoreError> {
    if delta >= 0 {
        let quantity: i64 = sqlx::query(
            r#"
            INSERT INTO stock_balances (product_id, warehouse_id, quantity) VALUES ($1, $2, $3)
            ON CONFLICT (product_id, warehouse_id)
            DO UPDATE SET quantity = stock_balances.quantity + EXCLUDED.quantity
            RETURNING quantity
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(delta)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("increment_balance", e))?
        .try_get("quantity")
        .map_err(corrupt)?;
        return Ok(Ok(quantity));
    }

    let updated = sqlx::query(
        r#"
        UPDATE stock_balances
        SET quantity = quantity + $3
        WHERE product_id = $1 AND warehouse_id = $2 AND quantity + $3 >= 0
        RETURNING quantity
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .bind(delta)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("decrement_balance", e))?;

    if let Some(row) = updated {
        return Ok(Ok(row.try_get("quantity").map_err(corrupt)?));
    }

    let available: i64 = sqlx::query(
        "SELECT quantity FROM stock_balances WHERE product_id = $1 AND warehouse_id = $2",
    )
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("read_balance", e))?
    .map(|row| row.try_get("quantity"))
    .transpose()
    .map_err(corrupt)?
    .unwrap_or(0);

    Ok(Err(InsufficientStock {
        key,
        requested: -delta,
        available,
    }))
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: &Movement,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (id, product_id, warehouse_id, delta, reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(movement.id.as_uuid())
    .bind(movement.product_id.as_uuid())
    .bind(movement.warehouse_id.as_uuid())
    .bind(movement.delta)
    .bind(&movement.reason)
    .bind(movement.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

async fn write_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &OrderSnapshot,
    current: Option<u64>,
    expected_version: ExpectedVersion,
) -> Result<(), StoreError> {
    let version = order.version as i64;

    match current {
        None => {
            sqlx::query(
                r#"
                INSERT INTO orders (id, customer, warehouse_id, status, created_at, updated_at, completed_at, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(&order.customer)
            .bind(order.warehouse_id.as_uuid())
            .bind(order.status.as_str())
            .bind(order.created_at)
            .bind(order.updated_at)
            .bind(order.completed_at)
            .bind(version)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_order", e))?;
        }
        Some(current) => {
            let result = sqlx::query(
                r#"
                UPDATE orders
                SET customer = $2, status = $3, updated_at = $4, completed_at = $5, version = $6
                WHERE id = $1 AND version = $7
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(&order.customer)
            .bind(order.status.as_str())
            .bind(order.updated_at)
            .bind(order.completed_at)
            .bind(version)
            .bind(current as i64)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_order", e))?;

            if result.rows_affected() != 1 {
                return Err(StoreError::Concurrency(format!(
                    "order {} changed underneath (expected {expected_version:?})",
                    order.id
                )));
            }

            sqlx::query("DELETE FROM order_items WHERE order_id = $1")
                .bind(order.id.as_uuid())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("delete_order_items", e))?;
        }
    }

    for (position, item) in order.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, position, product_id, quantity)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(position as i32)
        .bind(item.product_id.as_uuid())
        .bind(item.quantity)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order_item", e))?;
    }

    Ok(())
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique violation / serialization failure / deadlock
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                // numeric value out of range
                Some("22003") => StoreError::OutOfRange(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            StoreError::Corrupt(format!("unexpected row not found in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn corrupt(err: sqlx::Error) -> StoreError {
    StoreError::Corrupt(format!("failed to decode row: {err}"))
}

// SQLx row types

#[derive(Debug)]
struct OrderRow {
    id: Uuid,
    customer: String,
    warehouse_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl OrderRow {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        Ok(OrderRow {
            id: row.try_get("id").map_err(corrupt)?,
            customer: row.try_get("customer").map_err(corrupt)?,
            warehouse_id: row.try_get("warehouse_id").map_err(corrupt)?,
            status: row.try_get("status").map_err(corrupt)?,
            created_at: row.try_get("created_at").map_err(corrupt)?,
            updated_at: row.try_get("updated_at").map_err(corrupt)?,
            completed_at: row.try_get("completed_at").map_err(corrupt)?,
            version: row.try_get("version").map_err(corrupt)?,
        })
    }

    fn into_snapshot(self, items: Vec<OrderItem>) -> Result<OrderSnapshot, StoreError> {
        let status: OrderStatus = self
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {e}", self.id)))?;
        Ok(OrderSnapshot {
            id: OrderId::from_uuid(self.id),
            customer: self.customer,
            warehouse_id: WarehouseId::from_uuid(self.warehouse_id),
            status,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            version: self.version as u64,
        })
    }
}

fn movement_from_row(row: &PgRow) -> Result<Movement, StoreError> {
    let id: Uuid = row.try_get("id").map_err(corrupt)?;
    let product_id: Uuid = row.try_get("product_id").map_err(corrupt)?;
    let warehouse_id: Uuid = row.try_get("warehouse_id").map_err(corrupt)?;
    Ok(Movement {
        id: MovementId::from_uuid(id),
        product_id: ProductId::from_uuid(product_id),
        warehouse_id: WarehouseId::from_uuid(warehouse_id),
        delta: row.try_get("delta").map_err(corrupt)?,
        reason: row.try_get("reason").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}
