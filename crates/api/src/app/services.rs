use std::sync::Arc;

use anyhow::Context;

use stockflow_core::{OrderId, WarehouseId};
use stockflow_infra::{
    EngineError, InMemoryInventoryStore, InventoryQuery, OrderLifecycleEngine,
    PostgresInventoryStore,
};
use stockflow_orders::{OrderItem, OrderSnapshot};

use crate::config::AppConfig;
use crate::seed::DemoCatalog;

/// Validated body of a create/update request, ids already parsed.
#[derive(Debug, Clone)]
pub struct OrderInput {
    pub customer: String,
    pub warehouse_id: WarehouseId,
    pub items: Vec<OrderItem>,
}

/// Store + engine wiring, selected once at startup.
pub enum AppServices {
    InMemory {
        store: Arc<InMemoryInventoryStore>,
        engine: OrderLifecycleEngine<Arc<InMemoryInventoryStore>>,
    },
    Postgres {
        store: Arc<PostgresInventoryStore>,
        engine: OrderLifecycleEngine<Arc<PostgresInventoryStore>>,
    },
}

/// Build services from configuration: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresInventoryStore::connect(url, config.db_max_connections)
                .await
                .context("failed to connect to postgres")?;
            store.migrate().await.context("failed to apply schema")?;
            if config.seed_demo {
                let seeded = DemoCatalog::generate()?
                    .seed_postgres(&store)
                    .await
                    .context("failed to seed demo data")?;
                if !seeded {
                    tracing::info!("database already holds a catalog; demo seed skipped");
                }
            }
            Ok(AppServices::postgres(store))
        }
        None => {
            let store = Arc::new(InMemoryInventoryStore::new());
            if config.seed_demo {
                DemoCatalog::generate()?
                    .seed_in_memory(&store)
                    .context("failed to seed demo data")?;
            }
            Ok(AppServices::in_memory(store))
        }
    }
}

impl AppServices {
    pub fn in_memory(store: Arc<InMemoryInventoryStore>) -> Self {
        AppServices::InMemory {
            engine: OrderLifecycleEngine::new(store.clone()),
            store,
        }
    }

    pub fn postgres(store: PostgresInventoryStore) -> Self {
        let store = Arc::new(store);
        AppServices::Postgres {
            engine: OrderLifecycleEngine::new(store.clone()),
            store,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            AppServices::InMemory { .. } => "in_memory",
            AppServices::Postgres { .. } => "postgres",
        }
    }

    /// Read side shared by every backend.
    pub fn query(&self) -> &dyn InventoryQuery {
        match self {
            AppServices::InMemory { store, .. } => store.as_ref(),
            AppServices::Postgres { store, .. } => store.as_ref(),
        }
    }

    /// Referenced warehouse and products must exist before the engine sees them.
    pub async fn ensure_references(
        &self,
        warehouse_id: WarehouseId,
        items: &[OrderItem],
    ) -> Result<(), EngineError> {
        let query = self.query();
        if !query.warehouse_exists(warehouse_id).await? {
            return Err(EngineError::warehouse_not_found(warehouse_id));
        }
        for item in items {
            if !query.product_exists(item.product_id).await? {
                return Err(EngineError::product_not_found(item.product_id));
            }
        }
        Ok(())
    }

    pub async fn create_order(&self, input: OrderInput) -> Result<OrderSnapshot, EngineError> {
        self.ensure_references(input.warehouse_id, &input.items).await?;
        match self {
            AppServices::InMemory { engine, .. } => {
                engine.create_order(input.customer, input.warehouse_id, input.items).await
            }
            AppServices::Postgres { engine, .. } => {
                engine.create_order(input.customer, input.warehouse_id, input.items).await
            }
        }
    }

    pub async fn update_order(
        &self,
        order_id: OrderId,
        input: OrderInput,
    ) -> Result<OrderSnapshot, EngineError> {
        self.ensure_references(input.warehouse_id, &input.items).await?;
        match self {
            AppServices::InMemory { engine, .. } => {
                engine
                    .update_order(order_id, input.customer, input.warehouse_id, input.items)
                    .await
            }
            AppServices::Postgres { engine, .. } => {
                engine
                    .update_order(order_id, input.customer, input.warehouse_id, input.items)
                    .await
            }
        }
    }

    pub async fn complete_order(&self, order_id: OrderId) -> Result<OrderSnapshot, EngineError> {
        match self {
            AppServices::InMemory { engine, .. } => engine.complete_order(order_id).await,
            AppServices::Postgres { engine, .. } => engine.complete_order(order_id).await,
        }
    }

    pub async fn cancel_order(&self, order_id: OrderId) -> Result<OrderSnapshot, EngineError> {
        match self {
            AppServices::InMemory { engine, .. } => engine.cancel_order(order_id).await,
            AppServices::Postgres { engine, .. } => engine.cancel_order(order_id).await,
        }
    }

    pub async fn resume_order(&self, order_id: OrderId) -> Result<OrderSnapshot, EngineError> {
        match self {
            AppServices::InMemory { engine, .. } => engine.resume_order(order_id).await,
            AppServices::Postgres { engine, .. } => engine.resume_order(order_id).await,
        }
    }
}
