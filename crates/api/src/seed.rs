//! Demo catalog for local development: three warehouses, five products and
//! their opening stock.

use stockflow_catalog::{Product, Warehouse};
use stockflow_core::{DomainResult, ProductId, WarehouseId};
use stockflow_infra::{InMemoryInventoryStore, InventoryQuery, PostgresInventoryStore, StoreError};
use stockflow_inventory::StockKey;

const WAREHOUSES: [&str; 3] = ["Main warehouse", "Secondary warehouse", "Regional warehouse"];

/// (name, price in cents)
const PRODUCTS: [(&str, u64); 5] = [
    ("Laptop", 99_999),
    ("Smartphone", 49_999),
    ("Headphones", 7_999),
    ("Tablet", 29_999),
    ("Keyboard", 4_999),
];

/// (product index, warehouse index, quantity)
const STOCK: [(usize, usize, i64); 13] = [
    (0, 0, 50),
    (0, 1, 20),
    (0, 2, 10),
    (1, 0, 100),
    (1, 1, 30),
    (1, 2, 15),
    (2, 0, 200),
    (2, 1, 50),
    (2, 2, 25),
    (3, 0, 80),
    (3, 1, 40),
    (4, 0, 150),
    (4, 2, 60),
];

#[derive(Debug, Clone)]
pub struct DemoCatalog {
    pub warehouses: Vec<Warehouse>,
    pub products: Vec<Product>,
    pub stock: Vec<(StockKey, i64)>,
}

impl DemoCatalog {
    pub fn generate() -> DomainResult<Self> {
        let warehouses = WAREHOUSES
            .iter()
            .map(|name| Warehouse::new(WarehouseId::new(), *name))
            .collect::<DomainResult<Vec<_>>>()?;
        let products = PRODUCTS
            .iter()
            .map(|(name, price)| Product::new(ProductId::new(), *name, *price))
            .collect::<DomainResult<Vec<_>>>()?;
        let stock = STOCK
            .iter()
            .map(|(p, w, qty)| {
                (
                    StockKey::new(products[*p].id_typed(), warehouses[*w].id_typed()),
                    *qty,
                )
            })
            .collect();

        Ok(Self {
            warehouses,
            products,
            stock,
        })
    }

    pub fn seed_in_memory(&self, store: &InMemoryInventoryStore) -> Result<(), StoreError> {
        for warehouse in &self.warehouses {
            store.insert_warehouse(warehouse.clone())?;
        }
        for product in &self.products {
            store.insert_product(product.clone())?;
        }
        for (key, qty) in &self.stock {
            store.set_stock(*key, *qty)?;
        }
        Ok(())
    }

    /// Seeds only an empty database; returns whether anything was written.
    pub async fn seed_postgres(&self, store: &PostgresInventoryStore) -> Result<bool, StoreError> {
        if !store.list_warehouses().await?.is_empty() {
            return Ok(false);
        }
        for warehouse in &self.warehouses {
            store.insert_warehouse(warehouse).await?;
        }
        for product in &self.products {
            store.insert_product(product).await?;
        }
        for (key, qty) in &self.stock {
            store.set_stock(*key, *qty).await?;
        }
        Ok(true)
    }
}
