use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use stockledger_core::{LocationId, ProductId, Quantity, TenantId, WarehouseId};

/// Row key of the stock-level read model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockLevelKey {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub location_id: LocationId,
}

/// On-hand and reserved quantity of a product at a location, summed over
/// lots, owners and packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub key: StockLevelKey,
    pub on_hand: Quantity,
    pub reserved: Quantity,
}

impl StockLevel {
    pub fn empty(key: StockLevelKey) -> Self {
        Self {
            key,
            on_hand: Quantity::ZERO,
            reserved: Quantity::ZERO,
        }
    }

    pub fn available(&self) -> Quantity {
        self.on_hand - self.reserved
    }
}

/// Storage of disposable stock-level rows, partitioned by tenant.
pub trait StockLevelStore: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &StockLevelKey) -> Option<StockLevel>;
    fn upsert(&self, tenant_id: TenantId, level: StockLevel);
    /// Rows of one warehouse, ordered by key.
    fn list(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Vec<StockLevel>;
    /// Drop every row of the tenant (rebuild support).
    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<S> StockLevelStore for Arc<S>
where
    S: StockLevelStore + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &StockLevelKey) -> Option<StockLevel> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, level: StockLevel) {
        (**self).upsert(tenant_id, level)
    }

    fn list(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Vec<StockLevel> {
        (**self).list(tenant_id, warehouse_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStockLevelStore {
    rows: RwLock<HashMap<(TenantId, StockLevelKey), StockLevel>>,
}

impl InMemoryStockLevelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StockLevelStore for InMemoryStockLevelStore {
    fn get(&self, tenant_id: TenantId, key: &StockLevelKey) -> Option<StockLevel> {
        let rows = self.rows.read().ok()?;
        rows.get(&(tenant_id, *key)).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, level: StockLevel) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert((tenant_id, level.key), level);
        }
    }

    fn list(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Vec<StockLevel> {
        let Ok(rows) = self.rows.read() else {
            return vec![];
        };
        let mut levels: Vec<StockLevel> = rows
            .iter()
            .filter(|((t, k), _)| *t == tenant_id && k.warehouse_id == warehouse_id)
            .map(|(_, v)| v.clone())
            .collect();
        levels.sort_by_key(|l| l.key);
        levels
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut rows) = self.rows.write() {
            rows.retain(|(t, _), _| *t != tenant_id);
        }
    }
}
