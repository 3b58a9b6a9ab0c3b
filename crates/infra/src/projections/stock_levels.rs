use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use stockledger_core::{AggregateId, Quantity, TenantId, WarehouseId};
use stockledger_inventory::{QuantKey, StockEvent};

use crate::journal::JournalEnvelope;
use crate::read_model::{StockLevel, StockLevelKey, StockLevelStore};

/// Tenant+stream cursor for at-least-once delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockLevelProjectionError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection cursor lock poisoned")]
    LockPoisoned,
}

/// Stock-level projection.
///
/// Folds journaled quant and reservation changes into per
/// (warehouse, product, location) rows. Move and document events advance
/// the cursor without touching the rows.
#[derive(Debug)]
pub struct StockLevelProjection<S>
where
    S: StockLevelStore,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> StockLevelProjection<S>
where
    S: StockLevelStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, key: &StockLevelKey) -> Option<StockLevel> {
        self.store.get(tenant_id, key)
    }

    pub fn list(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Vec<StockLevel> {
        self.store.list(tenant_id, warehouse_id)
    }

    /// Last applied sequence of the stream, `0` if none.
    pub fn cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|c| c.get(&CursorKey { tenant_id, aggregate_id }).copied())
            .unwrap_or(0)
    }

    /// Apply one journaled envelope.
    ///
    /// Replays at or below the cursor are ignored; gaps are errors.
    pub fn apply_envelope(&self, envelope: &JournalEnvelope) -> Result<(), StockLevelProjectionError> {
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| StockLevelProjectionError::LockPoisoned)?;
        let key = CursorKey { tenant_id, aggregate_id };
        let last = cursors.get(&key).copied().unwrap_or(0);

        if seq == 0 {
            return Err(StockLevelProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(StockLevelProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: StockEvent = envelope
            .decode()
            .map_err(|e| StockLevelProjectionError::Deserialize(e.to_string()))?;

        let warehouse_id = event.warehouse_id();
        if AggregateId::from(warehouse_id) != aggregate_id {
            return Err(StockLevelProjectionError::TenantIsolation(
                "event warehouse_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            StockEvent::QuantUpdated(e) => {
                self.bump(tenant_id, warehouse_id, &e.key, e.delta, Quantity::ZERO);
            }
            StockEvent::ReservationChanged(e) => {
                self.bump(tenant_id, warehouse_id, &e.key, Quantity::ZERO, e.delta);
            }
            StockEvent::MoveStateChanged(_)
            | StockEvent::MoveSplit(_)
            | StockEvent::BackorderCreated(_)
            | StockEvent::AdjustmentConfirmed(_) => {}
        }

        cursors.insert(key, seq);
        Ok(())
    }

    /// Drop the tenants' rows and cursors, then replay `envelopes`.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = JournalEnvelope>,
    ) -> Result<(), StockLevelProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        let mut tenants: Vec<TenantId> = envs.iter().map(|e| e.tenant_id()).collect();
        tenants.sort();
        tenants.dedup();
        {
            let mut cursors = self
                .cursors
                .write()
                .map_err(|_| StockLevelProjectionError::LockPoisoned)?;
            cursors.retain(|k, _| !tenants.contains(&k.tenant_id));
        }
        for tenant in &tenants {
            self.store.clear_tenant(*tenant);
        }

        envs.sort_by_key(|e| (e.tenant_id(), e.aggregate_id(), e.sequence_number()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }

    fn bump(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        quant: &QuantKey,
        on_hand: Quantity,
        reserved: Quantity,
    ) {
        let key = StockLevelKey {
            warehouse_id,
            product_id: quant.product_id,
            location_id: quant.location_id,
        };
        let mut level = self
            .store
            .get(tenant_id, &key)
            .unwrap_or_else(|| StockLevel::empty(key));
        level.on_hand += on_hand;
        level.reserved += reserved;
        self.store.upsert(tenant_id, level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryStockLevelStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockledger_core::{LocationId, ProductId};
    use stockledger_inventory::{QuantUpdated, ReservationChanged};

    fn quant_updated(
        tenant: TenantId,
        warehouse: WarehouseId,
        key: QuantKey,
        delta: Quantity,
        seq: u64,
    ) -> JournalEnvelope {
        let event = StockEvent::QuantUpdated(QuantUpdated {
            warehouse_id: warehouse,
            key,
            delta,
            quantity: delta,
            occurred_at: Utc::now(),
        });
        JournalEnvelope::encode(tenant, warehouse.into(), "warehouse", &event)
            .unwrap()
            .with_sequence(seq)
    }

    fn reservation_changed(
        tenant: TenantId,
        warehouse: WarehouseId,
        key: QuantKey,
        delta: Quantity,
        seq: u64,
    ) -> JournalEnvelope {
        let event = StockEvent::ReservationChanged(ReservationChanged {
            warehouse_id: warehouse,
            key,
            delta,
            reserved: delta,
            occurred_at: Utc::now(),
        });
        JournalEnvelope::encode(tenant, warehouse.into(), "warehouse", &event)
            .unwrap()
            .with_sequence(seq)
    }

    fn level_key(warehouse: WarehouseId, key: &QuantKey) -> StockLevelKey {
        StockLevelKey {
            warehouse_id: warehouse,
            product_id: key.product_id,
            location_id: key.location_id,
        }
    }

    #[test]
    fn folds_quant_and_reservation_changes() {
        let projection = StockLevelProjection::new(InMemoryStockLevelStore::new());
        let (tenant, warehouse) = (TenantId::new(), WarehouseId::new());
        let key = QuantKey::new(ProductId::new(), LocationId::new());

        projection
            .apply_envelope(&quant_updated(tenant, warehouse, key, dec!(10), 1))
            .unwrap();
        projection
            .apply_envelope(&reservation_changed(tenant, warehouse, key, dec!(4), 2))
            .unwrap();
        projection
            .apply_envelope(&quant_updated(tenant, warehouse, key, dec!(-3), 3))
            .unwrap();

        let level = projection.get(tenant, &level_key(warehouse, &key)).unwrap();
        assert_eq!(level.on_hand, dec!(7));
        assert_eq!(level.reserved, dec!(4));
        assert_eq!(level.available(), dec!(3));
        assert_eq!(projection.cursor(tenant, warehouse.into()), 3);
    }

    #[test]
    fn replays_are_ignored_and_gaps_rejected() {
        let projection = StockLevelProjection::new(InMemoryStockLevelStore::new());
        let (tenant, warehouse) = (TenantId::new(), WarehouseId::new());
        let key = QuantKey::new(ProductId::new(), LocationId::new());
        let first = quant_updated(tenant, warehouse, key, dec!(5), 1);

        projection.apply_envelope(&first).unwrap();
        projection.apply_envelope(&first).unwrap();
        let level = projection.get(tenant, &level_key(warehouse, &key)).unwrap();
        assert_eq!(level.on_hand, dec!(5));

        let err = projection
            .apply_envelope(&quant_updated(tenant, warehouse, key, dec!(1), 3))
            .unwrap_err();
        assert_eq!(err, StockLevelProjectionError::NonMonotonicSequence { last: 1, found: 3 });

        let err = projection
            .apply_envelope(&quant_updated(tenant, warehouse, key, dec!(1), 0))
            .unwrap_err();
        assert!(matches!(err, StockLevelProjectionError::NonMonotonicSequence { found: 0, .. }));
    }

    #[test]
    fn event_must_belong_to_the_stream() {
        let projection = StockLevelProjection::new(InMemoryStockLevelStore::new());
        let tenant = TenantId::new();
        let key = QuantKey::new(ProductId::new(), LocationId::new());
        let event = StockEvent::QuantUpdated(QuantUpdated {
            warehouse_id: WarehouseId::new(),
            key,
            delta: dec!(1),
            quantity: dec!(1),
            occurred_at: Utc::now(),
        });
        let envelope = JournalEnvelope::encode(tenant, AggregateId::new(), "warehouse", &event)
            .unwrap()
            .with_sequence(1);

        let err = projection.apply_envelope(&envelope).unwrap_err();
        assert!(matches!(err, StockLevelProjectionError::TenantIsolation(_)));
        assert_eq!(projection.cursor(tenant, envelope.aggregate_id()), 0);
    }

    #[test]
    fn rebuild_matches_incremental_application() {
        let projection = StockLevelProjection::new(InMemoryStockLevelStore::new());
        let (tenant, warehouse) = (TenantId::new(), WarehouseId::new());
        let key = QuantKey::new(ProductId::new(), LocationId::new());
        let envelopes = vec![
            quant_updated(tenant, warehouse, key, dec!(10), 1),
            reservation_changed(tenant, warehouse, key, dec!(2), 2),
            quant_updated(tenant, warehouse, key, dec!(-1), 3),
        ];
        for env in &envelopes {
            projection.apply_envelope(env).unwrap();
        }
        let before = projection.list(tenant, warehouse);

        let mut shuffled = envelopes.clone();
        shuffled.reverse();
        projection.rebuild_from_scratch(shuffled).unwrap();

        assert_eq!(projection.list(tenant, warehouse), before);
        assert_eq!(before[0].on_hand, dec!(9));
    }
}
