//! Thread-safe stock service.
//!
//! `StockService` owns one [`Warehouse`] behind a mutex and runs every
//! operation through the same pipeline:
//!
//! ```text
//! lock warehouse
//!   ↓
//! run the domain operation (rolled back on error)
//!   ↓
//! drain stock events → encode envelopes → append to the journal
//!   ↓
//! feed the committed envelopes to the stock-level projection
//! ```
//!
//! The journal append is the commit point: if it fails the warehouse is
//! restored to its state before the operation, so the journal and the
//! in-memory ledger never diverge. Projection failures are logged only;
//! the read model can be rebuilt from the journal.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;

use stockledger_core::{
    AdjustmentId, AggregateId, LocationId, LotId, MoveId, ProductId, Quantity, TenantId,
    TransferId, WarehouseId,
};
use stockledger_events::EventEnvelope;
use stockledger_inventory::{
    AdjustmentFilter, BackorderPolicy, DoneLine, Location, Lot, MoveCompletion, MoveState,
    NewAdjustmentLine, NewMove, NewTransfer, Product, QuantFilter, QuantKey, QuantUpdate,
    Reservation, StockError, StockEvent, TransferOutcome, TransferState, Warehouse,
};

use crate::config::StockConfig;
use crate::journal::{JournalEnvelope, JournalError, StockJournal};
use crate::projections::{StockLevelProjection, StockLevelProjectionError};
use crate::read_model::{StockLevel, StockLevelStore};

/// Aggregate type of warehouse streams in the journal.
pub const WAREHOUSE_STREAM: &str = "stock.warehouse";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Stock(#[from] StockError),

    #[error("journal append failed: {0}")]
    Journal(#[from] JournalError),

    #[error("stock-level projection failed: {0}")]
    Projection(#[from] StockLevelProjectionError),

    #[error("failed to encode stock event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("warehouse lock poisoned")]
    LockPoisoned,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug)]
pub struct StockService<J, S>
where
    J: StockJournal,
    S: StockLevelStore,
{
    tenant_id: TenantId,
    warehouse: Mutex<Warehouse>,
    journal: J,
    projection: StockLevelProjection<S>,
}

impl<J, S> StockService<J, S>
where
    J: StockJournal,
    S: StockLevelStore,
{
    /// Open a fresh warehouse configured from `config`.
    pub fn new(
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        config: &StockConfig,
        journal: J,
        store: S,
    ) -> ServiceResult<Self> {
        let warehouse = Warehouse::new(warehouse_id, config.warehouse_config())?;
        tracing::info!(
            "opened warehouse {} for tenant {} ({:?}, loss location '{}')",
            warehouse_id,
            tenant_id,
            config.removal_strategy,
            config.loss_location_name
        );
        Ok(Self::with_warehouse(tenant_id, warehouse, journal, store))
    }

    pub fn with_warehouse(tenant_id: TenantId, warehouse: Warehouse, journal: J, store: S) -> Self {
        Self {
            tenant_id,
            warehouse: Mutex::new(warehouse),
            journal,
            projection: StockLevelProjection::new(store),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn journal(&self) -> &J {
        &self.journal
    }

    pub fn projection(&self) -> &StockLevelProjection<S> {
        &self.projection
    }

    /// Journal stream of the warehouse.
    pub fn stream_id(&self) -> ServiceResult<AggregateId> {
        Ok(self.lock()?.id().into())
    }

    /// Stock-level rows of the warehouse.
    pub fn stock_levels(&self) -> ServiceResult<Vec<StockLevel>> {
        let warehouse_id = self.lock()?.id();
        Ok(self.projection.list(self.tenant_id, warehouse_id))
    }

    /// Run a read-only query against the warehouse.
    pub fn read<T>(&self, query: impl FnOnce(&Warehouse) -> T) -> ServiceResult<T> {
        let guard = self.lock()?;
        Ok(query(&guard))
    }

    /// Replay the warehouse stream into a cleared projection.
    pub fn rebuild_projection(&self) -> ServiceResult<()> {
        let stream = self.stream_id()?;
        let envelopes = self.journal.load_stream(self.tenant_id, stream)?;
        let count = envelopes.len();
        self.projection.rebuild_from_scratch(envelopes)?;
        tracing::info!("rebuilt stock levels from {} journaled events", count);
        Ok(())
    }

    /// Run `op` on the warehouse and journal what it recorded.
    pub fn execute<T>(
        &self,
        operation: &'static str,
        op: impl FnOnce(&mut Warehouse) -> Result<T, StockError>,
    ) -> ServiceResult<T> {
        let mut warehouse = self.lock()?;
        warehouse.checkpoint();

        let value = match op(&mut warehouse) {
            Ok(value) => value,
            Err(err) => {
                warehouse.rollback();
                if err.is_user_error() {
                    tracing::info!("{operation} rejected: {err}");
                } else {
                    tracing::warn!("{operation} failed: {err}");
                }
                return Err(err.into());
            }
        };

        let events = warehouse.drain_events();
        let committed = match self.journal_events(warehouse.id(), &events) {
            Ok(committed) => committed,
            Err(err) => {
                warehouse.rollback();
                tracing::warn!("{operation} rolled back: {err}");
                return Err(err);
            }
        };
        warehouse.commit();
        drop(warehouse);

        log_stock_events(operation, &events);
        for envelope in &committed {
            if let Err(err) = self.projection.apply_envelope(envelope) {
                tracing::warn!(
                    "stock-level projection skipped event {} (seq {}): {err}",
                    envelope.event_type(),
                    envelope.sequence_number()
                );
            }
        }
        tracing::info!(
            operation,
            events = committed.len(),
            "stock operation applied"
        );
        Ok(value)
    }

    fn journal_events(
        &self,
        warehouse_id: WarehouseId,
        events: &[StockEvent],
    ) -> ServiceResult<Vec<JournalEnvelope>> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let stream: AggregateId = warehouse_id.into();
        let envelopes = events
            .iter()
            .map(|e| EventEnvelope::encode(self.tenant_id, stream, WAREHOUSE_STREAM, e))
            .collect::<Result<Vec<_>, _>>()?;
        let committed = self.journal.append(envelopes)?;
        if let (Some(first), Some(last)) = (committed.first(), committed.last()) {
            tracing::debug!(
                "journaled {} events to {} (seq {}..={})",
                committed.len(),
                stream,
                first.sequence_number(),
                last.sequence_number()
            );
        }
        Ok(committed)
    }

    fn lock(&self) -> ServiceResult<MutexGuard<'_, Warehouse>> {
        self.warehouse.lock().map_err(|_| ServiceError::LockPoisoned)
    }

    // -- master data ---------------------------------------------------------

    pub fn register_product(&self, product: Product) -> ServiceResult<ProductId> {
        self.execute("register_product", |w| w.register_product(product))
    }

    pub fn register_location(&self, location: Location) -> ServiceResult<LocationId> {
        self.execute("register_location", |w| w.register_location(location))
    }

    pub fn register_lot(&self, lot: Lot) -> ServiceResult<LotId> {
        self.execute("register_lot", |w| w.register_lot(lot))
    }

    // -- quant ledger --------------------------------------------------------

    pub fn update_quantity(
        &self,
        key: QuantKey,
        delta: Quantity,
        in_date: Option<DateTime<Utc>>,
    ) -> ServiceResult<QuantUpdate> {
        self.execute("update_quantity", |w| w.update_quantity(&key, delta, in_date))
    }

    pub fn get_available_quantity(
        &self,
        filter: &QuantFilter,
        allow_negative: bool,
    ) -> ServiceResult<Quantity> {
        Ok(self.lock()?.get_available_quantity(filter, allow_negative)?)
    }

    pub fn reserve(&self, filter: QuantFilter, qty: Quantity) -> ServiceResult<Vec<Reservation>> {
        let chunks = self.execute("reserve", |w| w.reserve(&filter, qty))?;
        let got: Quantity = chunks.iter().map(|c| c.quantity).sum();
        if got < qty {
            tracing::warn!(
                "partial reservation for product {}: requested {}, reserved {}",
                filter.product_id,
                qty,
                got
            );
        }
        Ok(chunks)
    }

    pub fn release_reservation(
        &self,
        filter: QuantFilter,
        qty: Quantity,
    ) -> ServiceResult<Vec<Reservation>> {
        self.execute("release_reservation", |w| w.release_reservation(&filter, qty))
    }

    // -- moves ---------------------------------------------------------------

    pub fn create_move(&self, req: NewMove) -> ServiceResult<MoveId> {
        self.execute("create_move", |w| w.create_move(req))
    }

    pub fn confirm_move(&self, id: MoveId) -> ServiceResult<MoveState> {
        self.execute("confirm_move", |w| w.confirm_move(id))
    }

    pub fn assign_move(&self, id: MoveId) -> ServiceResult<MoveState> {
        let state = self.execute("assign_move", |w| w.assign_move(id))?;
        if matches!(state, MoveState::Confirmed | MoveState::PartiallyAvailable) {
            tracing::warn!("move {} only partially reserved ({})", id, state.as_str());
        }
        Ok(state)
    }

    pub fn unreserve_move(&self, id: MoveId) -> ServiceResult<MoveState> {
        self.execute("unreserve_move", |w| w.unreserve_move(id))
    }

    pub fn cancel_move(&self, id: MoveId) -> ServiceResult<()> {
        self.execute("cancel_move", |w| w.cancel_move(id))
    }

    pub fn set_quantity_done(&self, id: MoveId, qty: Quantity) -> ServiceResult<()> {
        self.execute("set_quantity_done", |w| w.set_quantity_done(id, qty))
    }

    pub fn record_done_line(&self, id: MoveId, line: DoneLine) -> ServiceResult<()> {
        self.execute("record_done_line", |w| w.record_done_line(id, line))
    }

    pub fn complete_move(&self, id: MoveId) -> ServiceResult<MoveCompletion> {
        self.execute("complete_move", |w| w.complete_move(id))
    }

    // -- transfers -----------------------------------------------------------

    pub fn create_transfer(&self, req: NewTransfer) -> ServiceResult<TransferId> {
        self.execute("create_transfer", |w| w.create_transfer(req))
    }

    pub fn confirm_transfer(&self, id: TransferId) -> ServiceResult<TransferState> {
        self.execute("confirm_transfer", |w| w.confirm_transfer(id))
    }

    pub fn assign_transfer(&self, id: TransferId) -> ServiceResult<TransferState> {
        let state = self.execute("assign_transfer", |w| w.assign_transfer(id))?;
        if state != TransferState::Assigned {
            tracing::warn!("transfer {} not fully reserved ({})", id, state.as_str());
        }
        Ok(state)
    }

    pub fn validate_transfer(
        &self,
        id: TransferId,
        policy: BackorderPolicy,
    ) -> ServiceResult<TransferOutcome> {
        let outcome = self.execute("validate_transfer", |w| w.validate_transfer(id, policy))?;
        if let Some(backorder) = outcome.backorder_id {
            tracing::info!("transfer {} left backorder {}", id, backorder);
        }
        Ok(outcome)
    }

    pub fn cancel_transfer(&self, id: TransferId) -> ServiceResult<()> {
        self.execute("cancel_transfer", |w| w.cancel_transfer(id))
    }

    // -- inventory adjustments -----------------------------------------------

    pub fn create_adjustment(
        &self,
        name: impl Into<String>,
        location_id: LocationId,
        filter: AdjustmentFilter,
    ) -> ServiceResult<AdjustmentId> {
        let name = name.into();
        self.execute("create_adjustment", |w| {
            w.create_adjustment(name, location_id, filter)
        })
    }

    pub fn start_adjustment(&self, id: AdjustmentId) -> ServiceResult<()> {
        self.execute("start_adjustment", |w| w.start_adjustment(id))
    }

    pub fn set_counted(&self, id: AdjustmentId, line: usize, counted: Quantity) -> ServiceResult<()> {
        self.execute("set_counted", |w| w.set_counted(id, line, counted))
    }

    pub fn update_line(
        &self,
        id: AdjustmentId,
        line: usize,
        update: NewAdjustmentLine,
    ) -> ServiceResult<()> {
        self.execute("update_line", |w| w.update_line(id, line, update))
    }

    pub fn add_line(&self, id: AdjustmentId, line: NewAdjustmentLine) -> ServiceResult<usize> {
        self.execute("add_line", |w| w.add_line(id, line))
    }

    pub fn confirm_adjustment(&self, id: AdjustmentId) -> ServiceResult<Vec<MoveId>> {
        self.execute("confirm_adjustment", |w| w.confirm_adjustment(id))
    }

    pub fn cancel_adjustment(&self, id: AdjustmentId) -> ServiceResult<()> {
        self.execute("cancel_adjustment", |w| w.cancel_adjustment(id))
    }
}

fn log_stock_events(operation: &str, events: &[StockEvent]) {
    for event in events {
        match event {
            StockEvent::QuantUpdated(e) if e.quantity < Quantity::ZERO => {
                tracing::warn!(
                    "{operation}: product {} is negative at location {} ({})",
                    e.key.product_id,
                    e.key.location_id,
                    e.quantity
                );
            }
            StockEvent::MoveStateChanged(e) => {
                tracing::debug!(
                    "move {}: {} -> {}",
                    e.move_id,
                    e.from.as_str(),
                    e.to.as_str()
                );
            }
            StockEvent::MoveSplit(e) => {
                tracing::info!(
                    "move {} split {:?} of {} into {}",
                    e.move_id,
                    e.kind,
                    e.quantity,
                    e.new_move_id
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::InMemoryStockJournal;
    use crate::read_model::InMemoryStockLevelStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use stockledger_inventory::{LocationUsage, Tracking};

    type Service = StockService<InMemoryStockJournal, InMemoryStockLevelStore>;

    fn service() -> Service {
        StockService::new(
            TenantId::new(),
            WarehouseId::new(),
            &StockConfig::default(),
            InMemoryStockJournal::new(),
            InMemoryStockLevelStore::new(),
        )
        .unwrap()
    }

    #[test]
    fn failed_operation_leaves_no_trace() {
        let svc = service();
        let stock = svc
            .register_location(Location::new("WH/Stock", LocationUsage::Internal))
            .unwrap();
        let product = svc
            .register_product(Product::new("Serial", Tracking::Serial))
            .unwrap();
        let serial = svc.register_lot(Lot::new("SN-1", product)).unwrap();
        let key = QuantKey::new(product, stock).with_lot(serial);

        svc.update_quantity(key, dec!(1), None).unwrap();
        let journaled = svc
            .journal()
            .stream_len(svc.tenant_id(), svc.stream_id().unwrap())
            .unwrap();

        let err = svc.update_quantity(key, dec!(1), None).unwrap_err();
        assert!(matches!(err, ServiceError::Stock(StockError::DuplicateSerial { .. })));

        let after = svc
            .journal()
            .stream_len(svc.tenant_id(), svc.stream_id().unwrap())
            .unwrap();
        assert_eq!(after, journaled);
        let on_hand = svc
            .read(|w| w.ledger().quantity(&QuantFilter::exact(&key)))
            .unwrap();
        assert_eq!(on_hand, dec!(1));
    }

    #[test]
    fn partial_reservation_is_not_an_error() {
        let svc = service();
        let stock = svc
            .register_location(Location::new("WH/Stock", LocationUsage::Internal))
            .unwrap();
        let product = svc
            .register_product(Product::new("Bolt", Tracking::None))
            .unwrap();
        svc.update_quantity(QuantKey::new(product, stock), dec!(3), None)
            .unwrap();

        let chunks = svc.reserve(QuantFilter::any(product, stock), dec!(5)).unwrap();
        let got: Quantity = chunks.iter().map(|c| c.quantity).sum();
        assert_eq!(got, dec!(3));
        assert_eq!(
            svc.get_available_quantity(&QuantFilter::any(product, stock), false)
                .unwrap(),
            dec!(0)
        );
    }

    /// Refuses appends while `reject` is set.
    #[derive(Default)]
    struct FlakyJournal {
        inner: InMemoryStockJournal,
        reject: AtomicBool,
    }

    impl StockJournal for FlakyJournal {
        fn append(&self, events: Vec<JournalEnvelope>) -> Result<Vec<JournalEnvelope>, JournalError> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(JournalError::InvalidAppend("journal offline".to_string()));
            }
            self.inner.append(events)
        }

        fn load_stream(
            &self,
            tenant_id: TenantId,
            aggregate_id: AggregateId,
        ) -> Result<Vec<JournalEnvelope>, JournalError> {
            self.inner.load_stream(tenant_id, aggregate_id)
        }
    }

    #[test]
    fn failed_append_rolls_back_the_warehouse() {
        let svc = StockService::new(
            TenantId::new(),
            WarehouseId::new(),
            &StockConfig::default(),
            FlakyJournal::default(),
            InMemoryStockLevelStore::new(),
        )
        .unwrap();
        let stock = svc
            .register_location(Location::new("WH/Stock", LocationUsage::Internal))
            .unwrap();
        let customer = svc
            .register_location(Location::new("Customers", LocationUsage::Customer))
            .unwrap();
        let product = svc
            .register_product(Product::new("Bolt", Tracking::None))
            .unwrap();
        let key = QuantKey::new(product, stock);
        svc.update_quantity(key, dec!(5), None).unwrap();

        let m = svc
            .create_move(NewMove::new(product, stock, customer, dec!(5)))
            .unwrap();

        svc.journal().reject.store(true, Ordering::SeqCst);
        let err = svc.assign_move(m).unwrap_err();
        assert!(matches!(err, ServiceError::Journal(_)));
        let err = svc.update_quantity(key, dec!(2), None).unwrap_err();
        assert!(matches!(err, ServiceError::Journal(_)));

        let (state, on_hand, reserved) = svc
            .read(|w| {
                let exact = QuantFilter::exact(&key);
                (
                    w.stock_move(m).map(|mv| mv.state()),
                    w.ledger().quantity(&exact),
                    w.ledger().reserved_quantity(&exact),
                )
            })
            .unwrap();
        assert_eq!(state, Ok(MoveState::Draft));
        assert_eq!(on_hand, dec!(5));
        assert_eq!(reserved, dec!(0));
        assert!(!svc.read(|w| w.has_checkpoint()).unwrap());

        svc.journal().reject.store(false, Ordering::SeqCst);
        svc.update_quantity(key, dec!(2), None).unwrap();
        assert_eq!(svc.stock_levels().unwrap()[0].on_hand, dec!(7));
    }
}
