//! Warehouse: the consistency boundary of one stock ledger.
//!
//! A `Warehouse` owns the catalog, the quant ledger and every move, transfer
//! and inventory adjustment that touches it. All operations take `&mut self`;
//! callers needing shared access wrap it in a lock.

mod adjustments;
mod completion;
mod reservation;
mod transfers;
mod undo;


use std::collections::HashMap;

use chrono::{DateTime, Utc};

use stockledger_core::{
    AdjustmentId, LocationId, LotId, MoveId, ProductId, Quantity, TransferId, WarehouseId,
    quantity,
};

use crate::adjustment::InventoryAdjustment;
use crate::catalog::{Catalog, Location, LocationUsage, Lot, Product, Tracking};
use crate::error::{StockError, StockResult};
use crate::event::{MoveStateChanged, QuantUpdated, ReservationChanged, StockEvent};
use crate::ledger::{LedgerChange, QuantLedger, QuantUpdate};
use crate::quant::{QuantFilter, QuantKey, RemovalStrategy, Reservation};
use crate::stock_move::{MoveState, StockMove};
use crate::transfer::{Transfer, TransferState};

pub use completion::MoveCompletion;

/// Settings a warehouse is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    pub removal_strategy: RemovalStrategy,
    /// Name of the virtual location inventory differences are booked against.
    pub loss_location_name: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            removal_strategy: RemovalStrategy::Fifo,
            loss_location_name: "Inventory adjustment".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Warehouse {
    id: WarehouseId,
    catalog: Catalog,
    ledger: QuantLedger,
    moves: HashMap<MoveId, StockMove>,
    transfers: HashMap<TransferId, Transfer>,
    adjustments: HashMap<AdjustmentId, InventoryAdjustment>,
    loss_location: LocationId,
    next_move_seq: u64,
    clock: fn() -> DateTime<Utc>,
    events: Vec<StockEvent>,
    undo: Option<undo::UndoLog>,
}

impl Warehouse {
    pub fn new(id: WarehouseId, config: WarehouseConfig) -> StockResult<Self> {
        let mut catalog = Catalog::new();
        let loss_location = catalog.register_location(Location::new(
            config.loss_location_name,
            LocationUsage::Inventory,
        ))?;
        Ok(Self {
            id,
            catalog,
            ledger: QuantLedger::new(config.removal_strategy),
            moves: HashMap::new(),
            transfers: HashMap::new(),
            adjustments: HashMap::new(),
            loss_location,
            next_move_seq: 0,
            clock: Utc::now,
            events: Vec::new(),
            undo: None,
        })
    }

    /// Replace the clock used for incoming dates and event timestamps.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id(&self) -> WarehouseId {
        self.id
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &QuantLedger {
        &self.ledger
    }

    /// Virtual location inventory adjustments move stock from and to.
    pub fn loss_location(&self) -> LocationId {
        self.loss_location
    }

    pub fn stock_move(&self, id: MoveId) -> StockResult<&StockMove> {
        self.moves.get(&id).ok_or(StockError::UnknownMove(id))
    }

    /// All moves, in creation order.
    pub fn moves(&self) -> Vec<&StockMove> {
        let mut moves: Vec<&StockMove> = self.moves.values().collect();
        moves.sort_by_key(|m| m.sequence);
        moves
    }

    pub fn transfer(&self, id: TransferId) -> StockResult<&Transfer> {
        self.transfers.get(&id).ok_or(StockError::UnknownTransfer(id))
    }

    pub fn adjustment(&self, id: AdjustmentId) -> StockResult<&InventoryAdjustment> {
        self.adjustments
            .get(&id)
            .ok_or(StockError::UnknownAdjustment(id))
    }

    /// Take the events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<StockEvent> {
        self.flush_ledger();
        std::mem::take(&mut self.events)
    }

    // -- master data -------------------------------------------------------

    pub fn register_product(&mut self, product: Product) -> StockResult<ProductId> {
        self.catalog_mut().register_product(product)
    }

    pub fn register_location(&mut self, location: Location) -> StockResult<LocationId> {
        self.catalog_mut().register_location(location)
    }

    pub fn register_lot(&mut self, lot: Lot) -> StockResult<LotId> {
        self.catalog_mut().register_lot(lot)
    }

    // -- quant ledger ------------------------------------------------------

    /// Add `delta` to the quant at exactly `key`.
    ///
    /// Reservations of moves that no longer fit in what is left are reduced
    /// first. A serial number can never exceed one unit at its key, nor be
    /// on hand at two internal quants at once.
    pub fn update_quantity(
        &mut self,
        key: &QuantKey,
        delta: Quantity,
        in_date: Option<DateTime<Utc>>,
    ) -> StockResult<QuantUpdate> {
        self.check_key(key)?;
        self.check_serial_update(key, delta)?;

        if delta < Quantity::ZERO {
            let exact = QuantFilter::exact(key);
            let reserved = self.ledger.reserved_quantity(&exact);
            let left = self.ledger.quantity(&exact) + delta;
            let to_free = reserved.min(reserved - left);
            if to_free > Quantity::ZERO {
                self.free_reservation(key, to_free, None, None)?;
            }
        }

        let now = self.now();
        let update = self.ledger_mut().update_quantity(key, delta, in_date, now)?;
        self.flush_ledger();
        Ok(update)
    }

    /// Quantity that can still be reserved for the filter.
    pub fn get_available_quantity(
        &self,
        filter: &QuantFilter,
        allow_negative: bool,
    ) -> StockResult<Quantity> {
        let tracking = self.catalog.tracking(filter.product_id)?;
        self.catalog.location(filter.location_id)?;
        Ok(self
            .ledger
            .available_quantity(filter, tracking, allow_negative))
    }

    /// Reserve stock outside of any move. Moves never reduce these
    /// reservations; they are released with `release_reservation`.
    pub fn reserve(&mut self, filter: &QuantFilter, qty: Quantity) -> StockResult<Vec<Reservation>> {
        let tracking = self.catalog.tracking(filter.product_id)?;
        self.catalog.location(filter.location_id)?;
        let chunks = self.ledger_mut().reserve(filter, qty, tracking)?;
        self.flush_ledger();
        Ok(chunks)
    }

    pub fn release_reservation(
        &mut self,
        filter: &QuantFilter,
        qty: Quantity,
    ) -> StockResult<Vec<Reservation>> {
        self.catalog.product(filter.product_id)?;
        self.catalog.location(filter.location_id)?;
        let chunks = self.ledger_mut().release(filter, qty)?;
        self.flush_ledger();
        Ok(chunks)
    }

    // -- internals ---------------------------------------------------------

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn check_key(&self, key: &QuantKey) -> StockResult<()> {
        self.catalog.product(key.product_id)?;
        self.catalog.location(key.location_id)?;
        self.catalog.check_lot(key.product_id, key.lot_id)
    }

    fn check_serial_update(&self, key: &QuantKey, delta: Quantity) -> StockResult<()> {
        let Some(lot) = key.lot_id else {
            return Ok(());
        };
        if self.catalog.tracking(key.product_id)? != Tracking::Serial {
            return Ok(());
        }
        let after = self.ledger.quantity(&QuantFilter::exact(key)) + delta;
        if after > Quantity::ONE {
            return Err(StockError::DuplicateSerial { lot });
        }
        if delta <= Quantity::ZERO || !self.catalog.usage(key.location_id)?.is_internal() {
            return Ok(());
        }

        let mut held = quantity::non_negative(after);
        for q in self.ledger.quants() {
            let other = q.key();
            if other == key || other.product_id != key.product_id || other.lot_id != Some(lot) {
                continue;
            }
            if self.catalog.usage(other.location_id)?.is_internal() {
                held += quantity::non_negative(q.quantity());
            }
        }
        if held > Quantity::ONE {
            return Err(StockError::DuplicateSerial { lot });
        }
        Ok(())
    }

    fn move_mut(&mut self, id: MoveId) -> StockResult<&mut StockMove> {
        self.touch_move(id).ok_or(StockError::UnknownMove(id))
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_move_seq += 1;
        self.next_move_seq
    }

    fn bypasses_reservation(&self, location: LocationId) -> StockResult<bool> {
        Ok(self.catalog.usage(location)?.bypasses_reservation())
    }

    /// Whether an origin of the move is still expected to deliver.
    fn waiting_on_origins(&self, mv: &StockMove) -> bool {
        mv.origin_moves
            .iter()
            .filter_map(|id| self.moves.get(id))
            .any(|origin| !origin.state.is_final())
    }

    fn emit(&mut self, event: StockEvent) {
        self.flush_ledger();
        self.events.push(event);
    }

    /// Turn pending ledger changes into events.
    fn flush_ledger(&mut self) {
        let changes = self.ledger.drain_changes();
        if changes.is_empty() {
            return;
        }
        let occurred_at = self.now();
        let warehouse_id = self.id;
        self.events.extend(changes.into_iter().map(|change| match change {
            LedgerChange::Quantity {
                key,
                delta,
                quantity,
            } => StockEvent::QuantUpdated(QuantUpdated {
                warehouse_id,
                key,
                delta,
                quantity,
                occurred_at,
            }),
            LedgerChange::Reservation {
                key,
                delta,
                reserved,
            } => StockEvent::ReservationChanged(ReservationChanged {
                warehouse_id,
                key,
                delta,
                reserved,
                occurred_at,
            }),
        }));
    }

    fn set_move_state(&mut self, id: MoveId, to: MoveState) -> StockResult<()> {
        let occurred_at = self.now();
        let warehouse_id = self.id;
        let mv = self.move_mut(id)?;
        if let Some(from) = mv.transition(to) {
            let event = StockEvent::MoveStateChanged(MoveStateChanged {
                warehouse_id,
                move_id: id,
                product_id: mv.product_id,
                from,
                to,
                reserved: mv.reserved_availability(),
                done: mv.quantity_done(),
                occurred_at,
            });
            self.emit(event);
        }
        Ok(())
    }

    /// Re-derive the state of a confirmed move from its reservation.
    fn recompute_move_state(&mut self, id: MoveId) -> StockResult<()> {
        let mv = self.stock_move(id)?;
        if mv.state.is_final() || mv.state == MoveState::Draft {
            return Ok(());
        }
        let to = mv.availability_state(self.waiting_on_origins(mv));
        self.set_move_state(id, to)
    }

    fn refresh_transfer(&mut self, id: TransferId) -> StockResult<TransferState> {
        let transfer = self.transfer(id)?;
        let states: Vec<(MoveState, bool)> = transfer
            .moves
            .iter()
            .filter_map(|m| self.moves.get(m))
            .map(|m| (m.state, !m.reserved_availability().is_zero()))
            .collect();
        let state = TransferState::from_moves(&states);
        if let Some(transfer) = self.touch_transfer(id) {
            transfer.set_state(state);
        }
        Ok(state)
    }

    /// Recompute the state of every transfer that is not final.
    pub fn refresh_transfers(&mut self) -> StockResult<()> {
        let mut open: Vec<TransferId> = self
            .transfers
            .values()
            .filter(|t| !t.state.is_final())
            .map(|t| t.id)
            .collect();
        open.sort();
        for id in open {
            self.refresh_transfer(id)?;
        }
        Ok(())
    }
}
