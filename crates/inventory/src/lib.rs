//! Stock domain: quant ledger, moves, transfers and inventory adjustments.
//!
//! This crate contains the business rules of the stock ledger, implemented
//! purely as deterministic domain logic (no IO, no logging, no storage).
//! Every mutation is recorded as a [`StockEvent`] that callers drain from
//! the [`Warehouse`].

pub mod adjustment;
pub mod catalog;
pub mod error;
pub mod event;
pub mod ledger;
pub mod quant;
pub mod stock_move;
pub mod transfer;
pub mod warehouse;

pub use adjustment::{
    AdjustmentFilter, AdjustmentLine, AdjustmentState, InventoryAdjustment, NewAdjustmentLine,
};
pub use catalog::{Catalog, Location, LocationUsage, Lot, Product, Tracking};
pub use error::{StockError, StockResult};
pub use event::{
    AdjustmentConfirmed, BackorderCreated, MoveSplit, MoveStateChanged, QuantUpdated,
    ReservationChanged, SplitKind, StockEvent,
};
pub use ledger::{LedgerChange, QuantLedger, QuantUpdate};
pub use quant::{Quant, QuantFilter, QuantId, QuantKey, RemovalStrategy, Reservation};
pub use stock_move::{DoneLine, MoveLine, MoveState, NewMove, StockMove};
pub use transfer::{BackorderPolicy, NewTransfer, Transfer, TransferOutcome, TransferState};
pub use warehouse::{MoveCompletion, Warehouse, WarehouseConfig};
