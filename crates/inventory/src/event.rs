use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AdjustmentId, MoveId, ProductId, Quantity, TransferId, WarehouseId};
use stockledger_events::Event;

use crate::quant::QuantKey;
use crate::stock_move::MoveState;

/// Event: QuantUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantUpdated {
    pub warehouse_id: WarehouseId,
    pub key: QuantKey,
    pub delta: Quantity,
    /// On-hand quantity after the update.
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationChanged {
    pub warehouse_id: WarehouseId,
    pub key: QuantKey,
    pub delta: Quantity,
    /// Reserved quantity after the change.
    pub reserved: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MoveStateChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveStateChanged {
    pub warehouse_id: WarehouseId,
    pub move_id: MoveId,
    pub product_id: ProductId,
    pub from: MoveState,
    pub to: MoveState,
    pub reserved: Quantity,
    pub done: Quantity,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    /// Unprocessed remainder of the demand.
    Backorder,
    /// Quantity processed above the reservation.
    Extra,
}

/// Event: MoveSplit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveSplit {
    pub warehouse_id: WarehouseId,
    pub move_id: MoveId,
    pub new_move_id: MoveId,
    pub kind: SplitKind,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BackorderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderCreated {
    pub warehouse_id: WarehouseId,
    pub transfer_id: TransferId,
    pub backorder_id: TransferId,
    pub moves: Vec<MoveId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentConfirmed {
    pub warehouse_id: WarehouseId,
    pub adjustment_id: AdjustmentId,
    /// Inventory moves that applied the counted differences.
    pub moves: Vec<MoveId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    QuantUpdated(QuantUpdated),
    ReservationChanged(ReservationChanged),
    MoveStateChanged(MoveStateChanged),
    MoveSplit(MoveSplit),
    BackorderCreated(BackorderCreated),
    AdjustmentConfirmed(AdjustmentConfirmed),
}

impl StockEvent {
    pub fn warehouse_id(&self) -> WarehouseId {
        match self {
            StockEvent::QuantUpdated(e) => e.warehouse_id,
            StockEvent::ReservationChanged(e) => e.warehouse_id,
            StockEvent::MoveStateChanged(e) => e.warehouse_id,
            StockEvent::MoveSplit(e) => e.warehouse_id,
            StockEvent::BackorderCreated(e) => e.warehouse_id,
            StockEvent::AdjustmentConfirmed(e) => e.warehouse_id,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::QuantUpdated(_) => "stock.quant.updated",
            StockEvent::ReservationChanged(_) => "stock.quant.reservation_changed",
            StockEvent::MoveStateChanged(_) => "stock.move.state_changed",
            StockEvent::MoveSplit(_) => "stock.move.split",
            StockEvent::BackorderCreated(_) => "stock.transfer.backorder_created",
            StockEvent::AdjustmentConfirmed(_) => "stock.adjustment.confirmed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::QuantUpdated(e) => e.occurred_at,
            StockEvent::ReservationChanged(e) => e.occurred_at,
            StockEvent::MoveStateChanged(e) => e.occurred_at,
            StockEvent::MoveSplit(e) => e.occurred_at,
            StockEvent::BackorderCreated(e) => e.occurred_at,
            StockEvent::AdjustmentConfirmed(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockledger_core::LocationId;

    #[test]
    fn event_payload_serializes_with_snake_case_states() {
        let event = StockEvent::MoveStateChanged(MoveStateChanged {
            warehouse_id: WarehouseId::new(),
            move_id: MoveId::new(),
            product_id: ProductId::new(),
            from: MoveState::Assigned,
            to: MoveState::PartiallyAvailable,
            reserved: dec!(8),
            done: dec!(0),
            occurred_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["MoveStateChanged"]["to"], "partially_available");
        assert_eq!(event.event_type(), "stock.move.state_changed");
    }

    #[test]
    fn quant_update_round_trips_through_json() {
        let event = StockEvent::QuantUpdated(QuantUpdated {
            warehouse_id: WarehouseId::new(),
            key: QuantKey::new(ProductId::new(), LocationId::new()),
            delta: dec!(-2.5),
            quantity: dec!(7.5),
            occurred_at: Utc::now(),
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: StockEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
