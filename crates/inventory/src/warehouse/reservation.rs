//! Move lifecycle up to completion: creation, confirmation, reservation.

use std::collections::BTreeSet;

use stockledger_core::{MoveId, ProductId, Quantity, quantity};

use super::Warehouse;
use crate::catalog::Tracking;
use crate::error::{StockError, StockResult};
use crate::quant::{QuantFilter, QuantKey};
use crate::stock_move::{DoneLine, MoveState, NewMove, StockMove};

impl Warehouse {
    /// Create a draft move.
    pub fn create_move(&mut self, req: NewMove) -> StockResult<MoveId> {
        self.catalog.product(req.product_id)?;
        self.catalog.location(req.location_id)?;
        self.catalog.location(req.location_dest_id)?;
        self.catalog.check_lot(req.product_id, req.lot_id)?;
        for origin in &req.origin_moves {
            self.stock_move(*origin)?;
        }
        if let Some(transfer_id) = req.transfer_id {
            let transfer = self.transfer(transfer_id)?;
            if transfer.state.is_final() {
                return Err(StockError::invalid_state(
                    transfer.label(),
                    transfer.state.as_str(),
                    "add moves",
                ));
            }
        }

        let id = MoveId::new();
        let sequence = self.next_sequence();
        let mv = StockMove::from_request(id, sequence, req)?;

        for origin in &mv.origin_moves {
            if let Some(origin) = self.touch_move(*origin) {
                origin.dest_moves.push(id);
            }
        }
        let transfer_id = mv.transfer_id;
        self.insert_move(id, mv);
        if let Some(transfer_id) = transfer_id {
            if let Some(transfer) = self.touch_transfer(transfer_id) {
                transfer.moves.push(id);
            }
            self.refresh_transfer(transfer_id)?;
        }
        Ok(id)
    }

    /// draft → confirmed (or waiting while origin moves are pending).
    pub fn confirm_move(&mut self, id: MoveId) -> StockResult<MoveState> {
        let mv = self.stock_move(id)?;
        if mv.state != MoveState::Draft {
            return Err(StockError::invalid_state(
                mv.label(),
                mv.state.as_str(),
                "confirm",
            ));
        }
        let to = if self.waiting_on_origins(mv) {
            MoveState::Waiting
        } else {
            MoveState::Confirmed
        };
        self.set_move_state(id, to)?;
        self.refresh_transfer_of(id)?;
        Ok(to)
    }

    /// Reserve the missing quantity of a move.
    ///
    /// Draft moves are confirmed first. A shortfall is not an error: the
    /// move ends partially available (or confirmed/waiting).
    pub fn assign_move(&mut self, id: MoveId) -> StockResult<MoveState> {
        let state = self.stock_move(id)?.state;
        match state {
            MoveState::Draft => {
                self.confirm_move(id)?;
            }
            MoveState::Assigned => return Ok(state),
            MoveState::Done | MoveState::Cancelled => {
                let mv = self.stock_move(id)?;
                return Err(StockError::invalid_state(mv.label(), state.as_str(), "reserve"));
            }
            _ => {}
        }

        self.reserve_for_move(id)?;
        self.recompute_move_state(id)?;
        self.refresh_transfer_of(id)?;
        Ok(self.stock_move(id)?.state)
    }

    /// Give back everything the move reserved.
    pub fn unreserve_move(&mut self, id: MoveId) -> StockResult<MoveState> {
        let mv = self.stock_move(id)?;
        if mv.state.is_final() {
            return Err(StockError::invalid_state(
                mv.label(),
                mv.state.as_str(),
                "unreserve",
            ));
        }
        self.release_move_reservation(id)?;
        self.move_mut(id)?.prune_lines();
        self.recompute_move_state(id)?;
        self.refresh_transfer_of(id)?;
        Ok(self.stock_move(id)?.state)
    }

    /// Cancel a move, releasing its reservation. Destination moves stop
    /// waiting on it.
    pub fn cancel_move(&mut self, id: MoveId) -> StockResult<()> {
        let mv = self.stock_move(id)?;
        match mv.state {
            MoveState::Cancelled => return Ok(()),
            MoveState::Done => {
                return Err(StockError::invalid_state(mv.label(), "done", "cancel"));
            }
            _ => {}
        }
        let dest_moves = mv.dest_moves.clone();

        self.release_move_reservation(id)?;
        self.move_mut(id)?.prune_lines();
        self.set_move_state(id, MoveState::Cancelled)?;
        for dest in dest_moves {
            self.recompute_move_state(dest)?;
            self.refresh_transfer_of(dest)?;
        }
        self.refresh_transfer_of(id)?;
        Ok(())
    }

    /// Record `qty` as processed, spread over the reserved lines.
    pub fn set_quantity_done(&mut self, id: MoveId, qty: Quantity) -> StockResult<()> {
        self.ensure_open(id, "record quantities")?;
        self.move_mut(id)?.set_quantity_done(qty)?;
        Ok(())
    }

    /// Record the processed quantity of one lot/owner/package.
    pub fn record_done_line(&mut self, id: MoveId, line: DoneLine) -> StockResult<()> {
        let product = self.ensure_open(id, "record quantities")?;
        self.catalog.check_lot(product, line.lot_id)?;
        self.move_mut(id)?.record_done_line(line)?;
        Ok(())
    }

    fn ensure_open(&self, id: MoveId, action: &'static str) -> StockResult<ProductId> {
        let mv = self.stock_move(id)?;
        if mv.state.is_final() {
            return Err(StockError::invalid_state(mv.label(), mv.state.as_str(), action));
        }
        Ok(mv.product_id)
    }

    pub(super) fn refresh_transfer_of(&mut self, id: MoveId) -> StockResult<()> {
        if let Some(transfer_id) = self.stock_move(id)?.transfer_id {
            self.refresh_transfer(transfer_id)?;
        }
        Ok(())
    }

    /// Reserve what the move still misses, without touching its state.
    fn reserve_for_move(&mut self, id: MoveId) -> StockResult<()> {
        let mv = self.stock_move(id)?;
        let missing = mv.missing_reservation();
        if missing.is_zero() {
            return Ok(());
        }

        if self.bypasses_reservation(mv.location_id)? {
            let key = QuantKey::new(mv.product_id, mv.location_id)
                .with_lot(mv.lot_id)
                .with_owner(mv.owner_id)
                .with_package(mv.package_id);
            self.move_mut(id)?.add_reservation(&key, missing, false);
            return Ok(());
        }

        let need = match self.chained_cap(mv) {
            Some(cap) => missing.min(cap),
            None => missing,
        };
        if !quantity::is_positive(need) {
            return Ok(());
        }

        let tracking = self.catalog.tracking(mv.product_id)?;
        let filter = mv.reservation_filter();
        let chunks = self.ledger_mut().reserve(&filter, need, tracking)?;

        let per_unit = tracking == Tracking::Serial;
        let mv = self.move_mut(id)?;
        for chunk in &chunks {
            if per_unit {
                let mut left = chunk.quantity;
                while left >= Quantity::ONE {
                    mv.add_reservation(&chunk.key, Quantity::ONE, true);
                    left -= Quantity::ONE;
                }
                if quantity::is_positive(left) {
                    mv.add_reservation(&chunk.key, left, true);
                }
            } else {
                mv.add_reservation(&chunk.key, chunk.quantity, false);
            }
        }
        Ok(())
    }

    /// How much a chained move may still reserve: what its origins delivered
    /// minus what the moves fed by those origins already hold or consumed.
    /// `None` when the move is not chained (or every origin was cancelled).
    fn chained_cap(&self, mv: &StockMove) -> Option<Quantity> {
        let origins: Vec<&StockMove> = mv
            .origin_moves
            .iter()
            .filter_map(|id| self.moves.get(id))
            .filter(|m| m.state != MoveState::Cancelled)
            .collect();
        if origins.is_empty() {
            return None;
        }

        let delivered: Quantity = origins
            .iter()
            .filter(|m| m.state == MoveState::Done)
            .map(|m| m.quantity_done())
            .sum();

        let fed: BTreeSet<MoveId> = origins
            .iter()
            .flat_map(|m| m.dest_moves.iter().copied())
            .collect();
        let consumed: Quantity = fed
            .iter()
            .filter_map(|id| self.moves.get(id))
            .map(|m| match m.state {
                MoveState::Cancelled => Quantity::ZERO,
                MoveState::Done => m.quantity_done(),
                _ => m.reserved_availability(),
            })
            .sum();

        Some(quantity::non_negative(delivered - consumed))
    }

    /// Release the ledger reservations held by the move's lines.
    pub(super) fn release_move_reservation(&mut self, id: MoveId) -> StockResult<()> {
        let mv = self.stock_move(id)?;
        let bypass = self.bypasses_reservation(mv.location_id)?;
        let held: Vec<(QuantKey, Quantity)> = mv
            .lines
            .iter()
            .filter(|l| quantity::is_positive(l.reserved))
            .map(|l| (l.source_key(mv.product_id, mv.location_id), l.reserved))
            .collect();

        if !bypass {
            for (key, qty) in held {
                let exact = QuantFilter::exact(&key);
                let take = qty.min(self.ledger.reserved_quantity(&exact));
                if quantity::is_positive(take) {
                    self.ledger_mut().release(&exact, take)?;
                }
            }
        }
        for line in &mut self.move_mut(id)?.lines {
            line.reserved = Quantity::ZERO;
        }
        Ok(())
    }
}
