//! Move completion: validation, splitting and the ledger updates of `done`.

use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use stockledger_core::{DomainError, LotId, MoveId, Quantity, TransferId, quantity};

use super::Warehouse;
use crate::catalog::Tracking;
use crate::error::{StockError, StockResult};
use crate::event::{MoveSplit, SplitKind, StockEvent};
use crate::quant::{QuantFilter, QuantKey};
use crate::stock_move::{MoveLine, MoveState, StockMove};

/// Moves created while completing a move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveCompletion {
    /// Unprocessed remainder, carrying the unused reservation.
    pub backorder_move: Option<MoveId>,
    /// Quantity processed above the demand.
    pub extra_move: Option<MoveId>,
}

impl Warehouse {
    /// Process the done quantities of a move.
    ///
    /// A remainder below the demand is split into a new move that keeps the
    /// unused reservation; a surplus is split into an extra move that is
    /// completed right away and may drive the source negative. Everything is
    /// validated before the ledger is touched.
    pub fn complete_move(&mut self, id: MoveId) -> StockResult<MoveCompletion> {
        let mv = self.stock_move(id)?;
        if mv.state.is_final() {
            return Err(StockError::invalid_state(mv.label(), mv.state.as_str(), "complete"));
        }
        if mv.quantity_done().is_zero() {
            return Err(StockError::NothingToDo(mv.label()));
        }
        self.validate_done_lines(mv)?;
        if mv.state == MoveState::Draft {
            self.confirm_move(id)?;
        }

        let mut outcome = MoveCompletion::default();
        let mv = self.stock_move(id)?;
        let extra = mv.quantity_done() - mv.demand;
        if quantity::is_positive(extra) {
            outcome.extra_move = Some(self.split_extra(id, extra)?);
        }
        let mv = self.stock_move(id)?;
        let remainder = mv.demand - mv.quantity_done();
        if quantity::is_positive(remainder) {
            outcome.backorder_move = Some(self.split_remainder(id, remainder)?);
        }

        self.apply_done(id)?;
        let mv = self.move_mut(id)?;
        mv.demand = mv.quantity_done();
        mv.prune_lines();
        self.set_move_state(id, MoveState::Done)?;

        if let Some(extra_id) = outcome.extra_move {
            self.complete_move(extra_id)?;
        }

        let dest_moves = self.stock_move(id)?.dest_moves.clone();
        for dest in dest_moves {
            let state = self.stock_move(dest)?.state;
            if state.can_reserve() {
                self.assign_move(dest)?;
            }
        }
        self.refresh_transfer_of(id)?;
        Ok(outcome)
    }

    /// Lot and serial checks on the lines that carry a done quantity.
    pub(super) fn validate_done_lines(&self, mv: &StockMove) -> StockResult<()> {
        let tracking = self.catalog.tracking(mv.product_id)?;
        let dest_internal = self.catalog.usage(mv.location_dest_id)?.is_internal();
        let mut serials = HashSet::new();

        for line in mv.lines.iter().filter(|l| !l.done.is_zero()) {
            if line.done < Quantity::ZERO {
                return Err(DomainError::quantity("done quantity cannot be negative").into());
            }
            let Some(lot) = line.lot_id else {
                if tracking.is_tracked() && !mv.is_inventory {
                    return Err(StockError::LotRequired {
                        product: mv.product_id,
                    });
                }
                continue;
            };
            self.catalog.check_lot(mv.product_id, Some(lot))?;

            if tracking == Tracking::Serial {
                if line.done != Quantity::ONE || !serials.insert(lot) {
                    return Err(StockError::DuplicateSerial { lot });
                }
                if dest_internal && self.serial_held_elsewhere(mv, lot)? {
                    return Err(StockError::DuplicateSerial { lot });
                }
            }
        }
        Ok(())
    }

    /// Whether the serial is on hand at an internal location other than the
    /// move's source.
    fn serial_held_elsewhere(&self, mv: &StockMove, lot: LotId) -> StockResult<bool> {
        let mut held = Quantity::ZERO;
        for q in self.ledger.quants() {
            let key = q.key();
            if key.product_id != mv.product_id
                || key.lot_id != Some(lot)
                || key.location_id == mv.location_id
            {
                continue;
            }
            if self.catalog.usage(key.location_id)?.is_internal() {
                held += q.quantity();
            }
        }
        Ok(quantity::is_positive(held))
    }

    /// Reduce the reservations other moves hold at exactly `key` by `qty`.
    ///
    /// Moves of other transfers give way first, then the most recent moves.
    /// Reduced moves have their state recomputed.
    pub(super) fn free_reservation(
        &mut self,
        key: &QuantKey,
        qty: Quantity,
        except: Option<MoveId>,
        transfer: Option<TransferId>,
    ) -> StockResult<()> {
        let mut candidates: Vec<(bool, Reverse<u64>, MoveId)> = self
            .moves
            .values()
            .filter(|m| Some(m.id) != except && !m.state.is_final())
            .filter(|m| m.product_id == key.product_id && m.location_id == key.location_id)
            .filter(|m| {
                m.lines.iter().any(|l| {
                    quantity::is_positive(l.reserved)
                        && l.source_key(m.product_id, m.location_id) == *key
                })
            })
            .map(|m| {
                let same_transfer = transfer.is_some() && m.transfer_id == transfer;
                (same_transfer, Reverse(m.sequence), m.id)
            })
            .collect();
        candidates.sort();

        let mut remaining = qty;
        let exact = QuantFilter::exact(key);
        for (_, _, id) in candidates {
            if !quantity::is_positive(remaining) {
                break;
            }
            let mut released = Quantity::ZERO;
            let mv = self.move_mut(id)?;
            let (product, location) = (mv.product_id, mv.location_id);
            for line in mv
                .lines
                .iter_mut()
                .filter(|l| l.source_key(product, location) == *key)
            {
                let take = line.reserved.min(remaining - released);
                line.reserved -= take;
                released += take;
            }
            mv.prune_lines();

            let held = self.ledger.reserved_quantity(&exact);
            let take = released.min(held);
            if quantity::is_positive(take) {
                self.ledger_mut().release(&exact, take)?;
            }
            remaining -= released;
            self.recompute_move_state(id)?;
            self.refresh_transfer_of(id)?;
        }
        Ok(())
    }

    /// Split `extra` done quantity, taken from the last lines first, into a
    /// new unreserved move.
    fn split_extra(&mut self, id: MoveId, extra: Quantity) -> StockResult<MoveId> {
        let new_id = self.split_move(id, extra, SplitKind::Extra)?;

        let mut taken: Vec<MoveLine> = Vec::new();
        let mv = self.move_mut(id)?;
        let mut left = extra;
        for line in mv.lines.iter_mut().rev() {
            if !quantity::is_positive(left) {
                break;
            }
            let take = line.done.min(left);
            if !quantity::is_positive(take) {
                continue;
            }
            line.done -= take;
            left -= take;
            let mut moved = line.clone();
            moved.reserved = Quantity::ZERO;
            moved.done = take;
            taken.push(moved);
        }
        taken.reverse();

        let extra_move = self.move_mut(new_id)?;
        extra_move.lines = taken;
        Ok(new_id)
    }

    /// Split the unprocessed `remainder` into a new move that inherits the
    /// reservation the done quantities do not use, up to the remainder. The
    /// rest goes back to the ledger.
    fn split_remainder(&mut self, id: MoveId, remainder: Quantity) -> StockResult<MoveId> {
        let new_id = self.split_move(id, remainder, SplitKind::Backorder)?;
        let bypass = self.bypasses_reservation(self.stock_move(id)?.location_id)?;

        let mut inherited: Vec<MoveLine> = Vec::new();
        let mut surplus: Vec<(QuantKey, Quantity)> = Vec::new();
        let mut budget = remainder;
        let mv = self.move_mut(id)?;
        let (product, location) = (mv.product_id, mv.location_id);
        for line in &mut mv.lines {
            let unused = line.reserved - line.done;
            if !quantity::is_positive(unused) {
                continue;
            }
            line.reserved = line.done;
            let carried = unused.min(budget);
            budget -= carried;
            if unused > carried {
                surplus.push((line.source_key(product, location), unused - carried));
            }
            if quantity::is_positive(carried) {
                let mut kept = line.clone();
                kept.reserved = carried;
                kept.done = Quantity::ZERO;
                kept.result_package_id = None;
                inherited.push(kept);
            }
        }

        if !bypass {
            for (key, qty) in surplus {
                let exact = QuantFilter::exact(&key);
                let take = qty.min(self.ledger.reserved_quantity(&exact));
                if quantity::is_positive(take) {
                    self.ledger_mut().release(&exact, take)?;
                }
            }
        }

        let backorder = self.move_mut(new_id)?;
        backorder.lines = inherited;
        self.recompute_move_state(new_id)?;
        Ok(new_id)
    }

    /// Create a confirmed sibling of `id` for `qty` of its demand, linked into
    /// the same chains and transfer.
    fn split_move(&mut self, id: MoveId, qty: Quantity, kind: SplitKind) -> StockResult<MoveId> {
        let new_id = MoveId::new();
        let sequence = self.next_sequence();
        let mv = self.move_mut(id)?;
        let sibling = mv.split_off(new_id, sequence, qty);
        if kind == SplitKind::Backorder {
            mv.demand -= qty;
        }

        for origin in &sibling.origin_moves {
            if let Some(origin) = self.touch_move(*origin) {
                origin.dest_moves.push(new_id);
            }
        }
        for dest in &sibling.dest_moves {
            if let Some(dest) = self.touch_move(*dest) {
                dest.origin_moves.push(new_id);
            }
        }
        if let Some(transfer_id) = sibling.transfer_id {
            if let Some(transfer) = self.touch_transfer(transfer_id) {
                transfer.moves.push(new_id);
            }
        }
        self.insert_move(new_id, sibling);

        let event = StockEvent::MoveSplit(MoveSplit {
            warehouse_id: self.id,
            move_id: id,
            new_move_id: new_id,
            kind,
            quantity: qty,
            occurred_at: self.now(),
        });
        self.emit(event);
        Ok(new_id)
    }

    /// Ledger side of completion, line by line.
    fn apply_done(&mut self, id: MoveId) -> StockResult<()> {
        let bypass = self.bypasses_reservation(self.stock_move(id)?.location_id)?;
        if !bypass {
            self.release_move_reservation_keeping_history(id)?;
        }

        let mv = self.stock_move(id)?;
        let (product, src, dest, transfer) =
            (mv.product_id, mv.location_id, mv.location_dest_id, mv.transfer_id);
        let lines: Vec<MoveLine> = mv.lines.iter().filter(|l| !l.done.is_zero()).cloned().collect();
        let now = self.now();

        for line in lines {
            let src_key = line.source_key(product, src);
            if !bypass {
                let free = self.ledger.available_quantity(
                    &QuantFilter::exact(&src_key),
                    Tracking::None,
                    false,
                );
                let to_free = line.done - free;
                if quantity::is_positive(to_free) {
                    self.free_reservation(&src_key, to_free, Some(id), transfer)?;
                }
            }

            let taken = self.ledger_mut().update_quantity(&src_key, -line.done, None, now)?;
            if taken.available < Quantity::ZERO && src_key.lot_id.is_some() {
                self.compensate_lot_from_untracked(&src_key, -taken.available, now)?;
            }

            let dest_key = line.dest_key(product, dest);
            self.ledger
                .update_quantity(&dest_key, line.done, Some(taken.in_date), now)?;
        }
        Ok(())
    }

    /// A lot quant gone negative takes units from untracked stock at the same
    /// place.
    fn compensate_lot_from_untracked(
        &mut self,
        lot_key: &QuantKey,
        missing: Quantity,
        now: DateTime<Utc>,
    ) -> StockResult<()> {
        let untracked = lot_key.with_lot(None::<LotId>);
        let free = self
            .ledger
            .available_quantity(&QuantFilter::exact(&untracked), Tracking::None, false);
        let take = free.min(missing);
        if quantity::is_positive(take) {
            self.ledger_mut().update_quantity(&untracked, -take, None, now)?;
            self.ledger_mut().update_quantity(lot_key, take, None, now)?;
        }
        Ok(())
    }

    /// Release the ledger side of the move's reservation while leaving the
    /// reserved figures on the lines.
    fn release_move_reservation_keeping_history(&mut self, id: MoveId) -> StockResult<()> {
        let mv = self.stock_move(id)?;
        let held: Vec<(QuantKey, Quantity)> = mv
            .lines
            .iter()
            .filter(|l| quantity::is_positive(l.reserved))
            .map(|l| (l.source_key(mv.product_id, mv.location_id), l.reserved))
            .collect();
        for (key, qty) in held {
            let exact = QuantFilter::exact(&key);
            let take = qty.min(self.ledger.reserved_quantity(&exact));
            if quantity::is_positive(take) {
                self.ledger_mut().release(&exact, take)?;
            }
        }
        Ok(())
    }
}
