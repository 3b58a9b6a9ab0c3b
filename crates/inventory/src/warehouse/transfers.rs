use stockledger_core::{MoveId, TransferId, quantity};

use super::Warehouse;
use crate::error::{StockError, StockResult};
use crate::event::{BackorderCreated, StockEvent};
use crate::stock_move::MoveState;
use crate::transfer::{BackorderPolicy, NewTransfer, Transfer, TransferOutcome, TransferState};

impl Warehouse {
    pub fn create_transfer(&mut self, req: NewTransfer) -> StockResult<TransferId> {
        self.catalog.location(req.location_id)?;
        self.catalog.location(req.location_dest_id)?;
        let id = TransferId::new();
        self.insert_transfer(id, Transfer::new(id, req));
        Ok(id)
    }

    /// Confirm every draft move of the transfer.
    pub fn confirm_transfer(&mut self, id: TransferId) -> StockResult<TransferState> {
        let transfer = self.open_transfer(id, "confirm")?;
        if transfer.moves.is_empty() {
            return Err(StockError::NothingToDo(format!("{} has no moves", transfer.label())));
        }
        for move_id in self.moves_in_state(id, |s| s == MoveState::Draft)? {
            self.confirm_move(move_id)?;
        }
        self.refresh_transfer(id)
    }

    /// Reserve stock for every move of the transfer, confirming drafts first.
    pub fn assign_transfer(&mut self, id: TransferId) -> StockResult<TransferState> {
        self.open_transfer(id, "reserve")?;
        for move_id in self.moves_in_state(id, |s| s == MoveState::Draft || s.can_reserve())? {
            self.assign_move(move_id)?;
        }
        self.refresh_transfer(id)
    }

    /// Complete the done quantities of the transfer.
    ///
    /// Moves are validated up front, so a lot or serial error leaves the
    /// transfer untouched. Whatever is left goes to a backorder or is
    /// cancelled, depending on `policy`.
    pub fn validate_transfer(
        &mut self,
        id: TransferId,
        policy: BackorderPolicy,
    ) -> StockResult<TransferOutcome> {
        let transfer = self.open_transfer(id, "validate")?;
        let label = transfer.label();
        let active = self.moves_in_state(id, |s| !s.is_final())?;

        let mut processed = Vec::new();
        let mut untouched = Vec::new();
        for move_id in &active {
            let mv = self.stock_move(*move_id)?;
            if quantity::is_positive(mv.quantity_done()) {
                self.validate_done_lines(mv)?;
                processed.push(*move_id);
            } else {
                untouched.push(*move_id);
            }
        }
        if processed.is_empty() {
            return Err(StockError::NothingToDo(label));
        }

        let mut outcome = TransferOutcome::default();
        let mut remainder = untouched;
        for move_id in processed {
            let completion = self.complete_move(move_id)?;
            remainder.extend(completion.backorder_move);
            outcome.extra_moves.extend(completion.extra_move);
        }
        for move_id in &remainder {
            if self.stock_move(*move_id)?.state == MoveState::Draft {
                self.confirm_move(*move_id)?;
            }
        }

        if !remainder.is_empty() {
            match policy {
                BackorderPolicy::CreateBackorder => {
                    outcome.backorder_id = Some(self.create_backorder(id, &remainder)?);
                }
                BackorderPolicy::CancelRemainder => {
                    for move_id in &remainder {
                        self.cancel_move(*move_id)?;
                    }
                    outcome.cancelled_moves = remainder;
                }
            }
        }
        self.refresh_transfer(id)?;
        Ok(outcome)
    }

    /// Cancel every move of the transfer that is not done.
    pub fn cancel_transfer(&mut self, id: TransferId) -> StockResult<()> {
        self.open_transfer(id, "cancel")?;
        for move_id in self.moves_in_state(id, |s| !s.is_final())? {
            self.cancel_move(move_id)?;
        }
        self.refresh_transfer(id)?;
        Ok(())
    }

    fn open_transfer(&self, id: TransferId, action: &'static str) -> StockResult<&Transfer> {
        let transfer = self.transfer(id)?;
        if transfer.state.is_final() {
            return Err(StockError::invalid_state(
                transfer.label(),
                transfer.state.as_str(),
                action,
            ));
        }
        Ok(transfer)
    }

    fn moves_in_state(
        &self,
        id: TransferId,
        wanted: impl Fn(MoveState) -> bool,
    ) -> StockResult<Vec<MoveId>> {
        let transfer = self.transfer(id)?;
        let mut found = Vec::new();
        for move_id in &transfer.moves {
            if wanted(self.stock_move(*move_id)?.state) {
                found.push(*move_id);
            }
        }
        Ok(found)
    }

    /// Move `moves` out of `id` into a new backorder transfer.
    fn create_backorder(&mut self, id: TransferId, moves: &[MoveId]) -> StockResult<TransferId> {
        let backorder_id = TransferId::new();
        let mut backorder = self.transfer(id)?.backorder(backorder_id);
        backorder.moves = moves.to_vec();
        self.insert_transfer(backorder_id, backorder);

        if let Some(original) = self.touch_transfer(id) {
            original.moves.retain(|m| !moves.contains(m));
        }
        for move_id in moves {
            self.move_mut(*move_id)?.transfer_id = Some(backorder_id);
        }
        self.refresh_transfer(backorder_id)?;

        let event = StockEvent::BackorderCreated(BackorderCreated {
            warehouse_id: self.id,
            transfer_id: id,
            backorder_id,
            moves: moves.to_vec(),
            occurred_at: self.now(),
        });
        self.emit(event);
        Ok(backorder_id)
    }
}
