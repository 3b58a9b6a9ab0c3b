//! Inventory adjustments: count a location and book the differences.

use stockledger_core::{
    AdjustmentId, DomainError, LocationId, LotId, MoveId, ProductId, Quantity, quantity,
};

use super::Warehouse;
use crate::adjustment::{
    AdjustmentFilter, AdjustmentLine, AdjustmentState, InventoryAdjustment, NewAdjustmentLine,
};
use crate::catalog::Tracking;
use crate::error::{StockError, StockResult};
use crate::event::{AdjustmentConfirmed, StockEvent};
use crate::quant::{QuantFilter, QuantKey};
use crate::stock_move::{DoneLine, MoveState, NewMove};

impl Warehouse {
    pub fn create_adjustment(
        &mut self,
        name: impl Into<String>,
        location_id: LocationId,
        filter: AdjustmentFilter,
    ) -> StockResult<AdjustmentId> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("adjustment name cannot be empty").into());
        }
        self.catalog.location(location_id)?;
        if let Some(product) = filter.product_id {
            self.catalog.product(product)?;
            self.catalog.check_lot(product, filter.lot_id)?;
        } else if filter.lot_id.is_some() {
            return Err(DomainError::validation("a lot filter needs a product filter").into());
        }

        let id = AdjustmentId::new();
        self.insert_adjustment(id, InventoryAdjustment::new(id, name, location_id, filter));
        Ok(id)
    }

    /// Snapshot the theoretical quantities and open the count.
    pub fn start_adjustment(&mut self, id: AdjustmentId) -> StockResult<()> {
        let adjustment = self.adjustment(id)?;
        if adjustment.state != AdjustmentState::Draft {
            return Err(StockError::invalid_state(
                adjustment.label(),
                adjustment.state.as_str(),
                "start",
            ));
        }
        let location = adjustment.location_id;
        let filter = adjustment.filter;

        let mut lines: Vec<AdjustmentLine> = self
            .ledger
            .quants()
            .filter(|q| q.key().location_id == location && filter.matches(q.key()))
            .map(|q| AdjustmentLine::from_key(q.key(), q.quantity()))
            .collect();

        if filter.include_exhausted {
            let mut products: Vec<ProductId> = match filter.product_id {
                Some(product) => vec![product],
                None => self.catalog.products().map(|p| p.id).collect(),
            };
            products.sort();
            for product in products {
                if lines.iter().any(|l| l.product_id == product) {
                    continue;
                }
                let key = QuantKey::new(product, location)
                    .with_lot(filter.lot_id)
                    .with_owner(filter.owner_id)
                    .with_package(filter.package_id);
                lines.push(AdjustmentLine::from_key(&key, Quantity::ZERO));
            }
        }

        let adjustment = self.adjustment_mut(id)?;
        adjustment.lines = lines;
        adjustment.set_state(AdjustmentState::InProgress);
        Ok(())
    }

    pub fn set_counted(&mut self, id: AdjustmentId, line: usize, counted: Quantity) -> StockResult<()> {
        let adjustment = self.counting(id, "count")?;
        let current = adjustment
            .lines
            .get(line)
            .ok_or_else(|| DomainError::validation(format!("no line {line}")))?;
        self.check_count(current.product_id, current.lot_id, counted)?;

        let adjustment = self.adjustment_mut(id)?;
        adjustment.lines[line].counted = counted;
        adjustment.touch();
        Ok(())
    }

    /// Re-key a line. The theoretical quantity is recomputed for the new key.
    pub fn update_line(
        &mut self,
        id: AdjustmentId,
        line: usize,
        update: NewAdjustmentLine,
    ) -> StockResult<()> {
        let adjustment = self.counting(id, "edit lines")?;
        if line >= adjustment.lines.len() {
            return Err(DomainError::validation(format!("no line {line}")).into());
        }
        let key = update.key(adjustment.location_id);
        let clash = adjustment
            .lines
            .iter()
            .enumerate()
            .any(|(i, l)| i != line && l.key() == key);
        if clash {
            return Err(DomainError::conflict("another line already counts this key").into());
        }
        let fresh = self.counted_line(&key, &update)?;

        let adjustment = self.adjustment_mut(id)?;
        adjustment.lines[line] = fresh;
        adjustment.touch();
        Ok(())
    }

    /// Count a key the adjustment did not list. Returns the line index.
    pub fn add_line(&mut self, id: AdjustmentId, new: NewAdjustmentLine) -> StockResult<usize> {
        let adjustment = self.counting(id, "edit lines")?;
        let key = new.key(adjustment.location_id);
        if adjustment.line_for(&key).is_some() {
            return Err(DomainError::conflict("another line already counts this key").into());
        }
        let fresh = self.counted_line(&key, &new)?;

        let adjustment = self.adjustment_mut(id)?;
        adjustment.lines.push(fresh);
        adjustment.touch();
        Ok(adjustment.lines.len() - 1)
    }

    /// Book every counted difference as a completed inventory move against
    /// the loss location. Returns the generated moves.
    pub fn confirm_adjustment(&mut self, id: AdjustmentId) -> StockResult<Vec<MoveId>> {
        let adjustment = self.counting(id, "confirm")?;
        let location = adjustment.location_id;
        let lines = adjustment.lines.clone();

        for line in &lines {
            self.check_count(line.product_id, line.lot_id, line.counted)?;
            self.check_serial_count(line)?;
        }

        let mut moves = Vec::new();
        for line in lines.iter().filter(|l| !l.delta().is_zero()) {
            let delta = line.delta();
            let (from, to) = if delta > Quantity::ZERO {
                (self.loss_location, location)
            } else {
                (location, self.loss_location)
            };
            let mut req = NewMove::new(line.product_id, from, to, delta.abs());
            req.lot_id = line.lot_id;
            req.owner_id = line.owner_id;
            req.package_id = line.package_id;

            let move_id = self.create_move(req)?;
            self.move_mut(move_id)?.is_inventory = true;
            self.set_move_state(move_id, MoveState::Confirmed)?;

            let mut done = DoneLine::new(delta.abs());
            done.lot_id = line.lot_id;
            done.owner_id = line.owner_id;
            done.package_id = line.package_id;
            done.result_package_id = line.package_id;
            self.record_done_line(move_id, done)?;
            self.complete_move(move_id)?;
            moves.push(move_id);
        }

        let adjustment = self.adjustment_mut(id)?;
        adjustment.moves = moves.clone();
        adjustment.set_state(AdjustmentState::Done);

        let event = StockEvent::AdjustmentConfirmed(AdjustmentConfirmed {
            warehouse_id: self.id,
            adjustment_id: id,
            moves: moves.clone(),
            occurred_at: self.now(),
        });
        self.emit(event);
        Ok(moves)
    }

    /// Discard an adjustment that was not confirmed.
    pub fn cancel_adjustment(&mut self, id: AdjustmentId) -> StockResult<()> {
        let adjustment = self.adjustment(id)?;
        if matches!(
            adjustment.state,
            AdjustmentState::Done | AdjustmentState::Cancelled
        ) {
            return Err(StockError::invalid_state(
                adjustment.label(),
                adjustment.state.as_str(),
                "cancel",
            ));
        }
        let adjustment = self.adjustment_mut(id)?;
        adjustment.lines.clear();
        adjustment.set_state(AdjustmentState::Cancelled);
        Ok(())
    }

    fn adjustment_mut(&mut self, id: AdjustmentId) -> StockResult<&mut InventoryAdjustment> {
        self.touch_adjustment(id)
            .ok_or(StockError::UnknownAdjustment(id))
    }

    fn counting(&self, id: AdjustmentId, action: &'static str) -> StockResult<&InventoryAdjustment> {
        let adjustment = self.adjustment(id)?;
        if adjustment.state != AdjustmentState::InProgress {
            return Err(StockError::invalid_state(
                adjustment.label(),
                adjustment.state.as_str(),
                action,
            ));
        }
        Ok(adjustment)
    }

    fn check_count(
        &self,
        product: ProductId,
        lot: Option<LotId>,
        counted: Quantity,
    ) -> StockResult<()> {
        if counted < Quantity::ZERO {
            return Err(DomainError::quantity("counted quantity cannot be negative").into());
        }
        self.catalog.product(product)?;
        self.catalog.check_lot(product, lot)?;
        if let Some(lot) = lot {
            if self.catalog.tracking(product)? == Tracking::Serial && counted > Quantity::ONE {
                return Err(StockError::DuplicateSerial { lot });
            }
        }
        Ok(())
    }

    /// A serial counted here must not be on hand at another internal location.
    fn check_serial_count(&self, line: &AdjustmentLine) -> StockResult<()> {
        let Some(lot) = line.lot_id else {
            return Ok(());
        };
        if self.catalog.tracking(line.product_id)? != Tracking::Serial
            || !quantity::is_positive(line.delta())
        {
            return Ok(());
        }
        for q in self.ledger.quants() {
            let key = q.key();
            if key.product_id == line.product_id
                && key.lot_id == Some(lot)
                && key.location_id != line.location_id
                && quantity::is_positive(q.quantity())
                && self.catalog.usage(key.location_id)?.is_internal()
            {
                return Err(StockError::DuplicateSerial { lot });
            }
        }
        Ok(())
    }

    fn counted_line(&self, key: &QuantKey, new: &NewAdjustmentLine) -> StockResult<AdjustmentLine> {
        self.check_count(new.product_id, new.lot_id, new.counted)?;
        let theoretical = self.ledger.quantity(&QuantFilter::exact(key));
        let mut line = AdjustmentLine::from_key(key, theoretical);
        line.counted = new.counted;
        Ok(line)
    }
}
