use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{
    AggregateRoot, DomainError, LocationId, LotId, MoveId, OwnerId, PackageId, ProductId,
    Quantity, TransferId, quantity,
};

use crate::quant::{QuantFilter, QuantKey};

/// Stock move lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveState {
    Draft,
    /// Waiting for origin moves to bring the goods.
    Waiting,
    Confirmed,
    PartiallyAvailable,
    Assigned,
    Done,
    Cancelled,
}

impl MoveState {
    pub fn as_str(self) -> &'static str {
        match self {
            MoveState::Draft => "draft",
            MoveState::Waiting => "waiting",
            MoveState::Confirmed => "confirmed",
            MoveState::PartiallyAvailable => "partially_available",
            MoveState::Assigned => "assigned",
            MoveState::Done => "done",
            MoveState::Cancelled => "cancelled",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, MoveState::Done | MoveState::Cancelled)
    }

    /// States in which the move may (still) reserve stock.
    pub fn can_reserve(self) -> bool {
        matches!(
            self,
            MoveState::Waiting | MoveState::Confirmed | MoveState::PartiallyAvailable
        )
    }
}

impl core::fmt::Display for MoveState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserved and processed quantity of a move for one quant key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveLine {
    pub lot_id: Option<LotId>,
    pub owner_id: Option<OwnerId>,
    pub package_id: Option<PackageId>,
    /// Package the goods are put in at the destination.
    pub result_package_id: Option<PackageId>,
    pub reserved: Quantity,
    pub done: Quantity,
}

impl MoveLine {
    fn new(lot_id: Option<LotId>, owner_id: Option<OwnerId>, package_id: Option<PackageId>) -> Self {
        Self {
            lot_id,
            owner_id,
            package_id,
            result_package_id: None,
            reserved: Decimal::ZERO,
            done: Decimal::ZERO,
        }
    }

    fn same_source(&self, lot: Option<LotId>, owner: Option<OwnerId>, package: Option<PackageId>) -> bool {
        self.lot_id == lot && self.owner_id == owner && self.package_id == package
    }

    /// Key of the quant the goods are taken from.
    pub fn source_key(&self, product: ProductId, location: LocationId) -> QuantKey {
        QuantKey::new(product, location)
            .with_lot(self.lot_id)
            .with_owner(self.owner_id)
            .with_package(self.package_id)
    }

    /// Key of the quant the goods end up in.
    pub fn dest_key(&self, product: ProductId, location: LocationId) -> QuantKey {
        QuantKey::new(product, location)
            .with_lot(self.lot_id)
            .with_owner(self.owner_id)
            .with_package(self.result_package_id)
    }
}

/// Processed quantity for one quant key, as entered by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneLine {
    pub lot_id: Option<LotId>,
    pub owner_id: Option<OwnerId>,
    pub package_id: Option<PackageId>,
    pub result_package_id: Option<PackageId>,
    pub quantity: Quantity,
}

impl DoneLine {
    pub fn new(quantity: Quantity) -> Self {
        Self {
            lot_id: None,
            owner_id: None,
            package_id: None,
            result_package_id: None,
            quantity,
        }
    }

    pub fn lot(mut self, lot: LotId) -> Self {
        self.lot_id = Some(lot);
        self
    }

    pub fn owner(mut self, owner: OwnerId) -> Self {
        self.owner_id = Some(owner);
        self
    }

    pub fn package(mut self, package: PackageId) -> Self {
        self.package_id = Some(package);
        self
    }

    pub fn into_package(mut self, package: PackageId) -> Self {
        self.result_package_id = Some(package);
        self
    }
}

/// Request to create a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMove {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub location_dest_id: LocationId,
    pub demand: Quantity,
    pub transfer_id: Option<TransferId>,
    /// Only reserve this lot.
    pub lot_id: Option<LotId>,
    /// Only reserve stock owned by this partner.
    pub owner_id: Option<OwnerId>,
    /// Only reserve from this package.
    pub package_id: Option<PackageId>,
    pub origin_moves: Vec<MoveId>,
}

impl NewMove {
    pub fn new(
        product_id: ProductId,
        location_id: LocationId,
        location_dest_id: LocationId,
        demand: Quantity,
    ) -> Self {
        Self {
            product_id,
            location_id,
            location_dest_id,
            demand,
            transfer_id: None,
            lot_id: None,
            owner_id: None,
            package_id: None,
            origin_moves: Vec::new(),
        }
    }

    pub fn in_transfer(mut self, transfer: TransferId) -> Self {
        self.transfer_id = Some(transfer);
        self
    }

    pub fn restrict_lot(mut self, lot: LotId) -> Self {
        self.lot_id = Some(lot);
        self
    }

    pub fn restrict_owner(mut self, owner: OwnerId) -> Self {
        self.owner_id = Some(owner);
        self
    }

    pub fn restrict_package(mut self, package: PackageId) -> Self {
        self.package_id = Some(package);
        self
    }

    /// Chain this move after `origin`: it can only reserve what `origin` delivers.
    pub fn chained_after(mut self, origin: MoveId) -> Self {
        self.origin_moves.push(origin);
        self
    }
}

/// Aggregate root: StockMove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMove {
    pub(crate) id: MoveId,
    /// Creation order inside the warehouse.
    pub(crate) sequence: u64,
    pub(crate) version: u64,
    pub(crate) product_id: ProductId,
    pub(crate) location_id: LocationId,
    pub(crate) location_dest_id: LocationId,
    pub(crate) demand: Quantity,
    pub(crate) state: MoveState,
    pub(crate) lines: Vec<MoveLine>,
    pub(crate) transfer_id: Option<TransferId>,
    pub(crate) lot_id: Option<LotId>,
    pub(crate) owner_id: Option<OwnerId>,
    pub(crate) package_id: Option<PackageId>,
    pub(crate) origin_moves: Vec<MoveId>,
    pub(crate) dest_moves: Vec<MoveId>,
    pub(crate) is_inventory: bool,
    pub(crate) split_from: Option<MoveId>,
}

impl StockMove {
    pub(crate) fn from_request(id: MoveId, sequence: u64, req: NewMove) -> Result<Self, DomainError> {
        if !quantity::is_positive(req.demand) {
            return Err(DomainError::quantity("move demand must be positive"));
        }
        if req.location_id == req.location_dest_id {
            return Err(DomainError::validation(
                "source and destination locations must differ",
            ));
        }
        Ok(Self {
            id,
            sequence,
            version: 0,
            product_id: req.product_id,
            location_id: req.location_id,
            location_dest_id: req.location_dest_id,
            demand: req.demand,
            state: MoveState::Draft,
            lines: Vec::new(),
            transfer_id: req.transfer_id,
            lot_id: req.lot_id,
            owner_id: req.owner_id,
            package_id: req.package_id,
            origin_moves: req.origin_moves,
            dest_moves: Vec::new(),
            is_inventory: false,
            split_from: None,
        })
    }

    /// A new move carrying `demand` of this one, with the same route,
    /// restrictions and chain links. Starts confirmed, without lines.
    pub(crate) fn split_off(&self, id: MoveId, sequence: u64, demand: Quantity) -> Self {
        Self {
            id,
            sequence,
            version: 0,
            product_id: self.product_id,
            location_id: self.location_id,
            location_dest_id: self.location_dest_id,
            demand,
            state: MoveState::Confirmed,
            lines: Vec::new(),
            transfer_id: self.transfer_id,
            lot_id: self.lot_id,
            owner_id: self.owner_id,
            package_id: self.package_id,
            origin_moves: self.origin_moves.clone(),
            dest_moves: self.dest_moves.clone(),
            is_inventory: self.is_inventory,
            split_from: Some(self.id),
        }
    }

    pub fn id_typed(&self) -> MoveId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn location_dest_id(&self) -> LocationId {
        self.location_dest_id
    }

    /// Requested quantity.
    pub fn demand(&self) -> Quantity {
        self.demand
    }

    pub fn state(&self) -> MoveState {
        self.state
    }

    pub fn lines(&self) -> &[MoveLine] {
        &self.lines
    }

    pub fn transfer_id(&self) -> Option<TransferId> {
        self.transfer_id
    }

    pub fn origin_moves(&self) -> &[MoveId] {
        &self.origin_moves
    }

    pub fn dest_moves(&self) -> &[MoveId] {
        &self.dest_moves
    }

    pub fn is_inventory(&self) -> bool {
        self.is_inventory
    }

    /// The move this one was split from (backorder remainder or extra quantity).
    pub fn split_from(&self) -> Option<MoveId> {
        self.split_from
    }

    pub fn reserved_availability(&self) -> Quantity {
        self.lines.iter().map(|l| l.reserved).sum::<Decimal>()
    }

    pub fn quantity_done(&self) -> Quantity {
        self.lines.iter().map(|l| l.done).sum::<Decimal>()
    }

    /// Demand not covered by a reservation yet.
    pub fn missing_reservation(&self) -> Quantity {
        quantity::non_negative(self.demand - self.reserved_availability())
    }

    pub(crate) fn label(&self) -> String {
        format!("move {}", self.id)
    }

    /// Filter of the quants this move may reserve from.
    pub(crate) fn reservation_filter(&self) -> QuantFilter {
        QuantFilter::any(self.product_id, self.location_id)
            .with_lot(self.lot_id)
            .with_owner(self.owner_id)
            .with_package(self.package_id)
    }

    /// State implied by the current reservation.
    pub(crate) fn availability_state(&self, waiting_on_origins: bool) -> MoveState {
        let reserved = self.reserved_availability();
        if reserved >= self.demand {
            MoveState::Assigned
        } else if quantity::is_positive(reserved) {
            MoveState::PartiallyAvailable
        } else if waiting_on_origins {
            MoveState::Waiting
        } else {
            MoveState::Confirmed
        }
    }

    /// Set the state; returns the previous one when it changed.
    pub(crate) fn transition(&mut self, to: MoveState) -> Option<MoveState> {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        self.version += 1;
        Some(from)
    }

    /// Attach a reservation for one quant key.
    pub(crate) fn add_reservation(&mut self, key: &QuantKey, qty: Quantity, per_unit: bool) {
        if !per_unit {
            if let Some(line) = self.lines.iter_mut().find(|l| {
                l.same_source(key.lot_id, key.owner_id, key.package_id)
                    && l.result_package_id.is_none()
                    && l.done.is_zero()
            }) {
                line.reserved += qty;
                return;
            }
        }
        let mut line = MoveLine::new(key.lot_id, key.owner_id, key.package_id);
        line.reserved = qty;
        self.lines.push(line);
    }

    /// Distribute `qty` as done over the reserved lines; any surplus lands on
    /// the last line (or a new line when the move has none).
    pub(crate) fn set_quantity_done(&mut self, qty: Quantity) -> Result<(), DomainError> {
        if qty < Decimal::ZERO {
            return Err(DomainError::quantity("done quantity cannot be negative"));
        }
        let mut remaining = qty;
        for line in &mut self.lines {
            let take = line.reserved.min(remaining);
            line.done = take;
            remaining -= take;
        }
        if quantity::is_positive(remaining) {
            match self.lines.last_mut() {
                Some(line) => line.done += remaining,
                None => {
                    let mut line = MoveLine::new(self.lot_id, self.owner_id, self.package_id);
                    line.done = remaining;
                    self.lines.push(line);
                }
            }
        }
        self.version += 1;
        Ok(())
    }

    /// Set the done quantity of the line for the given key, adding an
    /// unreserved line when there is none.
    pub(crate) fn record_done_line(&mut self, done: DoneLine) -> Result<(), DomainError> {
        if done.quantity < Decimal::ZERO {
            return Err(DomainError::quantity("done quantity cannot be negative"));
        }
        match self
            .lines
            .iter_mut()
            .find(|l| l.same_source(done.lot_id, done.owner_id, done.package_id))
        {
            Some(line) => {
                line.done = done.quantity;
                line.result_package_id = done.result_package_id;
            }
            None => {
                let mut line = MoveLine::new(done.lot_id, done.owner_id, done.package_id);
                line.result_package_id = done.result_package_id;
                line.done = done.quantity;
                self.lines.push(line);
            }
        }
        self.version += 1;
        Ok(())
    }

    /// Drop lines that hold neither a reservation nor a done quantity.
    pub(crate) fn prune_lines(&mut self) {
        self.lines
            .retain(|l| !l.reserved.is_zero() || !l.done.is_zero());
    }
}

impl AggregateRoot for StockMove {
    type Id = MoveId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_move(demand: Quantity) -> StockMove {
        let req = NewMove::new(ProductId::new(), LocationId::new(), LocationId::new(), demand);
        StockMove::from_request(MoveId::new(), 1, req).unwrap()
    }

    #[test]
    fn new_move_starts_in_draft() {
        let mv = test_move(dec!(10));
        assert_eq!(mv.state(), MoveState::Draft);
        assert_eq!(mv.reserved_availability(), dec!(0));
        assert_eq!(mv.version(), 0);
    }

    #[test]
    fn non_positive_demand_is_rejected() {
        let req = NewMove::new(ProductId::new(), LocationId::new(), LocationId::new(), dec!(0));
        let err = StockMove::from_request(MoveId::new(), 1, req).unwrap_err();
        assert!(matches!(err, DomainError::QuantityOutOfRange(_)));
    }

    #[test]
    fn same_source_and_destination_is_rejected() {
        let loc = LocationId::new();
        let req = NewMove::new(ProductId::new(), loc, loc, dec!(1));
        assert!(StockMove::from_request(MoveId::new(), 1, req).is_err());
    }

    #[test]
    fn availability_state_follows_reservation() {
        let mut mv = test_move(dec!(10));
        let key = QuantKey::new(mv.product_id, mv.location_id);

        assert_eq!(mv.availability_state(false), MoveState::Confirmed);
        assert_eq!(mv.availability_state(true), MoveState::Waiting);

        mv.add_reservation(&key, dec!(4), false);
        assert_eq!(mv.availability_state(true), MoveState::PartiallyAvailable);

        mv.add_reservation(&key, dec!(6), false);
        assert_eq!(mv.lines().len(), 1);
        assert_eq!(mv.availability_state(false), MoveState::Assigned);
    }

    #[test]
    fn per_unit_reservations_get_their_own_lines() {
        let mut mv = test_move(dec!(2));
        let key = QuantKey::new(mv.product_id, mv.location_id).with_lot(LotId::new());
        mv.add_reservation(&key, dec!(1), true);
        mv.add_reservation(&key.with_lot(LotId::new()), dec!(1), true);
        assert_eq!(mv.lines().len(), 2);
    }

    #[test]
    fn surplus_done_lands_on_last_line() {
        let mut mv = test_move(dec!(1));
        let key = QuantKey::new(mv.product_id, mv.location_id);
        mv.add_reservation(&key, dec!(1), false);

        mv.set_quantity_done(dec!(3)).unwrap();

        assert_eq!(mv.lines().len(), 1);
        assert_eq!(mv.lines()[0].reserved, dec!(1));
        assert_eq!(mv.lines()[0].done, dec!(3));
        assert_eq!(mv.quantity_done(), dec!(3));
    }

    #[test]
    fn done_without_reservation_creates_a_line() {
        let mut mv = test_move(dec!(5));
        mv.set_quantity_done(dec!(2)).unwrap();
        assert_eq!(mv.lines().len(), 1);
        assert_eq!(mv.lines()[0].reserved, dec!(0));
        assert_eq!(mv.quantity_done(), dec!(2));
    }

    #[test]
    fn record_done_line_targets_matching_key() {
        let mut mv = test_move(dec!(2));
        let lot = LotId::new();
        let key = QuantKey::new(mv.product_id, mv.location_id).with_lot(lot);
        mv.add_reservation(&key, dec!(2), false);

        mv.record_done_line(DoneLine::new(dec!(1)).lot(lot)).unwrap();
        mv.record_done_line(DoneLine::new(dec!(1)).lot(LotId::new())).unwrap();

        assert_eq!(mv.lines().len(), 2);
        assert_eq!(mv.lines()[0].done, dec!(1));
        assert_eq!(mv.lines()[1].reserved, dec!(0));
        assert_eq!(mv.quantity_done(), dec!(2));
    }

    #[test]
    fn transition_bumps_version_only_on_change() {
        let mut mv = test_move(dec!(1));
        assert_eq!(mv.transition(MoveState::Confirmed), Some(MoveState::Draft));
        assert_eq!(mv.transition(MoveState::Confirmed), None);
        assert_eq!(mv.version(), 1);
    }
}
