use serde::{Deserialize, Serialize};

use stockledger_core::{
    AdjustmentId, AggregateRoot, LocationId, LotId, MoveId, OwnerId, PackageId, ProductId,
    Quantity,
};

use crate::quant::QuantKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentState {
    Draft,
    /// Lines computed, counting in progress.
    InProgress,
    Done,
    Cancelled,
}

impl AdjustmentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentState::Draft => "draft",
            AdjustmentState::InProgress => "in_progress",
            AdjustmentState::Done => "done",
            AdjustmentState::Cancelled => "cancelled",
        }
    }
}

/// Which stock an adjustment counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentFilter {
    pub product_id: Option<ProductId>,
    pub lot_id: Option<LotId>,
    pub owner_id: Option<OwnerId>,
    pub package_id: Option<PackageId>,
    /// Add zero lines for products without stock at the location.
    pub include_exhausted: bool,
}

impl AdjustmentFilter {
    pub fn product(mut self, product: ProductId) -> Self {
        self.product_id = Some(product);
        self
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

    pub fn include_exhausted(mut self) -> Self {
        self.include_exhausted = true;
        self
    }

    pub(crate) fn matches(&self, key: &QuantKey) -> bool {
        fn loose<T: PartialEq>(wanted: Option<T>, actual: Option<T>) -> bool {
            wanted.is_none() || wanted == actual
        }
        loose(self.product_id, Some(key.product_id))
            && loose(self.lot_id, key.lot_id)
            && loose(self.owner_id, key.owner_id)
            && loose(self.package_id, key.package_id)
    }
}

/// One counted quant key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentLine {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub lot_id: Option<LotId>,
    pub owner_id: Option<OwnerId>,
    pub package_id: Option<PackageId>,
    /// Quantity on hand when the line was computed.
    pub theoretical: Quantity,
    pub counted: Quantity,
}

impl AdjustmentLine {
    pub(crate) fn from_key(key: &QuantKey, theoretical: Quantity) -> Self {
        Self {
            product_id: key.product_id,
            location_id: key.location_id,
            lot_id: key.lot_id,
            owner_id: key.owner_id,
            package_id: key.package_id,
            theoretical,
            counted: theoretical,
        }
    }

    pub fn key(&self) -> QuantKey {
        QuantKey::new(self.product_id, self.location_id)
            .with_lot(self.lot_id)
            .with_owner(self.owner_id)
            .with_package(self.package_id)
    }

    /// counted − theoretical.
    pub fn delta(&self) -> Quantity {
        self.counted - self.theoretical
    }
}

/// A line added or re-keyed by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdjustmentLine {
    pub product_id: ProductId,
    pub lot_id: Option<LotId>,
    pub owner_id: Option<OwnerId>,
    pub package_id: Option<PackageId>,
    pub counted: Quantity,
}

impl NewAdjustmentLine {
    pub fn new(product_id: ProductId, counted: Quantity) -> Self {
        Self {
            product_id,
            lot_id: None,
            owner_id: None,
            package_id: None,
            counted,
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

    pub(crate) fn key(&self, location: LocationId) -> QuantKey {
        QuantKey::new(self.product_id, location)
            .with_lot(self.lot_id)
            .with_owner(self.owner_id)
            .with_package(self.package_id)
    }
}

/// Aggregate root: InventoryAdjustment (a physical count of one location).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryAdjustment {
    pub(crate) id: AdjustmentId,
    pub(crate) version: u64,
    pub(crate) name: String,
    pub(crate) location_id: LocationId,
    pub(crate) filter: AdjustmentFilter,
    pub(crate) state: AdjustmentState,
    pub(crate) lines: Vec<AdjustmentLine>,
    pub(crate) moves: Vec<MoveId>,
}

impl InventoryAdjustment {
    pub(crate) fn new(
        id: AdjustmentId,
        name: String,
        location_id: LocationId,
        filter: AdjustmentFilter,
    ) -> Self {
        Self {
            id,
            version: 0,
            name,
            location_id,
            filter,
            state: AdjustmentState::Draft,
            lines: Vec::new(),
            moves: Vec::new(),
        }
    }

    pub fn id_typed(&self) -> AdjustmentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn filter(&self) -> &AdjustmentFilter {
        &self.filter
    }

    pub fn state(&self) -> AdjustmentState {
        self.state
    }

    pub fn lines(&self) -> &[AdjustmentLine] {
        &self.lines
    }

    /// Inventory moves generated on confirmation.
    pub fn moves(&self) -> &[MoveId] {
        &self.moves
    }

    /// Line of the given key, if counted.
    pub fn line_for(&self, key: &QuantKey) -> Option<&AdjustmentLine> {
        self.lines.iter().find(|l| l.key() == *key)
    }

    pub(crate) fn label(&self) -> String {
        format!("inventory adjustment '{}'", self.name)
    }

    pub(crate) fn set_state(&mut self, state: AdjustmentState) {
        self.state = state;
        self.version += 1;
    }

    pub(crate) fn touch(&mut self) {
        self.version += 1;
    }
}

impl AggregateRoot for InventoryAdjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
