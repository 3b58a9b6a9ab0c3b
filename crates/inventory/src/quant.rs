use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{
    Entity, LocationId, LotId, OwnerId, PackageId, ProductId, Quantity, ValueObject,
};

/// Row identifier of a quant. Assigned in creation order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuantId(pub u64);

impl core::fmt::Display for QuantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "quant#{}", self.0)
    }
}

/// The dimensions a quant is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantKey {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub lot_id: Option<LotId>,
    pub owner_id: Option<OwnerId>,
    pub package_id: Option<PackageId>,
}

impl ValueObject for QuantKey {}

impl QuantKey {
    pub fn new(product_id: ProductId, location_id: LocationId) -> Self {
        Self {
            product_id,
            location_id,
            lot_id: None,
            owner_id: None,
            package_id: None,
        }
    }

    pub fn with_lot(mut self, lot: impl Into<Option<LotId>>) -> Self {
        self.lot_id = lot.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<Option<OwnerId>>) -> Self {
        self.owner_id = owner.into();
        self
    }

    pub fn with_package(mut self, package: impl Into<Option<PackageId>>) -> Self {
        self.package_id = package.into();
        self
    }

    /// Same lot/owner/package at another location.
    pub fn at(mut self, location_id: LocationId) -> Self {
        self.location_id = location_id;
        self
    }
}

/// On-hand quantity of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quant {
    pub(crate) id: QuantId,
    pub(crate) key: QuantKey,
    pub(crate) quantity: Quantity,
    pub(crate) reserved_quantity: Quantity,
    pub(crate) in_date: DateTime<Utc>,
}

impl Quant {
    pub fn id_typed(&self) -> QuantId {
        self.id
    }

    pub fn key(&self) -> &QuantKey {
        &self.key
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn reserved_quantity(&self) -> Quantity {
        self.reserved_quantity
    }

    pub fn in_date(&self) -> DateTime<Utc> {
        self.in_date
    }

    /// Quantity not yet promised to a move (may be negative).
    pub fn free_quantity(&self) -> Quantity {
        self.quantity - self.reserved_quantity
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.quantity.is_zero() && self.reserved_quantity.is_zero()
    }
}

impl Entity for Quant {
    type Id = QuantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Selects the quants of one product at one location.
///
/// Unset lot/owner/package fields match anything, unless the filter is
/// `strict`, in which case they only match quants where the field is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantFilter {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub lot_id: Option<LotId>,
    pub owner_id: Option<OwnerId>,
    pub package_id: Option<PackageId>,
    pub strict: bool,
}

impl QuantFilter {
    pub fn any(product_id: ProductId, location_id: LocationId) -> Self {
        Self {
            product_id,
            location_id,
            lot_id: None,
            owner_id: None,
            package_id: None,
            strict: false,
        }
    }

    /// Matches exactly the quant stored under `key`.
    pub fn exact(key: &QuantKey) -> Self {
        Self {
            product_id: key.product_id,
            location_id: key.location_id,
            lot_id: key.lot_id,
            owner_id: key.owner_id,
            package_id: key.package_id,
            strict: true,
        }
    }

    pub fn with_lot(mut self, lot: impl Into<Option<LotId>>) -> Self {
        self.lot_id = lot.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<Option<OwnerId>>) -> Self {
        self.owner_id = owner.into();
        self
    }

    pub fn with_package(mut self, package: impl Into<Option<PackageId>>) -> Self {
        self.package_id = package.into();
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn matches(&self, key: &QuantKey) -> bool {
        if key.product_id != self.product_id || key.location_id != self.location_id {
            return false;
        }
        if self.strict {
            return key.lot_id == self.lot_id
                && key.owner_id == self.owner_id
                && key.package_id == self.package_id;
        }
        fn loose<T: PartialEq>(wanted: Option<T>, actual: Option<T>) -> bool {
            wanted.is_none() || wanted == actual
        }
        loose(self.lot_id, key.lot_id)
            && loose(self.owner_id, key.owner_id)
            && loose(self.package_id, key.package_id)
    }
}

/// Order in which quants are consumed by reservations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalStrategy {
    /// Oldest incoming date first.
    #[default]
    Fifo,
    /// Newest incoming date first.
    Lifo,
}

impl core::str::FromStr for RemovalStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(RemovalStrategy::Fifo),
            "lifo" => Ok(RemovalStrategy::Lifo),
            other => Err(format!("unknown removal strategy '{other}'")),
        }
    }
}

/// A slice of quantity reserved against (or released from) one quant key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub key: QuantKey,
    pub quantity: Quantity,
}

/// Sum of the quantities of a set of reservations.
pub fn total_reserved(chunks: &[Reservation]) -> Quantity {
    chunks.iter().map(|r| r.quantity).sum::<Decimal>()
}
