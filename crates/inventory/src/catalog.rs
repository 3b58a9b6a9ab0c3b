use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, LocationId, LotId, ProductId};

use crate::error::{StockError, StockResult};

/// How individual units of a product are identified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tracking {
    #[default]
    None,
    /// Units share a lot number.
    Lot,
    /// Every unit carries its own serial number.
    Serial,
}

impl Tracking {
    pub fn is_tracked(self) -> bool {
        !matches!(self, Tracking::None)
    }
}

/// A stockable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub tracking: Tracking,
}

impl Product {
    pub fn new(name: impl Into<String>, tracking: Tracking) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            tracking,
        }
    }
}

/// What a location represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationUsage {
    /// Physical stock owned by the company.
    Internal,
    /// Stock between two warehouses.
    Transit,
    Supplier,
    Customer,
    /// Counterpart of inventory adjustments (losses and gains).
    Inventory,
    Production,
}

impl LocationUsage {
    /// Virtual locations have unlimited stock: moves leaving them are
    /// available immediately and never reserve quants.
    pub fn bypasses_reservation(self) -> bool {
        matches!(
            self,
            LocationUsage::Supplier
                | LocationUsage::Customer
                | LocationUsage::Inventory
                | LocationUsage::Production
        )
    }

    pub fn is_internal(self) -> bool {
        matches!(self, LocationUsage::Internal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub usage: LocationUsage,
}

impl Location {
    pub fn new(name: impl Into<String>, usage: LocationUsage) -> Self {
        Self {
            id: LocationId::new(),
            name: name.into(),
            usage,
        }
    }
}

/// A lot or serial number. Always bound to a single product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub name: String,
    pub product_id: ProductId,
}

impl Lot {
    pub fn new(name: impl Into<String>, product_id: ProductId) -> Self {
        Self {
            id: LotId::new(),
            name: name.into(),
            product_id,
        }
    }
}

/// Registry of the master data the ledger refers to.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: HashMap<ProductId, Product>,
    locations: HashMap<LocationId, Location>,
    lots: HashMap<LotId, Lot>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_product(&mut self, product: Product) -> StockResult<ProductId> {
        if product.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty").into());
        }
        if self.products.contains_key(&product.id) {
            return Err(DomainError::conflict(format!("product {} already exists", product.id)).into());
        }
        let id = product.id;
        self.products.insert(id, product);
        Ok(id)
    }

    pub fn register_location(&mut self, location: Location) -> StockResult<LocationId> {
        if location.name.trim().is_empty() {
            return Err(DomainError::validation("location name cannot be empty").into());
        }
        if self.locations.contains_key(&location.id) {
            return Err(
                DomainError::conflict(format!("location {} already exists", location.id)).into(),
            );
        }
        let id = location.id;
        self.locations.insert(id, location);
        Ok(id)
    }

    /// Register a lot. The product must exist and be tracked, and lot names
    /// are unique per product.
    pub fn register_lot(&mut self, lot: Lot) -> StockResult<LotId> {
        let product = self.product(lot.product_id)?;
        if !product.tracking.is_tracked() {
            return Err(StockError::InvalidLot {
                product: lot.product_id,
                lot: lot.id,
            });
        }
        if lot.name.trim().is_empty() {
            return Err(DomainError::validation("lot name cannot be empty").into());
        }
        let duplicate = self
            .lots
            .values()
            .any(|l| l.product_id == lot.product_id && l.name == lot.name);
        if duplicate || self.lots.contains_key(&lot.id) {
            return Err(DomainError::conflict(format!(
                "lot '{}' already exists for product {}",
                lot.name, lot.product_id
            ))
            .into());
        }
        let id = lot.id;
        self.lots.insert(id, lot);
        Ok(id)
    }

    pub fn product(&self, id: ProductId) -> StockResult<&Product> {
        self.products.get(&id).ok_or(StockError::UnknownProduct(id))
    }

    pub fn location(&self, id: LocationId) -> StockResult<&Location> {
        self.locations.get(&id).ok_or(StockError::UnknownLocation(id))
    }

    pub fn lot(&self, id: LotId) -> StockResult<&Lot> {
        self.lots.get(&id).ok_or(StockError::UnknownLot(id))
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn tracking(&self, product: ProductId) -> StockResult<Tracking> {
        Ok(self.product(product)?.tracking)
    }

    pub fn usage(&self, location: LocationId) -> StockResult<LocationUsage> {
        Ok(self.location(location)?.usage)
    }

    /// Validate that `lot` (if any) can be used with `product`.
    pub fn check_lot(&self, product: ProductId, lot: Option<LotId>) -> StockResult<()> {
        let Some(lot_id) = lot else {
            return Ok(());
        };
        let lot = self.lot(lot_id)?;
        let tracked = self.product(product)?.tracking.is_tracked();
        if lot.product_id != product || !tracked {
            return Err(StockError::InvalidLot {
                product,
                lot: lot_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_locations_bypass_reservation() {
        assert!(LocationUsage::Supplier.bypasses_reservation());
        assert!(LocationUsage::Customer.bypasses_reservation());
        assert!(LocationUsage::Inventory.bypasses_reservation());
        assert!(LocationUsage::Production.bypasses_reservation());
        assert!(!LocationUsage::Internal.bypasses_reservation());
        assert!(!LocationUsage::Transit.bypasses_reservation());
    }

    #[test]
    fn lots_require_a_tracked_product() {
        let mut catalog = Catalog::new();
        let plain = catalog
            .register_product(Product::new("Bolt", Tracking::None))
            .unwrap();

        let err = catalog.register_lot(Lot::new("L1", plain)).unwrap_err();
        assert!(matches!(err, StockError::InvalidLot { .. }));
    }

    #[test]
    fn lot_names_are_unique_per_product() {
        let mut catalog = Catalog::new();
        let a = catalog
            .register_product(Product::new("Drill", Tracking::Serial))
            .unwrap();
        let b = catalog
            .register_product(Product::new("Saw", Tracking::Lot))
            .unwrap();

        catalog.register_lot(Lot::new("SN-1", a)).unwrap();
        catalog.register_lot(Lot::new("SN-1", b)).unwrap();
        let err = catalog.register_lot(Lot::new("SN-1", a)).unwrap_err();
        assert!(matches!(err, StockError::Domain(DomainError::Conflict(_))));
    }

    #[test]
    fn check_lot_rejects_foreign_lot() {
        let mut catalog = Catalog::new();
        let a = catalog
            .register_product(Product::new("Drill", Tracking::Serial))
            .unwrap();
        let b = catalog
            .register_product(Product::new("Saw", Tracking::Lot))
            .unwrap();
        let lot_b = catalog.register_lot(Lot::new("B-1", b)).unwrap();

        assert!(catalog.check_lot(b, Some(lot_b)).is_ok());
        assert!(catalog.check_lot(a, None).is_ok());
        assert_eq!(
            catalog.check_lot(a, Some(lot_b)),
            Err(StockError::InvalidLot {
                product: a,
                lot: lot_b
            })
        );
    }

    #[test]
    fn unknown_ids_are_reported() {
        let catalog = Catalog::new();
        let id = ProductId::new();
        assert_eq!(catalog.product(id).unwrap_err(), StockError::UnknownProduct(id));
    }
}
