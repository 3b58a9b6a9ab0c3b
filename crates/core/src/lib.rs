//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the stock ledger
//! crates (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod quantity;
pub mod value_object;

pub use aggregate::AggregateRoot;
pub use entity::Entity;
pub use error::DomainError;
pub use id::{
    AdjustmentId, AggregateId, LocationId, LotId, MoveId, OwnerId, PackageId, ProductId,
    TenantId, TransferId, WarehouseId,
};
pub use quantity::Quantity;
pub use value_object::ValueObject;
