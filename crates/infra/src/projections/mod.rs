//! Projections (read model builders).
//!
//! Projections consume journaled stock events and build query-optimized
//! read models. They are rebuildable from the journal, tenant-isolated and
//! idempotent under at-least-once delivery.

pub mod stock_levels;

pub use stock_levels::{StockLevelProjection, StockLevelProjectionError};
