//! Tenant-isolated read model storage.

pub mod stock_level_store;

pub use stock_level_store::{InMemoryStockLevelStore, StockLevel, StockLevelKey, StockLevelStore};
