//! Infrastructure layer: configuration, event journal, read models and the
//! stock service that ties them to the domain warehouse.

pub mod config;
pub mod journal;
pub mod projections;
pub mod read_model;
pub mod service;


pub use config::{ConfigError, StockConfig};
pub use journal::{InMemoryStockJournal, JournalEnvelope, JournalError, StockJournal};
pub use projections::{StockLevelProjection, StockLevelProjectionError};
pub use read_model::{InMemoryStockLevelStore, StockLevel, StockLevelKey, StockLevelStore};
pub use service::{ServiceError, ServiceResult, StockService, WAREHOUSE_STREAM};
