//! Stock error model.

use thiserror::Error;

use stockledger_core::{
    AdjustmentId, DomainError, LocationId, LotId, MoveId, ProductId, Quantity, TransferId,
};

pub type StockResult<T> = Result<T, StockError>;

/// Errors raised by stock operations.
///
/// Insufficient stock is not an error: reservations are simply partial.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// A tracked product was processed without a lot/serial number.
    #[error("product {product} is tracked: a lot/serial number is required")]
    LotRequired { product: ProductId },

    /// The lot does not belong to the product (or the product is untracked).
    #[error("lot {lot} cannot be used for product {product}")]
    InvalidLot { product: ProductId, lot: LotId },

    /// A serial number would end up on more than one unit.
    #[error("serial number {lot} is already assigned")]
    DuplicateSerial { lot: LotId },

    #[error("cannot release {requested}: only {reserved} reserved")]
    ReleaseExceedsReserved {
        requested: Quantity,
        reserved: Quantity,
    },

    /// The document is in a state that does not allow the operation.
    #[error("{document} is {state}: cannot {action}")]
    InvalidState {
        document: String,
        state: &'static str,
        action: &'static str,
    },

    #[error("nothing to process: {0}")]
    NothingToDo(String),

    #[error("unknown product {0}")]
    UnknownProduct(ProductId),

    #[error("unknown location {0}")]
    UnknownLocation(LocationId),

    #[error("unknown lot {0}")]
    UnknownLot(LotId),

    #[error("unknown move {0}")]
    UnknownMove(MoveId),

    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),

    #[error("unknown inventory adjustment {0}")]
    UnknownAdjustment(AdjustmentId),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl StockError {
    pub(crate) fn invalid_state(
        document: impl Into<String>,
        state: &'static str,
        action: &'static str,
    ) -> Self {
        Self::InvalidState {
            document: document.into(),
            state,
            action,
        }
    }

    /// User errors can be fixed by editing the document and retrying.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StockError::LotRequired { .. }
                | StockError::InvalidLot { .. }
                | StockError::DuplicateSerial { .. }
                | StockError::NothingToDo(_)
                | StockError::Domain(DomainError::Validation(_))
                | StockError::Domain(DomainError::QuantityOutOfRange(_))
        )
    }
}
