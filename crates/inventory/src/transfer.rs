use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateRoot, LocationId, MoveId, TransferId};

use crate::stock_move::MoveState;

/// Transfer state, derived from the states of its moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Draft,
    Waiting,
    Confirmed,
    PartiallyAvailable,
    Assigned,
    Done,
    Cancelled,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Draft => "draft",
            TransferState::Waiting => "waiting",
            TransferState::Confirmed => "confirmed",
            TransferState::PartiallyAvailable => "partially_available",
            TransferState::Assigned => "assigned",
            TransferState::Done => "done",
            TransferState::Cancelled => "cancelled",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, TransferState::Done | TransferState::Cancelled)
    }

    /// Compute the state of a transfer from `(state, reserved > 0)` of each move.
    ///
    /// A transfer without moves is a draft.
    pub fn from_moves(moves: &[(MoveState, bool)]) -> Self {
        if moves.is_empty() || moves.iter().any(|(s, _)| *s == MoveState::Draft) {
            return TransferState::Draft;
        }
        if moves.iter().all(|(s, _)| *s == MoveState::Cancelled) {
            return TransferState::Cancelled;
        }
        if moves.iter().all(|(s, _)| s.is_final()) {
            return TransferState::Done;
        }

        let active: Vec<&(MoveState, bool)> = moves.iter().filter(|(s, _)| !s.is_final()).collect();
        if active.iter().all(|(s, _)| *s == MoveState::Assigned) {
            TransferState::Assigned
        } else if active.iter().any(|(_, reserved)| *reserved) {
            TransferState::PartiallyAvailable
        } else if active.iter().any(|(s, _)| *s == MoveState::Confirmed) {
            TransferState::Confirmed
        } else {
            TransferState::Waiting
        }
    }
}

impl core::fmt::Display for TransferState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with the unprocessed part of a transfer on validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackorderPolicy {
    /// Move the remainder to a new transfer.
    #[default]
    CreateBackorder,
    /// Cancel the remainder.
    CancelRemainder,
}

/// Request to create a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub location_id: LocationId,
    pub location_dest_id: LocationId,
}

impl NewTransfer {
    pub fn new(location_id: LocationId, location_dest_id: LocationId) -> Self {
        Self {
            location_id,
            location_dest_id,
        }
    }
}

/// Result of validating a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    pub backorder_id: Option<TransferId>,
    /// Moves created for quantities processed above the demand.
    pub extra_moves: Vec<MoveId>,
    /// Moves cancelled under `BackorderPolicy::CancelRemainder`.
    pub cancelled_moves: Vec<MoveId>,
}

/// Aggregate root: Transfer (a picking).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub(crate) id: TransferId,
    pub(crate) version: u64,
    pub(crate) location_id: LocationId,
    pub(crate) location_dest_id: LocationId,
    pub(crate) moves: Vec<MoveId>,
    pub(crate) backorder_of: Option<TransferId>,
    pub(crate) state: TransferState,
}

impl Transfer {
    pub(crate) fn new(id: TransferId, req: NewTransfer) -> Self {
        Self {
            id,
            version: 0,
            location_id: req.location_id,
            location_dest_id: req.location_dest_id,
            moves: Vec::new(),
            backorder_of: None,
            state: TransferState::Draft,
        }
    }

    pub(crate) fn backorder(&self, id: TransferId) -> Self {
        Self {
            id,
            version: 0,
            location_id: self.location_id,
            location_dest_id: self.location_dest_id,
            moves: Vec::new(),
            backorder_of: Some(self.id),
            state: TransferState::Draft,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn location_dest_id(&self) -> LocationId {
        self.location_dest_id
    }

    pub fn moves(&self) -> &[MoveId] {
        &self.moves
    }

    /// The transfer this one is a backorder of.
    pub fn backorder_of(&self) -> Option<TransferId> {
        self.backorder_of
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub(crate) fn label(&self) -> String {
        format!("transfer {}", self.id)
    }

    pub(crate) fn set_state(&mut self, state: TransferState) {
        if self.state != state {
            self.state = state;
            self.version += 1;
        }
    }
}

impl AggregateRoot for Transfer {
    type Id = TransferId;

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

    #[test]
    fn empty_or_draft_transfers_are_draft() {
        assert_eq!(TransferState::from_moves(&[]), TransferState::Draft);
        assert_eq!(
            TransferState::from_moves(&[(MoveState::Draft, false), (MoveState::Assigned, true)]),
            TransferState::Draft
        );
    }

    #[test]
    fn final_states() {
        assert_eq!(
            TransferState::from_moves(&[(MoveState::Cancelled, false)]),
            TransferState::Cancelled
        );
        assert_eq!(
            TransferState::from_moves(&[(MoveState::Done, false), (MoveState::Cancelled, false)]),
            TransferState::Done
        );
    }

    #[test]
    fn active_moves_decide_availability() {
        assert_eq!(
            TransferState::from_moves(&[(MoveState::Assigned, true), (MoveState::Done, false)]),
            TransferState::Assigned
        );
        assert_eq!(
            TransferState::from_moves(&[(MoveState::Assigned, true), (MoveState::Confirmed, false)]),
            TransferState::PartiallyAvailable
        );
        assert_eq!(
            TransferState::from_moves(&[(MoveState::Waiting, false), (MoveState::Confirmed, false)]),
            TransferState::Confirmed
        );
        assert_eq!(
            TransferState::from_moves(&[(MoveState::Waiting, false)]),
            TransferState::Waiting
        );
    }
}
