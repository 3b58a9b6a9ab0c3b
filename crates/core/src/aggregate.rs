//! Aggregate root trait for the stock documents (moves, transfers, adjustments).

/// Aggregate root marker + minimal interface.
///
/// Stock documents are mutated in place by the warehouse; `version` counts the
/// state transitions applied to a document so callers can detect stale reads.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    fn version(&self) -> u64;
}
