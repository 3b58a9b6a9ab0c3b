//! Append-only journal of stock events.
//!
//! One stream per (tenant, warehouse). The journal owns sequence numbers:
//! envelopes arrive with sequence `0` and leave positioned at `last + 1`,
//! `last + 2`, and so on.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockledger_core::{AggregateId, TenantId};
use stockledger_events::EventEnvelope;

pub type JournalEnvelope = EventEnvelope<JsonValue>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JournalError {
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("journal lock poisoned")]
    LockPoisoned,
}

pub trait StockJournal: Send + Sync {
    /// Append a batch to a single stream; returns the positioned envelopes.
    fn append(&self, events: Vec<JournalEnvelope>) -> Result<Vec<JournalEnvelope>, JournalError>;

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<JournalEnvelope>, JournalError>;

    /// Envelopes of the stream with a sequence number above `after`.
    fn load_since(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        after: u64,
    ) -> Result<Vec<JournalEnvelope>, JournalError> {
        let mut stream = self.load_stream(tenant_id, aggregate_id)?;
        stream.retain(|e| e.sequence_number() > after);
        Ok(stream)
    }
}

impl<J> StockJournal for Arc<J>
where
    J: StockJournal + ?Sized,
{
    fn append(&self, events: Vec<JournalEnvelope>) -> Result<Vec<JournalEnvelope>, JournalError> {
        (**self).append(events)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<JournalEnvelope>, JournalError> {
        (**self).load_stream(tenant_id, aggregate_id)
    }

    fn load_since(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        after: u64,
    ) -> Result<Vec<JournalEnvelope>, JournalError> {
        (**self).load_since(tenant_id, aggregate_id, after)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory journal for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStockJournal {
    streams: RwLock<HashMap<StreamKey, Vec<JournalEnvelope>>>,
}

impl InMemoryStockJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of envelopes in the stream.
    pub fn stream_len(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Result<usize, JournalError> {
        let streams = self.streams.read().map_err(|_| JournalError::LockPoisoned)?;
        Ok(streams
            .get(&StreamKey {
                tenant_id,
                aggregate_id,
            })
            .map_or(0, Vec::len))
    }
}

impl StockJournal for InMemoryStockJournal {
    fn append(&self, events: Vec<JournalEnvelope>) -> Result<Vec<JournalEnvelope>, JournalError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };
        let tenant_id = first.tenant_id();
        let aggregate_id = first.aggregate_id();
        let aggregate_type = first.aggregate_type().to_string();

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id() != tenant_id {
                return Err(JournalError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id() != aggregate_id {
                return Err(JournalError::InvalidAppend(format!(
                    "batch contains multiple streams (index {idx})"
                )));
            }
            if e.aggregate_type() != aggregate_type {
                return Err(JournalError::InvalidAppend(format!(
                    "batch contains multiple aggregate types (index {idx})"
                )));
            }
        }

        let mut streams = self.streams.write().map_err(|_| JournalError::LockPoisoned)?;
        let stream = streams
            .entry(StreamKey {
                tenant_id,
                aggregate_id,
            })
            .or_default();

        if let Some(existing) = stream.first() {
            if existing.aggregate_type() != aggregate_type {
                return Err(JournalError::InvalidAppend(format!(
                    "stream holds '{}' events, attempted append of '{}'",
                    existing.aggregate_type(),
                    aggregate_type
                )));
            }
        }

        let mut next = stream.last().map_or(0, |e| e.sequence_number()) + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let positioned = e.with_sequence(next);
            next += 1;
            stream.push(positioned.clone());
            committed.push(positioned);
        }
        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<JournalEnvelope>, JournalError> {
        let streams = self.streams.read().map_err(|_| JournalError::LockPoisoned)?;
        Ok(streams
            .get(&StreamKey {
                tenant_id,
                aggregate_id,
            })
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn envelope(tenant: TenantId, stream: AggregateId, kind: &str) -> JournalEnvelope {
        EventEnvelope::new(
            Default::default(),
            tenant,
            stream,
            "warehouse",
            0,
            kind,
            1,
            Utc::now(),
            serde_json::json!({ "kind": kind }),
        )
    }

    #[test]
    fn append_assigns_consecutive_sequences() {
        let journal = InMemoryStockJournal::new();
        let tenant = TenantId::new();
        let stream = AggregateId::new();

        let first = journal
            .append(vec![envelope(tenant, stream, "a"), envelope(tenant, stream, "b")])
            .unwrap();
        let second = journal.append(vec![envelope(tenant, stream, "c")]).unwrap();

        assert_eq!(
            first.iter().map(|e| e.sequence_number()).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(second[0].sequence_number(), 3);
        assert_eq!(journal.stream_len(tenant, stream).unwrap(), 3);
        assert_eq!(journal.load_since(tenant, stream, 2).unwrap().len(), 1);
    }

    #[test]
    fn streams_are_isolated_per_tenant() {
        let journal = InMemoryStockJournal::new();
        let stream = AggregateId::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());

        journal.append(vec![envelope(t1, stream, "a")]).unwrap();
        let other = journal.append(vec![envelope(t2, stream, "a")]).unwrap();

        assert_eq!(other[0].sequence_number(), 1);
        assert_eq!(journal.load_stream(t1, stream).unwrap().len(), 1);
        assert!(journal.load_stream(TenantId::new(), stream).unwrap().is_empty());
    }

    #[test]
    fn mixed_batches_are_rejected() {
        let journal = InMemoryStockJournal::new();
        let stream = AggregateId::new();

        let err = journal
            .append(vec![
                envelope(TenantId::new(), stream, "a"),
                envelope(TenantId::new(), stream, "b"),
            ])
            .unwrap_err();
        assert!(matches!(err, JournalError::TenantIsolation(_)));

        let tenant = TenantId::new();
        let err = journal
            .append(vec![
                envelope(tenant, stream, "a"),
                envelope(tenant, AggregateId::new(), "b"),
            ])
            .unwrap_err();
        assert!(matches!(err, JournalError::InvalidAppend(_)));
        assert!(journal.load_stream(tenant, stream).unwrap().is_empty());
    }
}
