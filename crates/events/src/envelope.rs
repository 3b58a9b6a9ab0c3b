use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockledger_core::{AggregateId, TenantId};

use crate::event::Event;

/// Envelope for an event, containing multi-tenant + stream metadata.
///
/// This is the unit appended to the stock journal and fed to projections.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `tenant_id`.
/// - **Append-only**: `sequence_number` is monotonically increasing per stream
///   (one stream per warehouse). It is `0` until the journal assigns it.
/// - `payload` is the event body; journals store it as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    aggregate_id: AggregateId,
    aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    sequence_number: u64,

    event_type: String,
    event_version: u32,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        event_version: u32,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            event_type: event_type.into(),
            event_version,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Return the same envelope positioned at `sequence_number`.
    pub fn with_sequence(mut self, sequence_number: u64) -> Self {
        self.sequence_number = sequence_number;
        self
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed event, serializing its payload to JSON.
    ///
    /// The sequence number is left at `0`; the journal assigns it on append.
    pub fn encode<E: Event>(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event: &E,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type,
            0,
            event.event_type(),
            event.version(),
            event.occurred_at(),
            payload,
        ))
    }

    /// Deserialize the JSON payload back into a typed event.
    pub fn decode<E>(&self) -> Result<E, serde_json::Error>
    where
        E: for<'de> Deserialize<'de>,
    {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counted {
        qty: i64,
        at: DateTime<Utc>,
    }

    impl Event for Counted {
        fn event_type(&self) -> &'static str {
            "test.counted"
        }

        fn version(&self) -> u32 {
            2
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn encode_copies_event_metadata() {
        let event = Counted { qty: 7, at: Utc::now() };
        let tenant_id = TenantId::new();
        let stream = AggregateId::new();

        let env = EventEnvelope::encode(tenant_id, stream, "warehouse", &event).unwrap();

        assert_eq!(env.tenant_id(), tenant_id);
        assert_eq!(env.aggregate_id(), stream);
        assert_eq!(env.aggregate_type(), "warehouse");
        assert_eq!(env.event_type(), "test.counted");
        assert_eq!(env.event_version(), 2);
        assert_eq!(env.occurred_at(), event.at);
        assert_eq!(env.sequence_number(), 0);

        let decoded: Counted = env.decode().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn with_sequence_only_moves_the_position() {
        let event = Counted { qty: 1, at: Utc::now() };
        let env = EventEnvelope::encode(TenantId::new(), AggregateId::new(), "warehouse", &event)
            .unwrap();
        let id = env.event_id();

        let positioned = env.with_sequence(42);
        assert_eq!(positioned.sequence_number(), 42);
        assert_eq!(positioned.event_id(), id);
    }
}
