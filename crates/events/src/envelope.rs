use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{ProductId, StoreId, TenantId};

use crate::Event;

/// Envelope for a ledger event, carrying tenant + stock row metadata.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `tenant_id`.
/// - `sequence_number` is the history ledger's insertion order of the entry
///   that produced the event, so consumers can discard stale redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    store_id: StoreId,
    product_id: ProductId,

    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            store_id,
            product_id,
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn schema_version(&self) -> u32 {
        self.payload.schema_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[derive(Debug, Clone)]
    struct Counted {
        at: DateTime<Utc>,
    }

    impl Event for Counted {
        fn event_type(&self) -> &'static str {
            "inventory.stock.counted"
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn envelope_exposes_payload_routing_metadata() {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            TenantId::new(),
            StoreId::new(),
            ProductId::new(),
            7,
            Counted { at: Utc::now() },
        );

        assert_eq!(envelope.event_type(), "inventory.stock.counted");
        assert_eq!(envelope.schema_version(), 1);
        assert_eq!(envelope.sequence_number(), 7);
    }
}
