use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::time::TimestampMillis;

// Every locally-persisted fact. `sequence` is the canonical local ordering:
// assigned from a single database counter inside the committing transaction,
// monotonic and gap-free per node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    TransactionSubmitted,
    PinArrived,
    BatchReceived,
    BlobReceived,
    MessageConfirmed,
    MessageRejected,
    OperationSucceeded,
    OperationFailed,
    TokenPoolConfirmed,
    TokenTransferConfirmed,
    TokenApprovalConfirmed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub namespace: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    // Id of the entity this event refers to (message, batch, operation...)
    pub reference: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    // Assigned by the persistence layer on insert
    #[serde(default)]
    pub sequence: u64,
    pub created: TimestampMillis,
}

impl Event {
    pub fn new(
        namespace: String,
        event_type: EventType,
        reference: Uuid,
        tx: Option<Uuid>,
        topic: Option<String>,
        created: TimestampMillis,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace,
            event_type,
            reference,
            tx,
            topic,
            sequence: 0,
            created,
        }
    }
}
