use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    canonical,
    crypto::Hash,
    data::Data,
    message::{Message, MessageType},
    pin::PinEntry,
    time::TimestampMillis,
    transaction::TxType,
};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Batch payload hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: Hash, computed: Hash },

    #[error("Batch payload carries no messages")]
    EmptyPayload,

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchType {
    Broadcast,
    Private,
}

impl BatchType {
    pub fn is_private(&self) -> bool {
        matches!(self, BatchType::Private)
    }

    pub fn for_message(msg_type: MessageType) -> Self {
        if msg_type.is_private() {
            BatchType::Private
        } else {
            BatchType::Broadcast
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub id: Uuid,
    pub namespace: String,
    #[serde(rename = "type")]
    pub batch_type: BatchType,
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Hash>,
    pub created: TimestampMillis,
}

// The unit shipped to shared storage / data exchange: the canonical JSON of
// this struct is the wire format, and its hash is the sealed batch hash
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub messages: Vec<Message>,
    pub data: Vec<Data>,
}

impl BatchPayload {
    pub fn hash(&self) -> Result<Hash, serde_json::Error> {
        canonical::canonical_hash(self)
    }

    pub fn wire_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        canonical::to_canonical_bytes(self)
    }

    pub fn size_bytes(&self) -> Result<u64, serde_json::Error> {
        Ok(self.wire_bytes()?.len() as u64)
    }

    // Pin order: one entry per (message, topic), messages in payload order,
    // topics in header order. The position in this sequence is the pin index.
    pub fn pin_order(&self) -> Vec<(&Message, &str)> {
        let mut order = Vec::new();
        for message in &self.messages {
            for topic in &message.header.topics {
                order.push((message, topic.as_str()));
            }
        }
        order
    }
}

// Reference from a batch to the transaction driving its submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef {
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub header: BatchHeader,
    // Set when the batch is sealed, never recomputed afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash>,
    pub payload: BatchPayload,
    // Nonce-chained context entries assigned at seal, in pin order. Not part
    // of the payload hash: the wire payload alone reproduces the hash.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pins: Vec<PinEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<TxRef>,
    // Shared storage reference, set once the payload upload completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<TimestampMillis>,
}

impl Batch {
    pub fn is_sealed(&self) -> bool {
        self.hash.is_some()
    }

    // Rebuild a batch row from a received wire payload. The header fields
    // not present on the wire come from the pin event (id, namespace, hash)
    // and from the messages themselves (author, key, group).
    pub fn restore(
        id: Uuid,
        namespace: String,
        expected_hash: Hash,
        batch_type: BatchType,
        payload_bytes: &[u8],
        received: TimestampMillis,
    ) -> Result<Self, BatchError> {
        let payload: BatchPayload = serde_json::from_slice(payload_bytes)?;
        let computed = payload.hash()?;
        if computed != expected_hash {
            return Err(BatchError::HashMismatch {
                expected: expected_hash,
                computed,
            });
        }
        let first = payload.messages.first().ok_or(BatchError::EmptyPayload)?;
        Ok(Self {
            header: BatchHeader {
                id,
                namespace,
                batch_type,
                author: first.header.author.clone(),
                key: first.header.key.clone(),
                group: first.header.group.clone(),
                created: received,
            },
            hash: Some(expected_hash),
            payload,
            pins: Vec::new(),
            tx: None,
            payload_ref: None,
            confirmed: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageHeader, MessageState};

    fn message(topics: Vec<&str>) -> Message {
        Message {
            id: Uuid::new_v4(),
            header: MessageHeader {
                author: "org/alice".into(),
                key: String::new(),
                namespace: "ns1".into(),
                group: None,
                topics: topics.into_iter().map(String::from).collect(),
                tag: None,
                msg_type: MessageType::Broadcast,
                created: 1,
                cid: None,
            },
            data: Vec::new(),
            hash: None,
            state: MessageState::Ready,
            batch: None,
            confirmed: None,
        }
    }

    #[test]
    fn test_pin_order_is_message_then_topic() {
        let payload = BatchPayload {
            messages: vec![message(vec!["t1", "t2"]), message(vec!["t3"])],
            data: Vec::new(),
        };
        let order: Vec<&str> = payload.pin_order().iter().map(|(_, t)| *t).collect();
        assert_eq!(order, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_restore_verifies_hash() {
        let payload = BatchPayload {
            messages: vec![message(vec!["t1"])],
            data: Vec::new(),
        };
        let bytes = payload.wire_bytes().unwrap();
        let hash = payload.hash().unwrap();

        let restored = Batch::restore(
            Uuid::new_v4(),
            "ns1".into(),
            hash.clone(),
            BatchType::Broadcast,
            &bytes,
            5,
        )
        .unwrap();
        assert_eq!(restored.hash, Some(hash));
        assert_eq!(restored.header.author, "org/alice");

        let tampered = Batch::restore(
            Uuid::new_v4(),
            "ns1".into(),
            crate::crypto::hash(b"other"),
            BatchType::Broadcast,
            &bytes,
            5,
        );
        assert!(matches!(tampered, Err(BatchError::HashMismatch { .. })));
    }
}
