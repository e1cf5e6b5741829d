use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::Display;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    canonical,
    config::{MAX_MESSAGE_DATA, MAX_MESSAGE_TOPICS},
    crypto::{hash_parts, Hash},
    data::DataRef,
    time::TimestampMillis,
};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("A message must carry at least one topic")]
    NoTopics,

    #[error("A message may carry at most {MAX_MESSAGE_TOPICS} topics")]
    TooManyTopics,

    #[error("A message may carry at most {MAX_MESSAGE_DATA} data elements")]
    TooManyData,

    #[error("A private message requires a group")]
    PrivateWithoutGroup,

    #[error("A broadcast message cannot name a group")]
    BroadcastWithGroup,

    #[error("Message is not hashed yet")]
    NotHashed,

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageType {
    Broadcast,
    Private,
    TransferBroadcast,
    TransferPrivate,
    Definition,
}

impl MessageType {
    pub fn is_private(&self) -> bool {
        matches!(self, MessageType::Private | MessageType::TransferPrivate)
    }
}

// Local lifecycle of a message row.
// Outbound: staged -> ready -> sent. Inbound: pending -> confirmed/rejected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageState {
    #[default]
    Staged,
    Ready,
    Sent,
    Pending,
    Confirmed,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Hash>,
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub created: TimestampMillis,
    // Correlation id chaining this message to a predecessor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<Uuid>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub header: MessageHeader,
    pub data: Vec<DataRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash>,
    #[serde(default)]
    pub state: MessageState,
    // Batch this message was assigned to, set when the batch is assembled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<TimestampMillis>,
}

// Ordering key for one topic of one message:
// sha256(canonical([namespace, topic])) for broadcast,
// sha256(canonical([namespace, topic, group])) within a private group
pub fn context_hash(
    namespace: &str,
    topic: &str,
    group: Option<&Hash>,
) -> Result<Hash, serde_json::Error> {
    let value = match group {
        Some(group) => json!([namespace, topic, group]),
        None => json!([namespace, topic]),
    };
    canonical::canonical_hash(&value)
}

impl Message {
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.header.topics.is_empty() {
            return Err(MessageError::NoTopics);
        }
        if self.header.topics.len() > MAX_MESSAGE_TOPICS {
            return Err(MessageError::TooManyTopics);
        }
        if self.data.len() > MAX_MESSAGE_DATA {
            return Err(MessageError::TooManyData);
        }
        if self.header.msg_type.is_private() && self.header.group.is_none() {
            return Err(MessageError::PrivateWithoutGroup);
        }
        if !self.header.msg_type.is_private() && self.header.group.is_some() {
            return Err(MessageError::BroadcastWithGroup);
        }
        Ok(())
    }

    // hash = sha256(canonical(header) || sha256(canonical(data refs)))
    pub fn compute_hash(&self) -> Result<Hash, serde_json::Error> {
        let header = canonical::to_canonical_string(&self.header)?;
        let data = canonical::canonical_hash(&self.data)?;
        Ok(hash_parts(&[header.as_bytes(), data.as_bytes()]))
    }

    pub fn seal(&mut self) -> Result<(), serde_json::Error> {
        self.hash = Some(self.compute_hash()?);
        Ok(())
    }

    pub fn verify_hash(&self) -> Result<bool, MessageError> {
        let stored = self.hash.as_ref().ok_or(MessageError::NotHashed)?;
        Ok(*stored == self.compute_hash()?)
    }

    // One ordering context per topic, in topic order
    pub fn contexts(&self) -> Result<Vec<Hash>, serde_json::Error> {
        self.header
            .topics
            .iter()
            .map(|topic| {
                context_hash(&self.header.namespace, topic, self.header.group.as_ref())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(msg_type: MessageType, group: Option<Hash>) -> Message {
        Message {
            id: Uuid::new_v4(),
            header: MessageHeader {
                author: "org/alice".into(),
                key: "0xf00".into(),
                namespace: "ns1".into(),
                group,
                topics: vec!["orders".into()],
                tag: None,
                msg_type,
                created: 1_700_000_000_000,
                cid: None,
            },
            data: Vec::new(),
            hash: None,
            state: MessageState::Staged,
            batch: None,
            confirmed: None,
        }
    }

    #[test]
    fn test_hash_changes_with_data() {
        let mut msg = sample_message(MessageType::Broadcast, None);
        let empty = msg.compute_hash().unwrap();
        msg.data.push(DataRef {
            id: Uuid::new_v4(),
            hash: crate::crypto::hash(b"x"),
        });
        assert_ne!(empty, msg.compute_hash().unwrap());
    }

    #[test]
    fn test_private_requires_group() {
        let msg = sample_message(MessageType::Private, None);
        assert!(matches!(
            msg.validate(),
            Err(MessageError::PrivateWithoutGroup)
        ));
    }

    #[test]
    fn test_broadcast_rejects_group() {
        let msg = sample_message(MessageType::Broadcast, Some(Hash::zero()));
        assert!(matches!(
            msg.validate(),
            Err(MessageError::BroadcastWithGroup)
        ));
    }

    #[test]
    fn test_group_changes_context() {
        let broadcast = context_hash("ns1", "orders", None).unwrap();
        let grouped = context_hash("ns1", "orders", Some(&Hash::zero())).unwrap();
        assert_ne!(broadcast, grouped);
        // same inputs, same context
        assert_eq!(broadcast, context_hash("ns1", "orders", None).unwrap());
    }

    #[test]
    fn test_contexts_follow_topic_order() {
        let mut msg = sample_message(MessageType::Broadcast, None);
        msg.header.topics = vec!["t1".into(), "t2".into()];
        let contexts = msg.contexts().unwrap();
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0], context_hash("ns1", "t1", None).unwrap());
        assert_eq!(contexts[1], context_hash("ns1", "t2", None).unwrap());
    }
}
