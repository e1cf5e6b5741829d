use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    crypto::{hash_parts, Hash},
    time::TimestampMillis,
};

// One ordering token observed on-chain: the pin of one (message, topic) of
// one batch. `sequence` is the local arrival order assigned on insert and is
// the order the aggregator consumes pins in. `context` is the hash exactly
// as the chain carried it: masked within a private group, the bare context
// hash for broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    #[serde(default)]
    pub sequence: u64,
    pub namespace: String,
    pub context: Hash,
    pub signer: String,
    pub nonce: u64,
    pub batch: Uuid,
    pub batch_hash: Hash,
    // Position of this pin within the batch pin order
    pub index: u64,
    // Shared storage reference carried by the pin event, kept for payload
    // re-requests while the batch body is missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,
    #[serde(default)]
    pub dispatched: bool,
    pub created: TimestampMillis,
}

// Aggregator consumption pointer: the next expected nonce per
// (context, author). `context` is the true (unmasked) hash and never leaves
// this node; `hash` is the on-chain form the pair must show next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextPin {
    pub namespace: String,
    pub context: Hash,
    pub identity: String,
    pub nonce: u64,
    // Next expected on-chain hash: masked for private, the bare context
    // for broadcast
    pub hash: Hash,
}

// One entry of the on-chain contexts list. For broadcast batches `context`
// is the bare context hash chained with the per-(context, author) nonce;
// within a private group it is the masked hash so public observers learn
// nothing about the context or its author.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinEntry {
    pub context: Hash,
    pub nonce: u64,
}

// Mask one private pin: sha256(context || author || big-endian nonce).
// Only group members, who know the true context and author, can recompute
// and verify it.
pub fn mask_context(context: &Hash, author: &str, nonce: u64) -> Hash {
    hash_parts(&[
        context.as_bytes(),
        author.as_bytes(),
        &nonce.to_be_bytes(),
    ])
}

// The hash a (context, author) pair is expected to place on-chain at the
// given nonce
pub fn expected_pin_hash(context: &Hash, author: &str, nonce: u64, private: bool) -> Hash {
    if private {
        mask_context(context, author, nonce)
    } else {
        context.clone()
    }
}

impl PinEntry {
    // Wire encoding: context || big-endian nonce
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(40);
        bytes.extend_from_slice(self.context.as_bytes());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes
    }
}

// The on-chain submission for one sealed batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPin {
    pub namespace: String,
    pub batch_id: Uuid,
    pub batch_hash: Hash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,
    pub contexts: Vec<PinEntry>,
}

// Key into the nonce table for one (context, author) pair
pub fn nonce_key(context: &Hash, author: &str) -> Hash {
    hash_parts(&[context.as_bytes(), author.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;

    #[test]
    fn test_nonce_key_separates_authors() {
        let context = hash(b"ctx");
        assert_ne!(
            nonce_key(&context, "org/alice"),
            nonce_key(&context, "org/bob")
        );
        assert_eq!(
            nonce_key(&context, "org/alice"),
            nonce_key(&context, "org/alice")
        );
    }

    #[test]
    fn test_pin_entry_wire_encoding() {
        let entry = PinEntry {
            context: hash(b"ctx"),
            nonce: 7,
        };
        let bytes = entry.wire_bytes();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[..32], hash(b"ctx").as_bytes());
        assert_eq!(&bytes[32..], &7u64.to_be_bytes());
    }

    #[test]
    fn test_mask_binds_context_author_and_nonce() {
        let context = hash(b"ctx");
        let masked = mask_context(&context, "org/alice", 0);
        // deterministic for the same inputs
        assert_eq!(masked, mask_context(&context, "org/alice", 0));
        // and different for any change of context, author or nonce
        assert_ne!(masked, context);
        assert_ne!(masked, mask_context(&hash(b"other"), "org/alice", 0));
        assert_ne!(masked, mask_context(&context, "org/bob", 0));
        assert_ne!(masked, mask_context(&context, "org/alice", 1));
    }

    #[test]
    fn test_expected_pin_hash_by_batch_type() {
        let context = hash(b"ctx");
        // broadcast shows the bare context at every nonce
        assert_eq!(expected_pin_hash(&context, "org/alice", 0, false), context);
        assert_eq!(expected_pin_hash(&context, "org/alice", 5, false), context);
        // private shows the mask
        assert_eq!(
            expected_pin_hash(&context, "org/alice", 5, true),
            mask_context(&context, "org/alice", 5)
        );
    }
}
