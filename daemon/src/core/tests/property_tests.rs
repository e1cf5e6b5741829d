// Property tests over the canonical serialization and ordering primitives

use proptest::prelude::*;
use uuid::Uuid;
use weft_common::{
    canonical,
    data::DataRef,
    message::{Message, MessageHeader, MessageState, MessageType},
    subscription::RetryOptions,
};

fn topic_strategy() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z]{1,12}", 1..4)
}

fn message_strategy() -> impl Strategy<Value = Message> {
    (
        "[a-z]{1,8}",
        "[a-z0-9]{1,8}",
        topic_strategy(),
        proptest::option::of("[a-z]{1,8}"),
        any::<u64>(),
        proptest::option::of(any::<u128>()),
        proptest::collection::vec(any::<[u8; 16]>(), 0..3),
    )
        .prop_map(|(author, namespace, topics, tag, created, cid, data_seeds)| {
            let data = data_seeds
                .into_iter()
                .map(|seed| DataRef {
                    id: Uuid::from_bytes(seed),
                    hash: weft_common::crypto::hash(&seed),
                })
                .collect();
            let mut message = Message {
                id: Uuid::new_v4(),
                header: MessageHeader {
                    author,
                    key: String::new(),
                    namespace,
                    group: None,
                    topics,
                    tag,
                    msg_type: MessageType::Broadcast,
                    created,
                    cid: cid.map(Uuid::from_u128),
                },
                data,
                hash: None,
                state: MessageState::Staged,
                batch: None,
                confirmed: None,
            };
            message.seal().expect("sealable");
            message
        })
}

proptest! {
    // parse(canonical(x)) == x, and the hash survives the round trip
    #[test]
    fn prop_canonical_roundtrip_preserves_message(message in message_strategy()) {
        let canonical_json = canonical::to_canonical_string(&message).expect("canonical");
        let parsed: Message = serde_json::from_str(&canonical_json).expect("parse");
        prop_assert_eq!(&parsed, &message);
        prop_assert_eq!(
            parsed.compute_hash().expect("hash"),
            message.compute_hash().expect("hash")
        );
    }

    // the canonical form is stable: serializing twice gives identical bytes
    #[test]
    fn prop_canonical_serialization_deterministic(message in message_strategy()) {
        let first = canonical::to_canonical_bytes(&message).expect("bytes");
        let second = canonical::to_canonical_bytes(&message).expect("bytes");
        prop_assert_eq!(first, second);
    }

    // backoff is monotone in the attempt number and never exceeds the cap
    #[test]
    fn prop_backoff_monotone_and_capped(
        base in 1u64..1000,
        factor in 1.0f64..4.0,
        cap in 1000u64..60_000,
        attempts in 1u32..12,
    ) {
        let retry = RetryOptions { base_millis: base, factor, cap_millis: cap, max_attempts: attempts };
        let mut last = 0u64;
        for attempt in 0..attempts {
            let delay = retry.delay_millis(attempt);
            prop_assert!(delay <= cap);
            prop_assert!(delay >= last || delay == cap);
            last = delay;
        }
    }
}
