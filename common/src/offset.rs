use serde::{Deserialize, Serialize};
use strum::Display;

// Durable read positions over the event and pin logs. One row per
// subscription plus one for the aggregator stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OffsetKind {
    Aggregator,
    Subscription,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    pub kind: OffsetKind,
    pub name: String,
    pub current: u64,
}
