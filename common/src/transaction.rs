use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::time::TimestampMillis;

// The kind of logical action a transaction groups operations under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TxType {
    BatchPin,
    NetworkAction,
    TokenPool,
    TokenTransfer,
    TokenApproval,
}

// Groups the on-chain and off-chain operations caused by one logical action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub namespace: String,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub created: TimestampMillis,
    // Every on-chain transaction hash this logical action produced
    #[serde(default)]
    pub blockchain_ids: Vec<String>,
}

impl Transaction {
    pub fn new(namespace: String, tx_type: TxType, created: TimestampMillis) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace,
            tx_type,
            created,
            blockchain_ids: Vec::new(),
        }
    }
}
