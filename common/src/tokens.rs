// Token entity shapes. The node correlates pools, transfers and approvals
// with their transactions and events; interpreting contract semantics beyond
// these shapes is the token plugin's business.

use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::time::TimestampMillis;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenPoolState {
    Pending,
    Confirmed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPool {
    pub id: Uuid,
    pub namespace: String,
    pub name: String,
    pub connector: String,
    // Plugin-specific pool address/path, opaque to the node
    pub locator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<Uuid>,
    pub state: TokenPoolState,
    pub created: TimestampMillis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenTransferType {
    Mint,
    Burn,
    Transfer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub local_id: Uuid,
    pub namespace: String,
    pub pool: Uuid,
    #[serde(rename = "type")]
    pub transfer_type: TokenTransferType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<Uuid>,
    // Message attached to this transfer, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Uuid>,
    pub created: TimestampMillis,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenApproval {
    pub local_id: Uuid,
    pub namespace: String,
    pub pool: Uuid,
    pub operator: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<Uuid>,
    pub created: TimestampMillis,
}
