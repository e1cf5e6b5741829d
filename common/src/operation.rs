use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use uuid::Uuid;

use crate::{
    canonical,
    crypto::{hash_parts, Hash},
    time::TimestampMillis,
};

// Status transitions are monotonic: Initialized -> Pending ->
// {Succeeded, Failed}. A failed operation is retried as a new row under the
// same idempotency key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OpStatus {
    Initialized,
    Pending,
    Succeeded,
    Failed,
}

impl OpStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpStatus::Succeeded | OpStatus::Failed)
    }

    pub fn can_transition_to(&self, next: OpStatus) -> bool {
        match self {
            OpStatus::Initialized => next != OpStatus::Initialized,
            OpStatus::Pending => next.is_terminal(),
            OpStatus::Succeeded | OpStatus::Failed => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OpType {
    BlockchainPinBatch,
    BlockchainNetworkAction,
    SharedStorageUploadBatch,
    SharedStorageDownloadBatch,
    DataExchangeSendBatch,
    DataExchangeRequestBlob,
    TokenCreatePool,
    TokenTransfer,
    TokenApproval,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub namespace: String,
    pub tx: Uuid,
    #[serde(rename = "type")]
    pub op_type: OpType,
    pub plugin: String,
    pub status: OpStatus,
    pub created: TimestampMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<TimestampMillis>,
    #[serde(default)]
    pub retry_count: u32,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Operation {
    pub fn new(
        namespace: String,
        tx: Uuid,
        op_type: OpType,
        plugin: String,
        input: Value,
        created: TimestampMillis,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace,
            tx,
            op_type,
            plugin,
            status: OpStatus::Initialized,
            created,
            updated: None,
            retry_count: 0,
            input,
            output: None,
            error: None,
        }
    }

    // Idempotency key: sha256(tx || type || plugin || sha256(canonical(input))).
    // A retried operation keeps the key so plugins can short-circuit.
    pub fn idempotency_key(&self) -> Result<Hash, serde_json::Error> {
        let input_hash = canonical::canonical_hash(&self.input)?;
        Ok(hash_parts(&[
            self.tx.as_bytes(),
            self.op_type.to_string().as_bytes(),
            self.plugin.as_bytes(),
            input_hash.as_bytes(),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions_monotonic() {
        assert!(OpStatus::Initialized.can_transition_to(OpStatus::Pending));
        assert!(OpStatus::Pending.can_transition_to(OpStatus::Succeeded));
        assert!(OpStatus::Pending.can_transition_to(OpStatus::Failed));
        assert!(!OpStatus::Succeeded.can_transition_to(OpStatus::Pending));
        assert!(!OpStatus::Failed.can_transition_to(OpStatus::Succeeded));
    }

    #[test]
    fn test_idempotency_key_stable_across_retries() {
        let tx = Uuid::new_v4();
        let op = Operation::new(
            "ns1".into(),
            tx,
            OpType::BlockchainPinBatch,
            "ethereum".into(),
            json!({"batch": "b1"}),
            1,
        );
        let mut retried = Operation::new(
            "ns1".into(),
            tx,
            OpType::BlockchainPinBatch,
            "ethereum".into(),
            json!({"batch": "b1"}),
            2,
        );
        retried.retry_count = 3;
        assert_ne!(op.id, retried.id);
        assert_eq!(
            op.idempotency_key().unwrap(),
            retried.idempotency_key().unwrap()
        );
    }

    #[test]
    fn test_idempotency_key_depends_on_input() {
        let tx = Uuid::new_v4();
        let a = Operation::new(
            "ns1".into(),
            tx,
            OpType::TokenTransfer,
            "erc20".into(),
            json!({"amount": 1}),
            1,
        );
        let b = Operation::new(
            "ns1".into(),
            tx,
            OpType::TokenTransfer,
            "erc20".into(),
            json!({"amount": 2}),
            1,
        );
        assert_ne!(a.idempotency_key().unwrap(), b.idempotency_key().unwrap());
    }
}
