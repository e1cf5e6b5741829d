use serde_json::Value;
use uuid::Uuid;
use weft_common::{
    crypto::Hash,
    operation::OpStatus,
    pin::BatchPin,
    tokens::{TokenApproval, TokenTransfer},
};

// Status report a plugin pushes (or answers) for an operation it executed
#[derive(Clone, Debug)]
pub struct OperationUpdate {
    pub op: Uuid,
    pub status: OpStatus,
    pub blockchain_id: Option<String>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

// Inbound plugin events, normalized by the ingress into durable local state.
// Plugins push these over the bounded node event channel.
#[derive(Clone, Debug)]
pub enum PluginEvent {
    // A batch pin transaction was sequenced on-chain
    BatchPinComplete {
        batch_pin: BatchPin,
        signer: String,
        blockchain_tx: String,
    },

    // A private batch payload arrived over the data exchange
    MessageReceived {
        peer: String,
        payload: Vec<u8>,
    },

    // A broadcast batch payload finished downloading from shared storage
    BatchDownloaded {
        batch_id: Uuid,
        payload_ref: String,
        payload: Vec<u8>,
    },

    // A blob payload is now locally available at the data exchange
    BlobReceived {
        peer: String,
        hash: Hash,
        size: u64,
    },

    // Outcome of an asynchronous data exchange transfer
    TransferResult {
        op: Uuid,
        success: bool,
        info: Option<String>,
    },

    // Authoritative operation status pushed by a plugin
    OperationUpdate(OperationUpdate),

    TokenPoolCreated {
        connector: String,
        locator: String,
        blockchain_tx: Option<String>,
    },

    TokensTransferred {
        transfer: TokenTransfer,
        blockchain_tx: Option<String>,
    },

    TokensApproved {
        approval: TokenApproval,
        blockchain_tx: Option<String>,
    },
}
