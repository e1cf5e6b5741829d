// Operation handlers binding each operation type to its plugin call.
// Registered by the node at startup; the runner owns retries and status
// bookkeeping, handlers only perform the side effect.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use weft_common::{
    batch::Batch,
    crypto::Hash,
    operation::Operation,
    pin::BatchPin,
    tokens::{TokenApproval, TokenPool, TokenTransfer, TokenTransferType},
};

use crate::{
    core::{
        error::CoreError,
        operations::{OperationHandler, OperationOutcome},
        storage::Storage,
    },
    plugins::{
        BlockchainPlugin, DataExchangePlugin, IdentityPlugin, OperationUpdate, PluginEvent,
        SharedStoragePlugin, TokensPlugin,
    },
};

fn input_uuid(op: &Operation, field: &str) -> Result<Uuid, CoreError> {
    op.input
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| CoreError::InvalidInput(format!("Operation input missing '{}'", field)))
}

fn input_str<'a>(op: &'a Operation, field: &str) -> Result<&'a str, CoreError> {
    op.input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::InvalidInput(format!("Operation input missing '{}'", field)))
}

async fn load_sealed_batch<S: Storage>(
    storage: &RwLock<S>,
    id: &Uuid,
) -> Result<Batch, CoreError> {
    let storage = storage.read().await;
    let batch = storage
        .get_batch(id)
        .await?
        .ok_or(CoreError::NotFound("Batch"))?;
    if !batch.is_sealed() {
        return Err(CoreError::BatchNotSealed(*id));
    }
    Ok(batch)
}

// Upload a sealed batch payload to shared storage and record the returned
// public reference on the batch row
pub struct UploadBatchHandler<S: Storage> {
    pub storage: Arc<RwLock<S>>,
    pub shared_storage: Arc<dyn SharedStoragePlugin>,
}

#[async_trait]
impl<S: Storage> OperationHandler for UploadBatchHandler<S> {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError> {
        let batch_id = input_uuid(op, "batch")?;
        let batch = load_sealed_batch(&self.storage, &batch_id).await?;
        let payload = batch.payload.wire_bytes()?;
        let payload_ref = self.shared_storage.upload(payload).await?;

        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        if let Err(e) = storage.set_batch_payload_ref(&batch_id, &payload_ref).await {
            storage.end_commit_point(false).await?;
            return Err(e);
        }
        storage.end_commit_point(true).await?;
        Ok(OperationOutcome::Complete(Some(
            json!({ "payload_ref": payload_ref }),
        )))
    }
}

// Submit the batch pin transaction on-chain
pub struct PinBatchHandler<S: Storage> {
    pub storage: Arc<RwLock<S>>,
    pub blockchain: Arc<dyn BlockchainPlugin>,
    pub identity: Arc<dyn IdentityPlugin>,
}

#[async_trait]
impl<S: Storage> OperationHandler for PinBatchHandler<S> {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError> {
        let batch_pin: BatchPin = serde_json::from_value(op.input.clone())?;
        let key = op.idempotency_key()?;
        let blockchain_id = self
            .blockchain
            .submit_batch_pin(&batch_pin, self.identity.local_signing_key(), &key)
            .await?;

        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        if let Err(e) = storage.add_blockchain_id(&op.tx, &blockchain_id).await {
            storage.end_commit_point(false).await?;
            return Err(e);
        }
        storage.end_commit_point(true).await?;
        Ok(OperationOutcome::Complete(Some(
            json!({ "blockchain_id": blockchain_id }),
        )))
    }

    async fn status(&self, op: &Operation) -> Result<Option<OperationUpdate>, CoreError> {
        Ok(self.blockchain.operation_status(op).await?)
    }
}

// Ship a sealed private batch payload to one group member node. Completion
// arrives asynchronously as a TransferResult correlated by operation id.
pub struct SendBatchHandler<S: Storage> {
    pub storage: Arc<RwLock<S>>,
    pub data_exchange: Arc<dyn DataExchangePlugin>,
}

#[async_trait]
impl<S: Storage> OperationHandler for SendBatchHandler<S> {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError> {
        let batch_id = input_uuid(op, "batch")?;
        let peer = input_str(op, "peer")?;
        let batch = load_sealed_batch(&self.storage, &batch_id).await?;
        let payload = batch.payload.wire_bytes()?;
        self.data_exchange
            .send_message(peer, &op.id, payload)
            .await?;
        Ok(OperationOutcome::Pending)
    }

    async fn status(&self, op: &Operation) -> Result<Option<OperationUpdate>, CoreError> {
        Ok(self.data_exchange.operation_status(op).await?)
    }
}

// Pull a missing broadcast payload down from shared storage and feed it
// back through the ingress
pub struct DownloadBatchHandler {
    pub shared_storage: Arc<dyn SharedStoragePlugin>,
    pub events_tx: mpsc::Sender<PluginEvent>,
}

#[async_trait]
impl OperationHandler for DownloadBatchHandler {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError> {
        let batch_id = input_uuid(op, "batch")?;
        let payload_ref = input_str(op, "payload_ref")?;
        let payload = self.shared_storage.download(payload_ref).await?;
        self.events_tx
            .send(PluginEvent::BatchDownloaded {
                batch_id,
                payload_ref: payload_ref.to_owned(),
                payload,
            })
            .await
            .map_err(|_| CoreError::Cancelled)?;
        Ok(OperationOutcome::Complete(None))
    }
}

// Ask the sender's node to push a missing blob to us
pub struct RequestBlobHandler {
    pub data_exchange: Arc<dyn DataExchangePlugin>,
}

#[async_trait]
impl OperationHandler for RequestBlobHandler {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError> {
        let peer = input_str(op, "peer")?;
        let hash: Hash = input_str(op, "hash")?
            .parse()
            .map_err(|_| CoreError::InvalidInput("Malformed blob hash".to_owned()))?;
        self.data_exchange
            .transfer_blob(peer, &op.id, &hash)
            .await?;
        Ok(OperationOutcome::Pending)
    }

    async fn status(&self, op: &Operation) -> Result<Option<OperationUpdate>, CoreError> {
        Ok(self.data_exchange.operation_status(op).await?)
    }
}

// Token submissions: accepted synchronously, confirmed by token events
pub struct CreatePoolHandler {
    pub tokens: Arc<dyn TokensPlugin>,
}

#[async_trait]
impl OperationHandler for CreatePoolHandler {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError> {
        let pool: TokenPool = serde_json::from_value(op.input.clone())?;
        let key = op.idempotency_key()?;
        self.tokens.create_pool(&pool, &key).await?;
        Ok(OperationOutcome::Pending)
    }

    async fn status(&self, op: &Operation) -> Result<Option<OperationUpdate>, CoreError> {
        Ok(self.tokens.operation_status(op).await?)
    }
}

pub struct TransferTokensHandler {
    pub tokens: Arc<dyn TokensPlugin>,
    pub identity: Arc<dyn IdentityPlugin>,
}

#[async_trait]
impl OperationHandler for TransferTokensHandler {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError> {
        let transfer: TokenTransfer = serde_json::from_value(op.input.clone())?;
        let key = op.idempotency_key()?;
        let signing_key = self.identity.local_signing_key();
        match transfer.transfer_type {
            TokenTransferType::Mint => self.tokens.mint(&transfer, signing_key, &key).await?,
            TokenTransferType::Burn => self.tokens.burn(&transfer, signing_key, &key).await?,
            TokenTransferType::Transfer => {
                self.tokens.transfer(&transfer, signing_key, &key).await?
            }
        }
        Ok(OperationOutcome::Pending)
    }

    async fn status(&self, op: &Operation) -> Result<Option<OperationUpdate>, CoreError> {
        Ok(self.tokens.operation_status(op).await?)
    }
}

// Submit an operator-signed network action (e.g. a governed namespace
// operation) straight to the chain
pub struct NetworkActionHandler {
    pub blockchain: Arc<dyn BlockchainPlugin>,
    pub identity: Arc<dyn IdentityPlugin>,
}

#[async_trait]
impl OperationHandler for NetworkActionHandler {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError> {
        let action = input_str(op, "action")?;
        let key = op.idempotency_key()?;
        let blockchain_id = self
            .blockchain
            .submit_network_action(action, self.identity.local_signing_key(), &key)
            .await?;
        Ok(OperationOutcome::Complete(Some(
            json!({ "blockchain_id": blockchain_id }),
        )))
    }

    async fn status(&self, op: &Operation) -> Result<Option<OperationUpdate>, CoreError> {
        Ok(self.blockchain.operation_status(op).await?)
    }
}

pub struct ApproveTokensHandler {
    pub tokens: Arc<dyn TokensPlugin>,
    pub identity: Arc<dyn IdentityPlugin>,
}

#[async_trait]
impl OperationHandler for ApproveTokensHandler {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError> {
        let approval: TokenApproval = serde_json::from_value(op.input.clone())?;
        let key = op.idempotency_key()?;
        self.tokens
            .approval(&approval, self.identity.local_signing_key(), &key)
            .await?;
        Ok(OperationOutcome::Pending)
    }

    async fn status(&self, op: &Operation) -> Result<Option<OperationUpdate>, CoreError> {
        Ok(self.tokens.operation_status(op).await?)
    }
}
