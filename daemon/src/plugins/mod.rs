mod events;
pub mod simulator;

pub use events::*;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;
use weft_common::{
    crypto::Hash,
    identity::{Identity, VerifierType},
    operation::Operation,
    pin::BatchPin,
    tokens::{TokenApproval, TokenPool, TokenTransfer},
};

// Errors surfaced by plugin calls, classified for the operation runner:
// Unavailable is worth retrying, Rejected is fatal for the attempt
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin remote unavailable: {0}")]
    Unavailable(String),

    #[error("Plugin rejected the request: {0}")]
    Rejected(String),
}

// Outbound plugin contracts. Every submission takes an idempotency key the
// plugin must treat as such: resubmitting a key it has already processed
// must not produce a second side effect.

#[async_trait]
pub trait BlockchainPlugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn verifier_type(&self) -> VerifierType;

    // Returns the blockchain transaction id of the submission
    async fn submit_batch_pin(
        &self,
        batch_pin: &BatchPin,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<String, PluginError>;

    async fn submit_network_action(
        &self,
        action: &str,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<String, PluginError>;

    // Authoritative status of a previously submitted operation, used by the
    // reconciliation sweep. None means the plugin has no record of it.
    async fn operation_status(
        &self,
        op: &Operation,
    ) -> Result<Option<OperationUpdate>, PluginError>;
}

#[async_trait]
pub trait DataExchangePlugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    // Point-to-point payload transfer; `op` correlates the asynchronous
    // TransferResult event back to the sending operation
    async fn send_message(
        &self,
        peer: &str,
        op: &Uuid,
        payload: Vec<u8>,
    ) -> Result<(), PluginError>;

    // Ask a peer to push a blob to us
    async fn transfer_blob(&self, peer: &str, op: &Uuid, hash: &Hash) -> Result<(), PluginError>;

    async fn operation_status(
        &self,
        op: &Operation,
    ) -> Result<Option<OperationUpdate>, PluginError>;
}

#[async_trait]
pub trait SharedStoragePlugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    // Returns the public payload reference
    async fn upload(&self, payload: Vec<u8>) -> Result<String, PluginError>;

    async fn download(&self, payload_ref: &str) -> Result<Vec<u8>, PluginError>;
}

#[async_trait]
pub trait TokensPlugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn create_pool(&self, pool: &TokenPool, idempotency_key: &Hash)
        -> Result<(), PluginError>;

    async fn mint(
        &self,
        transfer: &TokenTransfer,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<(), PluginError>;

    async fn burn(
        &self,
        transfer: &TokenTransfer,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<(), PluginError>;

    async fn transfer(
        &self,
        transfer: &TokenTransfer,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<(), PluginError>;

    async fn approval(
        &self,
        approval: &TokenApproval,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<(), PluginError>;

    async fn operation_status(
        &self,
        op: &Operation,
    ) -> Result<Option<OperationUpdate>, PluginError>;
}

#[async_trait]
pub trait IdentityPlugin: Send + Sync + 'static {
    async fn resolve(&self, key: &str) -> Result<Identity, PluginError>;

    fn local_org(&self) -> &str;

    fn local_node(&self) -> &str;

    fn local_signing_key(&self) -> &str;

    fn is_local(&self, author: &str) -> bool;
}

// The plugin set one namespace runs against, selected by configuration at
// startup and registered by name
#[derive(Clone)]
pub struct Plugins {
    pub blockchain: Arc<dyn BlockchainPlugin>,
    pub data_exchange: Arc<dyn DataExchangePlugin>,
    pub shared_storage: Arc<dyn SharedStoragePlugin>,
    pub tokens: Arc<dyn TokensPlugin>,
    pub identity: Arc<dyn IdentityPlugin>,
}
