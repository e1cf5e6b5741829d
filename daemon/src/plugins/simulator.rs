// In-process simulation of the multi-party network: an ordered pin chain,
// a shared payload store and per-node event channels. Drives the node in
// standalone development mode and the end-to-end tests; real deployments
// register connector-backed plugins instead.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use log::debug;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;
use weft_common::{
    crypto::Hash,
    identity::{Identity, VerifierType},
    operation::{OpStatus, Operation},
    pin::BatchPin,
    tokens::{TokenApproval, TokenPool, TokenTransfer},
};

use crate::plugins::{
    BlockchainPlugin, DataExchangePlugin, IdentityPlugin, OperationUpdate, PluginError,
    PluginEvent, Plugins, SharedStoragePlugin, TokensPlugin,
};

pub struct SimulatedNetwork {
    nodes: RwLock<Vec<(String, mpsc::Sender<PluginEvent>)>>,
    directory: RwLock<HashMap<String, Identity>>,
    payloads: RwLock<HashMap<String, Vec<u8>>>,
    counter: AtomicU64,
    pins_submitted: AtomicU64,
    // Serializes pin broadcast so every node observes one total order
    order: Mutex<()>,
}

impl SimulatedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(Vec::new()),
            directory: RwLock::new(HashMap::new()),
            payloads: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(0),
            pins_submitted: AtomicU64::new(0),
            order: Mutex::new(()),
        })
    }

    pub async fn register_node(
        &self,
        org: &str,
        node: &str,
        events: mpsc::Sender<PluginEvent>,
    ) {
        self.nodes.write().await.push((node.to_owned(), events));
        self.directory.write().await.insert(
            org.to_owned(),
            Identity {
                org: org.to_owned(),
                node: node.to_owned(),
            },
        );
        debug!("Simulated network registered {} ({})", org, node);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    // Total number of pin transactions accepted by the simulated chain
    pub fn pins_submitted(&self) -> u64 {
        self.pins_submitted.load(Ordering::SeqCst)
    }

    // Seed a payload directly into the simulated shared storage
    pub async fn store_payload(&self, payload: Vec<u8>) -> String {
        let payload_ref = self.next_id("payload-");
        self.payloads
            .write()
            .await
            .insert(payload_ref.clone(), payload);
        payload_ref
    }

    pub async fn broadcast(&self, event: PluginEvent) {
        let _guard = self.order.lock().await;
        let nodes = self.nodes.read().await;
        for (_, tx) in nodes.iter() {
            let _ = tx.send(event.clone()).await;
        }
    }

    pub async fn send_to(&self, node: &str, event: PluginEvent) -> Result<(), PluginError> {
        let tx = {
            let nodes = self.nodes.read().await;
            nodes
                .iter()
                .find(|(name, _)| name == node)
                .map(|(_, tx)| tx.clone())
        }
        .ok_or_else(|| PluginError::Unavailable(format!("Unknown node '{}'", node)))?;
        tx.send(event)
            .await
            .map_err(|_| PluginError::Unavailable(format!("Node '{}' is gone", node)))
    }

    async fn resolve(&self, org: &str) -> Option<Identity> {
        self.directory.read().await.get(org).cloned()
    }
}

// ---- blockchain ----

pub struct SimBlockchain {
    network: Arc<SimulatedNetwork>,
    // Idempotency keys already accepted, with the tx they produced
    submissions: Mutex<HashMap<Hash, String>>,
}

#[async_trait]
impl BlockchainPlugin for SimBlockchain {
    fn name(&self) -> &str {
        "simchain"
    }

    fn verifier_type(&self) -> VerifierType {
        VerifierType::EthAddress
    }

    async fn submit_batch_pin(
        &self,
        batch_pin: &BatchPin,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<String, PluginError> {
        let mut submissions = self.submissions.lock().await;
        if let Some(existing) = submissions.get(idempotency_key) {
            // Resubmission of a key we already sequenced
            return Ok(existing.clone());
        }
        let blockchain_tx = self.network.next_id("0xsim");
        submissions.insert(idempotency_key.clone(), blockchain_tx.clone());
        drop(submissions);

        self.network.pins_submitted.fetch_add(1, Ordering::SeqCst);
        self.network
            .broadcast(PluginEvent::BatchPinComplete {
                batch_pin: batch_pin.clone(),
                signer: signing_key.to_owned(),
                blockchain_tx: blockchain_tx.clone(),
            })
            .await;
        Ok(blockchain_tx)
    }

    async fn submit_network_action(
        &self,
        _action: &str,
        _signing_key: &str,
        _idempotency_key: &Hash,
    ) -> Result<String, PluginError> {
        Ok(self.network.next_id("0xsim"))
    }

    async fn operation_status(
        &self,
        op: &Operation,
    ) -> Result<Option<OperationUpdate>, PluginError> {
        let key = op
            .idempotency_key()
            .map_err(|e| PluginError::Rejected(e.to_string()))?;
        let submissions = self.submissions.lock().await;
        Ok(submissions.get(&key).map(|blockchain_tx| OperationUpdate {
            op: op.id,
            status: OpStatus::Succeeded,
            blockchain_id: Some(blockchain_tx.clone()),
            output: None,
            error: None,
        }))
    }
}

// ---- shared storage ----

pub struct SimSharedStorage {
    network: Arc<SimulatedNetwork>,
}

#[async_trait]
impl SharedStoragePlugin for SimSharedStorage {
    fn name(&self) -> &str {
        "simstore"
    }

    async fn upload(&self, payload: Vec<u8>) -> Result<String, PluginError> {
        let payload_ref = self.network.next_id("payload-");
        self.network
            .payloads
            .write()
            .await
            .insert(payload_ref.clone(), payload);
        Ok(payload_ref)
    }

    async fn download(&self, payload_ref: &str) -> Result<Vec<u8>, PluginError> {
        self.network
            .payloads
            .read()
            .await
            .get(payload_ref)
            .cloned()
            .ok_or_else(|| PluginError::Unavailable(format!("Unknown ref '{}'", payload_ref)))
    }
}

// ---- data exchange ----

pub struct SimDataExchange {
    network: Arc<SimulatedNetwork>,
    local_node: String,
}

#[async_trait]
impl DataExchangePlugin for SimDataExchange {
    fn name(&self) -> &str {
        "simdx"
    }

    async fn send_message(
        &self,
        peer: &str,
        op: &Uuid,
        payload: Vec<u8>,
    ) -> Result<(), PluginError> {
        self.network
            .send_to(
                peer,
                PluginEvent::MessageReceived {
                    peer: self.local_node.clone(),
                    payload,
                },
            )
            .await?;
        self.network
            .send_to(
                &self.local_node,
                PluginEvent::TransferResult {
                    op: *op,
                    success: true,
                    info: None,
                },
            )
            .await
    }

    async fn transfer_blob(
        &self,
        peer: &str,
        op: &Uuid,
        hash: &Hash,
    ) -> Result<(), PluginError> {
        // The simulated peer always holds the blob and pushes it right back
        self.network
            .send_to(
                &self.local_node,
                PluginEvent::BlobReceived {
                    peer: peer.to_owned(),
                    hash: hash.clone(),
                    size: 0,
                },
            )
            .await?;
        self.network
            .send_to(
                &self.local_node,
                PluginEvent::TransferResult {
                    op: *op,
                    success: true,
                    info: None,
                },
            )
            .await
    }

    async fn operation_status(
        &self,
        _op: &Operation,
    ) -> Result<Option<OperationUpdate>, PluginError> {
        Ok(None)
    }
}

// ---- tokens ----

pub struct SimTokens {
    network: Arc<SimulatedNetwork>,
    processed: Mutex<HashMap<Hash, String>>,
}

impl SimTokens {
    async fn accept(&self, idempotency_key: &Hash) -> Option<String> {
        let mut processed = self.processed.lock().await;
        if processed.contains_key(idempotency_key) {
            return None;
        }
        let blockchain_tx = self.network.next_id("0xsim");
        processed.insert(idempotency_key.clone(), blockchain_tx.clone());
        Some(blockchain_tx)
    }
}

#[async_trait]
impl TokensPlugin for SimTokens {
    fn name(&self) -> &str {
        "simtokens"
    }

    async fn create_pool(
        &self,
        pool: &TokenPool,
        idempotency_key: &Hash,
    ) -> Result<(), PluginError> {
        if let Some(blockchain_tx) = self.accept(idempotency_key).await {
            self.network
                .broadcast(PluginEvent::TokenPoolCreated {
                    connector: self.name().to_owned(),
                    locator: pool.locator.clone(),
                    blockchain_tx: Some(blockchain_tx),
                })
                .await;
        }
        Ok(())
    }

    async fn mint(
        &self,
        transfer: &TokenTransfer,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<(), PluginError> {
        self.transfer(transfer, signing_key, idempotency_key).await
    }

    async fn burn(
        &self,
        transfer: &TokenTransfer,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<(), PluginError> {
        self.transfer(transfer, signing_key, idempotency_key).await
    }

    async fn transfer(
        &self,
        transfer: &TokenTransfer,
        _signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<(), PluginError> {
        if let Some(blockchain_tx) = self.accept(idempotency_key).await {
            self.network
                .broadcast(PluginEvent::TokensTransferred {
                    transfer: transfer.clone(),
                    blockchain_tx: Some(blockchain_tx),
                })
                .await;
        }
        Ok(())
    }

    async fn approval(
        &self,
        approval: &TokenApproval,
        _signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<(), PluginError> {
        if let Some(blockchain_tx) = self.accept(idempotency_key).await {
            self.network
                .broadcast(PluginEvent::TokensApproved {
                    approval: approval.clone(),
                    blockchain_tx: Some(blockchain_tx),
                })
                .await;
        }
        Ok(())
    }

    async fn operation_status(
        &self,
        op: &Operation,
    ) -> Result<Option<OperationUpdate>, PluginError> {
        let key = op
            .idempotency_key()
            .map_err(|e| PluginError::Rejected(e.to_string()))?;
        let processed = self.processed.lock().await;
        Ok(processed.get(&key).map(|blockchain_tx| OperationUpdate {
            op: op.id,
            status: OpStatus::Succeeded,
            blockchain_id: Some(blockchain_tx.clone()),
            output: None,
            error: None,
        }))
    }
}

// ---- identity ----

pub struct SimIdentity {
    network: Arc<SimulatedNetwork>,
    org: String,
    node: String,
    signing_key: String,
}

#[async_trait]
impl IdentityPlugin for SimIdentity {
    async fn resolve(&self, key: &str) -> Result<Identity, PluginError> {
        self.network
            .resolve(key)
            .await
            .ok_or_else(|| PluginError::Rejected(format!("Unknown identity '{}'", key)))
    }

    fn local_org(&self) -> &str {
        &self.org
    }

    fn local_node(&self) -> &str {
        &self.node
    }

    fn local_signing_key(&self) -> &str {
        &self.signing_key
    }

    fn is_local(&self, author: &str) -> bool {
        author == self.org
    }
}

// Assemble the full simulator plugin set for one node
pub fn simulator_plugins(
    network: Arc<SimulatedNetwork>,
    org: &str,
    node: &str,
    signing_key: &str,
) -> Plugins {
    Plugins {
        blockchain: Arc::new(SimBlockchain {
            network: Arc::clone(&network),
            submissions: Mutex::new(HashMap::new()),
        }),
        data_exchange: Arc::new(SimDataExchange {
            network: Arc::clone(&network),
            local_node: node.to_owned(),
        }),
        shared_storage: Arc::new(SimSharedStorage {
            network: Arc::clone(&network),
        }),
        tokens: Arc::new(SimTokens {
            network: Arc::clone(&network),
            processed: Mutex::new(HashMap::new()),
        }),
        identity: Arc::new(SimIdentity {
            network,
            org: org.to_owned(),
            node: node.to_owned(),
            signing_key: signing_key.to_owned(),
        }),
    }
}
