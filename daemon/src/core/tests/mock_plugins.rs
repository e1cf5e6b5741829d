// Failure-injecting and collecting doubles used around the simulator

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use weft_common::{
    crypto::Hash,
    event::Event,
    identity::VerifierType,
    operation::Operation,
    pin::BatchPin,
    subscription::Subscription,
};

use crate::{
    core::subscriptions::DeliveryTransport,
    plugins::{BlockchainPlugin, OperationUpdate, PluginError},
};

// Wraps a blockchain plugin and fails the first `failures` pin submissions
// with a retryable error
pub(crate) struct FlakyBlockchain {
    pub inner: Arc<dyn BlockchainPlugin>,
    pub failures: AtomicU32,
    pub attempts: AtomicU32,
}

impl FlakyBlockchain {
    pub fn new(inner: Arc<dyn BlockchainPlugin>, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl BlockchainPlugin for FlakyBlockchain {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn verifier_type(&self) -> VerifierType {
        self.inner.verifier_type()
    }

    async fn submit_batch_pin(
        &self,
        batch_pin: &BatchPin,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<String, PluginError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(PluginError::Unavailable("injected outage".to_owned()));
        }
        self.inner
            .submit_batch_pin(batch_pin, signing_key, idempotency_key)
            .await
    }

    async fn submit_network_action(
        &self,
        action: &str,
        signing_key: &str,
        idempotency_key: &Hash,
    ) -> Result<String, PluginError> {
        self.inner
            .submit_network_action(action, signing_key, idempotency_key)
            .await
    }

    async fn operation_status(
        &self,
        op: &Operation,
    ) -> Result<Option<OperationUpdate>, PluginError> {
        self.inner.operation_status(op).await
    }
}

// Records every delivered event, acknowledging immediately
pub(crate) struct CollectingTransport {
    pub delivered: Mutex<Vec<Event>>,
}

impl CollectingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.delivered
            .lock()
            .map(|events| events.iter().map(|event| event.sequence).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeliveryTransport for CollectingTransport {
    fn name(&self) -> &str {
        "collect"
    }

    async fn deliver(&self, _sub: &Subscription, event: &Event) -> Result<(), PluginError> {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(event.clone());
        }
        Ok(())
    }
}
