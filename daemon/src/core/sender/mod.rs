mod broadcast;
mod private;

use std::sync::Arc;

use log::warn;
use metrics::counter;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use weft_common::{
    batch::{Batch, BatchType},
    message::context_hash,
    operation::{OpStatus, OpType, Operation},
    pin::BatchPin,
    time::get_current_time_in_millis,
    tokio::spawn_task,
};

use crate::{
    core::{error::CoreError, operations::OperationRunner, storage::Storage},
    plugins::Plugins,
};

// Routes every sealed batch to its per-type sender. All side effects run as
// operations under the batch's transaction: a failure leaves the batch
// sealed, never re-sealed, never re-nonced, and reconciliation or a manual
// retry picks it back up.
pub struct BatchSenders<S: Storage> {
    pub(super) storage: Arc<RwLock<S>>,
    pub(super) runner: Arc<OperationRunner<S>>,
    pub(super) plugins: Plugins,
}

impl<S: Storage> BatchSenders<S> {
    pub fn new(
        storage: Arc<RwLock<S>>,
        runner: Arc<OperationRunner<S>>,
        plugins: Plugins,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            runner,
            plugins,
        })
    }

    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Uuid>) {
        while let Some(batch_id) = rx.recv().await {
            let senders = Arc::clone(&self);
            spawn_task(format!("send-batch-{}", batch_id), async move {
                if let Err(e) = senders.send(batch_id).await {
                    warn!("Dispatch of batch {} stopped: {}", batch_id, e);
                }
            });
        }
    }

    pub async fn send(&self, batch_id: Uuid) -> Result<(), CoreError> {
        let batch = {
            let storage = self.storage.read().await;
            storage.get_batch(&batch_id).await?
        }
        .ok_or(CoreError::NotFound("Batch"))?;
        if !batch.is_sealed() {
            return Err(CoreError::BatchNotSealed(batch_id));
        }
        match batch.header.batch_type {
            BatchType::Broadcast => broadcast::send(self, batch).await,
            BatchType::Private => private::send(self, batch).await,
        }
    }

    // The final step shared by both senders: submit the batch pin on-chain.
    // The context entries were finalized at seal time in their on-chain
    // form: masked hashes within a private group, bare nonce-chained
    // context hashes for broadcast. A private batch whose entries were not
    // masked must never reach the chain.
    pub(super) async fn submit_pin(
        &self,
        batch: &Batch,
        payload_ref: Option<String>,
    ) -> Result<(), CoreError> {
        let tx = batch
            .tx
            .as_ref()
            .ok_or(CoreError::NotFound("Transaction"))?
            .id;
        let batch_hash = batch
            .hash
            .clone()
            .ok_or(CoreError::BatchNotSealed(batch.header.id))?;
        if batch.header.batch_type.is_private() {
            let exposed = batch
                .payload
                .pin_order()
                .iter()
                .zip(&batch.pins)
                .any(|(&(message, topic), entry)| {
                    context_hash(
                        &message.header.namespace,
                        topic,
                        message.header.group.as_ref(),
                    )
                    .map(|context| entry.context == context)
                    .unwrap_or(false)
                });
            if exposed {
                return Err(CoreError::IntegrityViolation(format!(
                    "Private batch {} carries unmasked pin entries",
                    batch.header.id
                )));
            }
        }
        let batch_pin = BatchPin {
            namespace: batch.header.namespace.clone(),
            batch_id: batch.header.id,
            batch_hash,
            payload_ref,
            contexts: batch.pins.clone(),
        };

        let op = Operation::new(
            batch.header.namespace.clone(),
            tx,
            OpType::BlockchainPinBatch,
            self.plugins.blockchain.name().to_owned(),
            serde_json::to_value(&batch_pin)?,
            get_current_time_in_millis(),
        );
        let op = self.runner.run_operation(op).await?;
        match op.status {
            OpStatus::Succeeded | OpStatus::Pending => {
                counter!("weft_batches_pinned_total").increment(1);
                Ok(())
            }
            _ => Err(CoreError::RemoteRejected(
                op.error
                    .unwrap_or_else(|| "Batch pin submission failed".to_owned()),
            )),
        }
    }
}
