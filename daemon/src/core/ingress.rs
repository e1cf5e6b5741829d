use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, error, warn};
use metrics::counter;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use weft_common::{
    batch::{Batch, BatchType},
    crypto::{hash, Hash},
    data::Blob,
    event::{Event, EventType},
    message::MessageState,
    operation::OpStatus,
    pin::{BatchPin, Pin},
    time::{get_current_time_in_millis, TimestampMillis},
    tokens::{TokenApproval, TokenPool, TokenPoolState, TokenTransfer},
    transaction::{Transaction, TxType},
};

use crate::{
    core::{
        error::CoreError,
        notify::Notifier,
        operations::apply_operation_update,
        storage::Storage,
    },
    plugins::{OperationUpdate, PluginEvent},
};

// Normalizes every inbound plugin event into one durable commit point:
// the state mutation and the event row (with its sequence) land together,
// so a reader observing an event always sees its effects.
pub struct EventIngress<S: Storage> {
    storage: Arc<RwLock<S>>,
    // Namespace adopted for entities announced by other parties
    namespace: String,
    aggregator: Notifier,
    subscriptions: Notifier,
    rewind_tx: mpsc::Sender<Hash>,
    running: Arc<AtomicBool>,
}

impl<S: Storage> EventIngress<S> {
    pub fn new(
        storage: Arc<RwLock<S>>,
        namespace: String,
        aggregator: Notifier,
        subscriptions: Notifier,
        rewind_tx: mpsc::Sender<Hash>,
        running: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            namespace,
            aggregator,
            subscriptions,
            rewind_tx,
            running,
        })
    }

    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<PluginEvent>) {
        while self.running.load(Ordering::SeqCst) {
            let event = match rx.recv().await {
                Some(event) => event,
                None => break,
            };
            if let Err(e) = self.handle(event).await {
                error!("Failed to ingest plugin event: {}", e);
            }
        }
        debug!("Event ingress exiting");
    }

    async fn handle(&self, event: PluginEvent) -> Result<(), CoreError> {
        match event {
            PluginEvent::BatchPinComplete {
                batch_pin,
                signer,
                blockchain_tx,
            } => self.batch_pin_complete(batch_pin, signer, blockchain_tx).await,
            PluginEvent::MessageReceived { peer, payload } => {
                self.message_received(peer, payload).await
            }
            PluginEvent::BatchDownloaded {
                batch_id,
                payload_ref,
                payload,
            } => self.batch_downloaded(batch_id, payload_ref, payload).await,
            PluginEvent::BlobReceived { peer, hash, size } => {
                self.blob_received(peer, hash, size).await
            }
            PluginEvent::TransferResult { op, success, info } => {
                let update = OperationUpdate {
                    op,
                    status: if success {
                        OpStatus::Succeeded
                    } else {
                        OpStatus::Failed
                    },
                    blockchain_id: None,
                    output: None,
                    error: if success { None } else { info },
                };
                self.operation_update(update).await
            }
            PluginEvent::OperationUpdate(update) => self.operation_update(update).await,
            PluginEvent::TokenPoolCreated {
                connector,
                locator,
                blockchain_tx,
            } => self.token_pool_created(connector, locator, blockchain_tx).await,
            PluginEvent::TokensTransferred {
                transfer,
                blockchain_tx,
            } => self.tokens_transferred(transfer, blockchain_tx).await,
            PluginEvent::TokensApproved {
                approval,
                blockchain_tx,
            } => self.tokens_approved(approval, blockchain_tx).await,
        }
    }

    // ---- batch pins ----

    async fn batch_pin_complete(
        &self,
        batch_pin: BatchPin,
        signer: String,
        blockchain_tx: String,
    ) -> Result<(), CoreError> {
        let now = get_current_time_in_millis();
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let applied =
            Self::apply_batch_pin(&mut *storage, &batch_pin, &signer, &blockchain_tx, now).await;
        match applied {
            Ok(()) => storage.end_commit_point(true).await?,
            Err(e) => {
                storage.end_commit_point(false).await?;
                return Err(e);
            }
        }
        drop(storage);

        counter!("weft_pins_ingested_total").increment(batch_pin.contexts.len() as u64);
        self.aggregator.nudge();
        self.subscriptions.nudge();
        Ok(())
    }

    async fn apply_batch_pin(
        storage: &mut S,
        batch_pin: &BatchPin,
        signer: &str,
        blockchain_tx: &str,
        now: TimestampMillis,
    ) -> Result<(), CoreError> {
        // Our own batch carries its submission transaction; a foreign pin
        // gets a local transaction row for correlation
        let local_batch = storage.get_batch(&batch_pin.batch_id).await?;
        let tx_id = match local_batch.as_ref().and_then(|batch| batch.tx.as_ref()) {
            Some(tx_ref) => {
                let id = tx_ref.id;
                storage.add_blockchain_id(&id, blockchain_tx).await?;
                id
            }
            None => {
                let mut tx =
                    Transaction::new(batch_pin.namespace.clone(), TxType::BatchPin, now);
                tx.blockchain_ids.push(blockchain_tx.to_owned());
                storage.insert_transaction(&tx).await?;
                tx.id
            }
        };

        // The stored context is exactly what the chain carried: the masked
        // hash for a private batch, the bare context hash for broadcast.
        // Unmasking is the aggregator's job once it holds the batch body
        // and can recompute the expected form per (context, author, nonce).
        for (index, entry) in batch_pin.contexts.iter().enumerate() {
            let pin = Pin {
                sequence: 0,
                namespace: batch_pin.namespace.clone(),
                context: entry.context.clone(),
                signer: signer.to_owned(),
                nonce: entry.nonce,
                batch: batch_pin.batch_id,
                batch_hash: batch_pin.batch_hash.clone(),
                index: index as u64,
                payload_ref: batch_pin.payload_ref.clone(),
                dispatched: false,
                created: now,
            };
            storage.insert_pin(pin).await?;
        }

        storage
            .insert_event(Event::new(
                batch_pin.namespace.clone(),
                EventType::PinArrived,
                batch_pin.batch_id,
                Some(tx_id),
                None,
                now,
            ))
            .await?;

        // A private payload may have arrived ahead of its pin
        if local_batch.is_none() {
            if let Some(payload) = storage.get_pending_payload(&batch_pin.batch_hash).await? {
                Self::store_received_batch(
                    storage,
                    batch_pin.batch_id,
                    batch_pin.namespace.clone(),
                    batch_pin.batch_hash.clone(),
                    BatchType::Private,
                    &payload,
                    now,
                )
                .await?;
                storage
                    .delete_pending_payload(&batch_pin.batch_hash)
                    .await?;
            }
        }
        Ok(())
    }

    // ---- batch payloads ----

    async fn message_received(&self, peer: String, payload: Vec<u8>) -> Result<(), CoreError> {
        let payload_hash = hash(&payload);
        let now = get_current_time_in_millis();

        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let stored = async {
            let pins = storage.get_pins_for_batch_hash(&payload_hash).await?;
            match pins.first() {
                Some(pin) => {
                    Self::store_received_batch(
                        &mut *storage,
                        pin.batch,
                        pin.namespace.clone(),
                        payload_hash.clone(),
                        BatchType::Private,
                        &payload,
                        now,
                    )
                    .await
                    .map(Some)
                }
                None => {
                    // Pin not seen yet: park the payload under its hash
                    storage.upsert_pending_payload(&payload_hash, &payload).await?;
                    debug!(
                        "Parked a payload from {} until its pin arrives ({})",
                        peer, payload_hash
                    );
                    Ok(None)
                }
            }
        }
        .await;
        let contexts = match stored {
            Ok(contexts) => {
                storage.end_commit_point(true).await?;
                contexts.unwrap_or_default()
            }
            Err(e) => {
                storage.end_commit_point(false).await?;
                warn!("Quarantined a payload from {}: {}", peer, e);
                counter!("weft_payloads_quarantined_total").increment(1);
                Self::quarantine_pins(&mut *storage, None, Some(&payload_hash), now).await?;
                drop(storage);
                self.aggregator.nudge();
                self.subscriptions.nudge();
                return Ok(());
            }
        };
        drop(storage);

        self.aggregator.nudge();
        self.subscriptions.nudge();
        for context in contexts {
            let _ = self.rewind_tx.send(context).await;
        }
        Ok(())
    }

    async fn batch_downloaded(
        &self,
        batch_id: Uuid,
        payload_ref: String,
        payload: Vec<u8>,
    ) -> Result<(), CoreError> {
        let now = get_current_time_in_millis();
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let stored = async {
            let pins = storage.get_pins_for_batch(&batch_id).await?;
            let pin = pins
                .first()
                .ok_or(CoreError::NotFound("Pin"))?;
            Self::store_received_batch(
                &mut *storage,
                batch_id,
                pin.namespace.clone(),
                pin.batch_hash.clone(),
                BatchType::Broadcast,
                &payload,
                now,
            )
            .await
        }
        .await;
        match stored {
            Ok(contexts) => {
                storage.end_commit_point(true).await?;
                drop(storage);
                self.aggregator.nudge();
                self.subscriptions.nudge();
                for context in contexts {
                    let _ = self.rewind_tx.send(context).await;
                }
                Ok(())
            }
            Err(e) => {
                storage.end_commit_point(false).await?;
                warn!(
                    "Quarantined downloaded payload {} for batch {}: {}",
                    payload_ref, batch_id, e
                );
                counter!("weft_payloads_quarantined_total").increment(1);
                Self::quarantine_pins(&mut *storage, Some(batch_id), None, now).await?;
                drop(storage);
                self.aggregator.nudge();
                self.subscriptions.nudge();
                Ok(())
            }
        }
    }

    // A payload that failed verification can never deliver: consume its
    // pins so the aggregator stream stays live, and flag the batch for the
    // operator
    async fn quarantine_pins(
        storage: &mut S,
        batch: Option<Uuid>,
        batch_hash: Option<&Hash>,
        now: TimestampMillis,
    ) -> Result<(), CoreError> {
        storage.start_commit_point().await?;
        let applied = async {
            let pins = match (batch, batch_hash) {
                (Some(id), _) => storage.get_pins_for_batch(&id).await?,
                (None, Some(hash)) => storage.get_pins_for_batch_hash(hash).await?,
                (None, None) => Vec::new(),
            };
            if pins.is_empty() {
                return Ok(());
            }
            let namespace = pins[0].namespace.clone();
            let reference = pins[0].batch;
            for pin in &pins {
                storage.set_pin_dispatched(pin.sequence).await?;
            }
            storage
                .insert_event(Event::new(
                    namespace,
                    EventType::MessageRejected,
                    reference,
                    None,
                    None,
                    now,
                ))
                .await?;
            Ok::<(), CoreError>(())
        }
        .await;
        match applied {
            Ok(()) => storage.end_commit_point(true).await,
            Err(e) => {
                storage.end_commit_point(false).await?;
                Err(e)
            }
        }
    }

    // Verify and persist a batch received off-chain, with its messages in
    // pending state and its data rows. Returns the contexts its messages
    // order on, for rewinds.
    async fn store_received_batch(
        storage: &mut S,
        id: Uuid,
        namespace: String,
        expected_hash: Hash,
        batch_type: BatchType,
        payload: &[u8],
        now: TimestampMillis,
    ) -> Result<Vec<Hash>, CoreError> {
        let batch = Batch::restore(id, namespace.clone(), expected_hash, batch_type, payload, now)?;

        let mut contexts = Vec::new();
        for message in &batch.payload.messages {
            if !message.verify_hash()? {
                return Err(CoreError::IntegrityViolation(format!(
                    "Message {} hash mismatch in batch {}",
                    message.id, id
                )));
            }
            for context in message.contexts()? {
                if !contexts.contains(&context) {
                    contexts.push(context);
                }
            }
            let mut local = message.clone();
            local.state = MessageState::Pending;
            local.confirmed = None;
            storage.upsert_message(&local).await?;
        }
        for data in &batch.payload.data {
            if data.hash != Some(data.compute_hash()?) {
                return Err(CoreError::IntegrityViolation(format!(
                    "Data {} hash mismatch in batch {}",
                    data.id, id
                )));
            }
            storage.upsert_data(data).await?;
        }

        storage.upsert_batch(&batch).await?;
        storage
            .insert_event(Event::new(
                namespace,
                EventType::BatchReceived,
                id,
                None,
                None,
                now,
            ))
            .await?;
        counter!("weft_batches_received_total").increment(1);
        Ok(contexts)
    }

    // ---- blobs ----

    async fn blob_received(
        &self,
        peer: String,
        blob_hash: Hash,
        size: u64,
    ) -> Result<(), CoreError> {
        let now = get_current_time_in_millis();
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let applied = async {
            let blob = Blob {
                hash: blob_hash.clone(),
                size,
                received: now,
            };
            storage.upsert_blob(&blob).await?;

            // Contexts of every message gated on this blob, for rewinds
            let mut reference = Uuid::nil();
            let mut contexts = Vec::new();
            for data in storage.get_data_by_blob(&blob_hash).await? {
                reference = data.id;
                for message in storage.get_messages_for_data(&data.id).await? {
                    for context in message.contexts()? {
                        if !contexts.contains(&context) {
                            contexts.push(context);
                        }
                    }
                }
            }
            storage
                .insert_event(Event::new(
                    self.namespace.clone(),
                    EventType::BlobReceived,
                    reference,
                    None,
                    None,
                    now,
                ))
                .await?;
            Ok::<Vec<Hash>, CoreError>(contexts)
        }
        .await;
        let contexts = match applied {
            Ok(contexts) => {
                storage.end_commit_point(true).await?;
                contexts
            }
            Err(e) => {
                storage.end_commit_point(false).await?;
                return Err(e);
            }
        };
        drop(storage);

        if log::log_enabled!(log::Level::Debug) {
            debug!("Blob {} ({} bytes) received from {}", blob_hash, size, peer);
        }
        self.aggregator.nudge();
        self.subscriptions.nudge();
        for context in contexts {
            let _ = self.rewind_tx.send(context).await;
        }
        Ok(())
    }

    // ---- operations ----

    async fn operation_update(&self, update: OperationUpdate) -> Result<(), CoreError> {
        let now = get_current_time_in_millis();
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let applied = apply_operation_update(&mut *storage, &update, now).await;
        match applied {
            Ok(_) => storage.end_commit_point(true).await?,
            Err(e) => {
                storage.end_commit_point(false).await?;
                return Err(e);
            }
        }
        drop(storage);
        self.subscriptions.nudge();
        Ok(())
    }

    // ---- tokens ----

    async fn token_pool_created(
        &self,
        connector: String,
        locator: String,
        blockchain_tx: Option<String>,
    ) -> Result<(), CoreError> {
        let now = get_current_time_in_millis();
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let applied = async {
            let pool = match storage.get_token_pool_by_locator(&connector, &locator).await? {
                Some(pool) if pool.state == TokenPoolState::Confirmed => return Ok(None),
                Some(mut pool) => {
                    pool.state = TokenPoolState::Confirmed;
                    pool
                }
                // Announced by another party: adopt it under the local
                // namespace with the locator as its name
                None => TokenPool {
                    id: Uuid::new_v4(),
                    namespace: self.namespace.clone(),
                    name: locator.clone(),
                    connector: connector.clone(),
                    locator: locator.clone(),
                    tx: None,
                    state: TokenPoolState::Confirmed,
                    created: now,
                },
            };
            storage.upsert_token_pool(&pool).await?;
            if let (Some(tx), Some(blockchain_tx)) = (pool.tx, blockchain_tx.as_ref()) {
                if storage.get_transaction(&tx).await?.is_some() {
                    storage.add_blockchain_id(&tx, blockchain_tx).await?;
                }
            }
            storage
                .insert_event(Event::new(
                    pool.namespace.clone(),
                    EventType::TokenPoolConfirmed,
                    pool.id,
                    pool.tx,
                    None,
                    now,
                ))
                .await?;
            Ok::<Option<()>, CoreError>(Some(()))
        }
        .await;
        match applied {
            Ok(_) => storage.end_commit_point(true).await?,
            Err(e) => {
                storage.end_commit_point(false).await?;
                return Err(e);
            }
        }
        drop(storage);
        self.subscriptions.nudge();
        Ok(())
    }

    async fn tokens_transferred(
        &self,
        transfer: TokenTransfer,
        blockchain_tx: Option<String>,
    ) -> Result<(), CoreError> {
        let now = get_current_time_in_millis();
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let applied = async {
            storage.upsert_token_transfer(&transfer).await?;
            if let (Some(tx), Some(blockchain_tx)) = (transfer.tx, blockchain_tx.as_ref()) {
                if storage.get_transaction(&tx).await?.is_some() {
                    storage.add_blockchain_id(&tx, blockchain_tx).await?;
                }
            }
            storage
                .insert_event(Event::new(
                    transfer.namespace.clone(),
                    EventType::TokenTransferConfirmed,
                    transfer.local_id,
                    transfer.tx,
                    None,
                    now,
                ))
                .await?;
            Ok::<(), CoreError>(())
        }
        .await;
        match applied {
            Ok(()) => storage.end_commit_point(true).await?,
            Err(e) => {
                storage.end_commit_point(false).await?;
                return Err(e);
            }
        }
        drop(storage);
        self.subscriptions.nudge();
        Ok(())
    }

    async fn tokens_approved(
        &self,
        approval: TokenApproval,
        blockchain_tx: Option<String>,
    ) -> Result<(), CoreError> {
        let now = get_current_time_in_millis();
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let applied = async {
            storage.upsert_token_approval(&approval).await?;
            if let (Some(tx), Some(blockchain_tx)) = (approval.tx, blockchain_tx.as_ref()) {
                if storage.get_transaction(&tx).await?.is_some() {
                    storage.add_blockchain_id(&tx, blockchain_tx).await?;
                }
            }
            storage
                .insert_event(Event::new(
                    approval.namespace.clone(),
                    EventType::TokenApprovalConfirmed,
                    approval.local_id,
                    approval.tx,
                    None,
                    now,
                ))
                .await?;
            Ok::<(), CoreError>(())
        }
        .await;
        match applied {
            Ok(()) => storage.end_commit_point(true).await?,
            Err(e) => {
                storage.end_commit_point(false).await?;
                return Err(e);
            }
        }
        drop(storage);
        self.subscriptions.nudge();
        Ok(())
    }
}
