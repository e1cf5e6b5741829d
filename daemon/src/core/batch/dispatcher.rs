use std::{collections::HashMap, sync::Arc, time::Duration};

use dashmap::DashMap;
use indexmap::IndexMap;
use log::{debug, trace, warn};
use metrics::counter;
use tokio::{
    sync::{mpsc, RwLock},
    time::sleep,
};
use uuid::Uuid;
use weft_common::{
    batch::{Batch, BatchHeader, BatchPayload, TxRef},
    crypto::Hash,
    data::Data,
    event::{Event, EventType},
    message::{context_hash, Message, MessageState},
    pin::{expected_pin_hash, nonce_key, PinEntry},
    time::{get_current_time_in_millis, TimestampMillis},
    tokio::select,
    transaction::{Transaction, TxType},
};

use crate::core::{
    batch::{BatchConfig, BatchKey, BatchManager},
    error::CoreError,
    storage::Storage,
};

struct OpenBatch {
    id: Uuid,
    created: TimestampMillis,
}

enum FillOutcome {
    // Nothing staged, nothing open
    Idle,
    // Batch open and below every seal criterion, timer armed by the caller
    Open,
    // Sealed; `more` signals further staged messages are already waiting
    Sealed { batch_id: Uuid, more: bool },
}

// One dispatcher per batch key. Owns at most one open batch; every state
// mutation happens inside a single commit point so a failure at any step
// leaves the messages staged.
pub(crate) struct BatchDispatcher<S: Storage> {
    storage: Arc<RwLock<S>>,
    dispatchers: Arc<DashMap<BatchKey, mpsc::Sender<()>>>,
    manager: Arc<BatchManager<S>>,
    sealed_tx: mpsc::Sender<Uuid>,
    config: BatchConfig,
    key: BatchKey,
    open: Option<OpenBatch>,
}

impl<S: Storage> BatchDispatcher<S> {
    pub(crate) fn new(
        storage: Arc<RwLock<S>>,
        dispatchers: Arc<DashMap<BatchKey, mpsc::Sender<()>>>,
        manager: Arc<BatchManager<S>>,
        sealed_tx: mpsc::Sender<Uuid>,
        config: BatchConfig,
        key: BatchKey,
    ) -> Self {
        Self {
            storage,
            dispatchers,
            manager,
            sealed_tx,
            config,
            key,
            open: None,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<()>) {
        let mut failures: u32 = 0;
        loop {
            let wait = match &self.open {
                Some(open) => {
                    let age = get_current_time_in_millis().saturating_sub(open.created);
                    self.config.timeout_millis.saturating_sub(age).max(1)
                }
                None => self.config.quiescence_millis,
            };

            select! {
                wakeup = rx.recv() => {
                    if wakeup.is_none() {
                        debug!("Batch dispatcher {} channel closed", self.key);
                        return;
                    }
                }
                _ = sleep(Duration::from_millis(wait)) => {
                    if self.open.is_none() {
                        self.quiesce().await;
                        return;
                    }
                    // batch timeout elapsed, fall through and seal by age
                }
            }

            match self.process().await {
                Ok(()) => failures = 0,
                Err(e) => {
                    // Rolled back: the messages are still staged, retry
                    failures += 1;
                    warn!(
                        "Batch dispatcher {} failed (attempt {}): {}",
                        self.key, failures, e
                    );
                    sleep(Duration::from_millis(
                        self.config.retry.delay_millis(failures.saturating_sub(1)),
                    ))
                    .await;
                    // Make sure we run again even without a new wakeup
                    self.manager.notify_dispatcher(self.key.clone());
                }
            }
        }
    }

    // Deregister first, then take a last look at the staged backlog: any
    // message staged before the removal is either seen here or triggers a
    // fresh dispatcher through the now-empty map entry
    async fn quiesce(&self) {
        if log::log_enabled!(log::Level::Trace) {
            trace!("Batch dispatcher {} quiescing", self.key);
        }
        self.dispatchers.remove(&self.key);
        let leftover = {
            let storage = self.storage.read().await;
            storage
                .get_staged_messages(&self.key, 1)
                .await
                .map(|staged| !staged.is_empty())
                .unwrap_or(true)
        };
        if leftover {
            self.manager.notify_dispatcher(self.key.clone());
        }
    }

    async fn process(&mut self) -> Result<(), CoreError> {
        loop {
            let outcome = {
                let storage_handle = self.storage.clone();
                let mut storage = storage_handle.write().await;
                storage.start_commit_point().await?;
                match self.fill_and_seal(&mut *storage).await {
                    Ok(outcome) => {
                        storage.end_commit_point(true).await?;
                        outcome
                    }
                    Err(e) => {
                        let _ = storage.end_commit_point(false).await;
                        return Err(e);
                    }
                }
            };

            match outcome {
                FillOutcome::Idle | FillOutcome::Open => return Ok(()),
                FillOutcome::Sealed { batch_id, more } => {
                    counter!("weft_batches_sealed_total").increment(1);
                    self.open = None;
                    if self.sealed_tx.send(batch_id).await.is_err() {
                        warn!("Sealed batch channel closed, batch {} parked", batch_id);
                        return Ok(());
                    }
                    if !more {
                        return Ok(());
                    }
                    // A full page was sealed and more messages wait: drain
                }
            }
        }
    }

    fn new_batch(&self, now: TimestampMillis) -> Batch {
        Batch {
            header: BatchHeader {
                id: Uuid::new_v4(),
                namespace: self.key.namespace.clone(),
                batch_type: self.key.batch_type,
                author: self.key.author.clone(),
                key: self.key.key.clone(),
                group: self.key.group.clone(),
                created: now,
            },
            hash: None,
            payload: BatchPayload::default(),
            pins: Vec::new(),
            tx: None,
            payload_ref: None,
            confirmed: None,
        }
    }

    async fn fill_and_seal(&mut self, storage: &mut S) -> Result<FillOutcome, CoreError> {
        let now = get_current_time_in_millis();

        let (mut batch, created) = match &self.open {
            Some(open) => match storage.get_batch(&open.id).await? {
                Some(batch) if !batch.is_sealed() => (batch, open.created),
                // Row gone or sealed under us: start clean
                _ => (self.new_batch(now), now),
            },
            None => (self.new_batch(now), now),
        };
        let batch_id = batch.header.id;

        let room = self
            .config
            .max_messages
            .saturating_sub(batch.payload.messages.len());
        let staged = storage.get_staged_messages(&self.key, room).await?;
        if staged.is_empty() && batch.payload.messages.is_empty() {
            return Ok(FillOutcome::Idle);
        }

        // Data rows are shared across messages: dedupe by id while keeping
        // first-insertion order so the payload bytes stay deterministic
        let mut data_rows: IndexMap<Uuid, Data> = batch
            .payload
            .data
            .drain(..)
            .map(|row| (row.id, row))
            .collect();
        for message in &staged {
            let data = storage.get_data_many(&message.data).await?;
            if data.len() != message.data.len() {
                let missing = message
                    .data
                    .iter()
                    .find(|data_ref| !data.iter().any(|d| d.id == data_ref.id))
                    .map(|data_ref| data_ref.id)
                    .unwrap_or(message.id);
                return Err(CoreError::InvalidRef(missing));
            }
            for row in data {
                data_rows.entry(row.id).or_insert(row);
            }
            batch.payload.messages.push(wire_message(message, batch_id));
            storage
                .set_message_batch(&message.id, &batch_id, MessageState::Ready)
                .await?;
        }
        batch.payload.data = data_rows.into_values().collect();

        let count = batch.payload.messages.len();
        let size = batch.payload.size_bytes()?;
        let age = now.saturating_sub(created);
        let full = count >= self.config.max_messages || size >= self.config.max_bytes;

        if full || age >= self.config.timeout_millis {
            self.seal(storage, &mut batch, now).await?;
            storage.upsert_batch(&batch).await?;
            for message in &batch.payload.messages {
                storage
                    .set_message_batch(&message.id, &batch_id, MessageState::Sent)
                    .await?;
            }
            if log::log_enabled!(log::Level::Debug) {
                debug!(
                    "Sealed batch {} with {} messages ({} bytes) for {}",
                    batch_id, count, size, self.key
                );
            }
            let more = full && !storage.get_staged_messages(&self.key, 1).await?.is_empty();
            return Ok(FillOutcome::Sealed { batch_id, more });
        }

        storage.upsert_batch(&batch).await?;
        self.open = Some(OpenBatch {
            id: batch_id,
            created,
        });
        Ok(FillOutcome::Open)
    }

    // Seal: freeze the payload hash, allocate one nonce per (context, author)
    // pin in payload order, and bind the submission transaction. This is the
    // only irreversible step, and it happens inside the same commit point as
    // the fill. Private entries go on the wire masked so the public chain
    // never sees the true context or author.
    async fn seal(
        &self,
        storage: &mut S,
        batch: &mut Batch,
        now: TimestampMillis,
    ) -> Result<(), CoreError> {
        batch.hash = Some(batch.payload.hash()?);
        let private = self.key.batch_type.is_private();

        let mut assigned: HashMap<Hash, u64> = HashMap::new();
        let mut entries = Vec::new();
        for (message, topic) in batch.payload.pin_order() {
            let context = context_hash(
                &message.header.namespace,
                topic,
                message.header.group.as_ref(),
            )?;
            let key = nonce_key(&context, &message.header.author);
            let nonce = match assigned.get(&key) {
                Some(previous) => previous + 1,
                None => match storage.get_latest_nonce(&key).await? {
                    Some(latest) => latest + 1,
                    None => 0,
                },
            };
            assigned.insert(key, nonce);
            entries.push(PinEntry {
                context: expected_pin_hash(&context, &message.header.author, nonce, private),
                nonce,
            });
        }
        for (key, nonce) in &assigned {
            storage.set_latest_nonce(key, *nonce).await?;
        }
        batch.pins = entries;

        let tx = Transaction::new(self.key.namespace.clone(), TxType::BatchPin, now);
        storage.insert_transaction(&tx).await?;
        storage
            .insert_event(Event::new(
                self.key.namespace.clone(),
                EventType::TransactionSubmitted,
                tx.id,
                Some(tx.id),
                None,
                now,
            ))
            .await?;
        batch.tx = Some(TxRef {
            tx_type: TxType::BatchPin,
            id: tx.id,
        });
        Ok(())
    }
}

// The copy of a message embedded in a batch payload: the volatile local
// lifecycle fields are pinned to fixed values so the payload bytes, and
// therefore the batch hash, are identical on every node
fn wire_message(message: &Message, batch: Uuid) -> Message {
    let mut wire = message.clone();
    wire.state = MessageState::Sent;
    wire.batch = Some(batch);
    wire.confirmed = None;
    wire
}
