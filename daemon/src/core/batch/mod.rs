mod dispatcher;

pub(crate) use dispatcher::BatchDispatcher;

use std::{
    collections::HashSet,
    fmt::{Display, Formatter},
    sync::Arc,
};

use dashmap::DashMap;
use log::{debug, trace};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use weft_common::{
    batch::BatchType,
    crypto::Hash,
    message::{Message, MessageState},
    subscription::RetryOptions,
    tokio::spawn_task,
};

use crate::{
    config::NodeConfig,
    core::{error::CoreError, storage::Storage},
};

// Identity of one batch assembly stream: all messages sharing a key end up
// in the same batches, in order
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub namespace: String,
    pub batch_type: BatchType,
    pub author: String,
    pub key: String,
    pub group: Option<Hash>,
}

impl BatchKey {
    pub fn for_message(message: &Message) -> Self {
        Self {
            namespace: message.header.namespace.clone(),
            batch_type: BatchType::for_message(message.header.msg_type),
            author: message.header.author.clone(),
            key: message.header.key.clone(),
            group: message.header.group.clone(),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.namespace == message.header.namespace
            && self.batch_type == BatchType::for_message(message.header.msg_type)
            && self.author == message.header.author
            && self.key == message.header.key
            && self.group == message.header.group
    }
}

impl Display for BatchKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.batch_type, self.author)?;
        if let Some(group) = &self.group {
            write!(f, "/{}", group)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct BatchConfig {
    pub max_messages: usize,
    pub max_bytes: u64,
    pub timeout_millis: u64,
    pub quiescence_millis: u64,
    pub retry: RetryOptions,
}

impl BatchConfig {
    pub fn from_node(config: &NodeConfig) -> Self {
        Self {
            max_messages: config.max_batch_messages,
            max_bytes: config.max_batch_bytes,
            timeout_millis: config.batch_timeout_millis,
            quiescence_millis: config.quiescence_millis,
            retry: config.retry_options(),
        }
    }
}

// Owns one dispatcher task per active batch key. Dispatchers are created on
// demand and quiesce away when idle; their state of record is the storage,
// so losing a wakeup at the edges is recovered on the next one.
pub struct BatchManager<S: Storage> {
    storage: Arc<RwLock<S>>,
    dispatchers: Arc<DashMap<BatchKey, mpsc::Sender<()>>>,
    sealed_tx: mpsc::Sender<Uuid>,
    config: BatchConfig,
}

impl<S: Storage> BatchManager<S> {
    pub fn new(
        storage: Arc<RwLock<S>>,
        sealed_tx: mpsc::Sender<Uuid>,
        config: BatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            dispatchers: Arc::new(DashMap::new()),
            sealed_tx,
            config,
        })
    }

    // Restart recovery: messages attached to a batch that never sealed go
    // back to staged, and the dangling open batch rows are dropped.
    // Returns the keys that have staged work waiting.
    pub async fn recover(&self) -> Result<Vec<BatchKey>, CoreError> {
        let mut keys = Vec::new();
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        if let Err(e) = Self::restage(&mut *storage, &mut keys).await {
            storage.end_commit_point(false).await?;
            return Err(e);
        }
        storage.end_commit_point(true).await?;
        drop(storage);

        // Anything still staged from before the restart also needs a nudge
        let storage = self.storage.read().await;
        for message in storage.get_messages_in_state(MessageState::Staged).await? {
            let key = BatchKey::for_message(&message);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn restage(storage: &mut S, keys: &mut Vec<BatchKey>) -> Result<(), CoreError> {
        let ready = storage.get_messages_in_state(MessageState::Ready).await?;
        let mut dropped: HashSet<Uuid> = HashSet::new();
        for mut message in ready {
            let sealed = match message.batch {
                Some(batch_id) => storage
                    .get_batch(&batch_id)
                    .await?
                    .map(|batch| batch.is_sealed())
                    .unwrap_or(false),
                None => false,
            };
            if sealed {
                continue;
            }
            if let Some(batch_id) = message.batch {
                if dropped.insert(batch_id) {
                    debug!("Dropping unsealed batch {} from before restart", batch_id);
                    storage.delete_batch(&batch_id).await?;
                }
            }
            message.state = MessageState::Staged;
            message.batch = None;
            storage.insert_message(&message).await?;
            let key = BatchKey::for_message(&message);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(())
    }

    // Main loop: receives the key of every newly staged message and routes
    // the wakeup to the owning dispatcher
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<BatchKey>) {
        while let Some(key) = rx.recv().await {
            self.notify_dispatcher(key);
        }
        debug!("Batch manager notification channel closed");
    }

    pub fn notify_dispatcher(self: &Arc<Self>, key: BatchKey) {
        if let Some(entry) = self.dispatchers.get(&key) {
            match entry.value().try_send(()) {
                // Full means a wakeup is already queued
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => return,
                Err(mpsc::error::TrySendError::Closed(())) => {
                    drop(entry);
                    self.dispatchers.remove(&key);
                }
            }
        }

        if log::log_enabled!(log::Level::Trace) {
            trace!("Starting batch dispatcher for {}", key);
        }
        let (tx, rx) = mpsc::channel(1);
        // Queue the initial wakeup before the task starts
        let _ = tx.try_send(());
        self.dispatchers.insert(key.clone(), tx);

        let dispatcher = BatchDispatcher::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.dispatchers),
            Arc::clone(self),
            self.sealed_tx.clone(),
            self.config.clone(),
            key.clone(),
        );
        spawn_task(format!("batch-dispatcher-{}", key), async move {
            dispatcher.run(rx).await;
        });
    }
}
