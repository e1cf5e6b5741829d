pub mod aggregator;
pub mod assembler;
pub mod batch;
pub mod error;
pub mod ingress;
pub mod notify;
pub mod operations;
pub mod sender;
pub mod storage;
pub mod subscriptions;

#[cfg(test)]
mod tests;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::info;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;
use weft_common::{
    crypto::Hash,
    event::{Event, EventType},
    group::{Group, GroupDefinition},
    message::Message,
    operation::{OpType, Operation},
    subscription::Subscription,
    time::get_current_time_in_millis,
    tokens::{TokenApproval, TokenPool, TokenPoolState, TokenTransfer},
    tokio::spawn_task,
    transaction::{Transaction, TxType},
};

use crate::{
    config::{
        NodeConfig, BATCH_KEY_CHANNEL_SIZE, NOTIFIER_CHANNEL_SIZE, PLUGIN_EVENT_CHANNEL_SIZE,
        REWIND_CHANNEL_SIZE, SEALED_BATCH_CHANNEL_SIZE,
    },
    plugins::{PluginEvent, Plugins},
};

use self::{
    aggregator::{Aggregator, AggregatorConfig},
    assembler::{DataElement, MessageAssembler},
    batch::{BatchConfig, BatchKey, BatchManager},
    error::CoreError,
    ingress::EventIngress,
    notify::Notifier,
    operations::{
        ApproveTokensHandler, CreatePoolHandler, DownloadBatchHandler, NetworkActionHandler,
        OperationReconciler, OperationRunner, PinBatchHandler, RequestBlobHandler,
        SendBatchHandler, TransferTokensHandler, UploadBatchHandler,
    },
    sender::BatchSenders,
    storage::Storage,
    subscriptions::{DeliveryTransport, SubscriptionManager},
};

// Receivers handed to the component tasks on start
struct NodeChannels {
    events_rx: mpsc::Receiver<PluginEvent>,
    batch_keys_rx: mpsc::Receiver<BatchKey>,
    sealed_rx: mpsc::Receiver<Uuid>,
    aggregator_rx: mpsc::Receiver<()>,
    rewind_rx: mpsc::Receiver<Hash>,
    subscriptions_rx: mpsc::Receiver<()>,
}

// The coordination core of one node: wires the assembler, batch manager,
// senders, ingress, aggregator, operation runner and subscription
// dispatchers around one storage and one plugin set
pub struct Node<S: Storage> {
    config: NodeConfig,
    storage: Arc<RwLock<S>>,
    plugins: Plugins,
    assembler: Arc<MessageAssembler<S>>,
    batch_manager: Arc<BatchManager<S>>,
    senders: Arc<BatchSenders<S>>,
    ingress: Arc<EventIngress<S>>,
    aggregator: Arc<Aggregator<S>>,
    runner: Arc<OperationRunner<S>>,
    reconciler: Arc<OperationReconciler<S>>,
    subscriptions: Arc<SubscriptionManager<S>>,
    events_tx: mpsc::Sender<PluginEvent>,
    sealed_tx: mpsc::Sender<Uuid>,
    subscription_notifier: Notifier,
    running: Arc<AtomicBool>,
    channels: Mutex<Option<NodeChannels>>,
}

impl<S: Storage> Node<S> {
    pub fn new(config: NodeConfig, storage: S, plugins: Plugins) -> Arc<Self> {
        let storage = Arc::new(RwLock::new(storage));
        let running = Arc::new(AtomicBool::new(true));

        let (events_tx, events_rx) = mpsc::channel(PLUGIN_EVENT_CHANNEL_SIZE);
        let (batch_keys_tx, batch_keys_rx) = mpsc::channel(BATCH_KEY_CHANNEL_SIZE);
        let (sealed_tx, sealed_rx) = mpsc::channel(SEALED_BATCH_CHANNEL_SIZE);
        let (rewind_tx, rewind_rx) = mpsc::channel(REWIND_CHANNEL_SIZE);
        let (aggregator_notifier, aggregator_rx) = Notifier::new(NOTIFIER_CHANNEL_SIZE);
        let (subscription_notifier, subscriptions_rx) = Notifier::new(NOTIFIER_CHANNEL_SIZE);

        let runner = OperationRunner::new(
            Arc::clone(&storage),
            config.retry_options(),
            subscription_notifier.clone(),
        );
        runner.register_handler(
            OpType::SharedStorageUploadBatch,
            Arc::new(UploadBatchHandler {
                storage: Arc::clone(&storage),
                shared_storage: Arc::clone(&plugins.shared_storage),
            }),
        );
        runner.register_handler(
            OpType::BlockchainPinBatch,
            Arc::new(PinBatchHandler {
                storage: Arc::clone(&storage),
                blockchain: Arc::clone(&plugins.blockchain),
                identity: Arc::clone(&plugins.identity),
            }),
        );
        runner.register_handler(
            OpType::DataExchangeSendBatch,
            Arc::new(SendBatchHandler {
                storage: Arc::clone(&storage),
                data_exchange: Arc::clone(&plugins.data_exchange),
            }),
        );
        runner.register_handler(
            OpType::SharedStorageDownloadBatch,
            Arc::new(DownloadBatchHandler {
                shared_storage: Arc::clone(&plugins.shared_storage),
                events_tx: events_tx.clone(),
            }),
        );
        runner.register_handler(
            OpType::DataExchangeRequestBlob,
            Arc::new(RequestBlobHandler {
                data_exchange: Arc::clone(&plugins.data_exchange),
            }),
        );
        runner.register_handler(
            OpType::BlockchainNetworkAction,
            Arc::new(NetworkActionHandler {
                blockchain: Arc::clone(&plugins.blockchain),
                identity: Arc::clone(&plugins.identity),
            }),
        );
        runner.register_handler(
            OpType::TokenCreatePool,
            Arc::new(CreatePoolHandler {
                tokens: Arc::clone(&plugins.tokens),
            }),
        );
        runner.register_handler(
            OpType::TokenTransfer,
            Arc::new(TransferTokensHandler {
                tokens: Arc::clone(&plugins.tokens),
                identity: Arc::clone(&plugins.identity),
            }),
        );
        runner.register_handler(
            OpType::TokenApproval,
            Arc::new(ApproveTokensHandler {
                tokens: Arc::clone(&plugins.tokens),
                identity: Arc::clone(&plugins.identity),
            }),
        );

        let assembler = MessageAssembler::new(
            Arc::clone(&storage),
            Arc::clone(&plugins.identity),
            batch_keys_tx,
        );
        let batch_manager = BatchManager::new(
            Arc::clone(&storage),
            sealed_tx.clone(),
            BatchConfig::from_node(&config),
        );
        let senders = BatchSenders::new(Arc::clone(&storage), Arc::clone(&runner), plugins.clone());
        let ingress = EventIngress::new(
            Arc::clone(&storage),
            config.namespace.clone(),
            aggregator_notifier,
            subscription_notifier.clone(),
            rewind_tx,
            Arc::clone(&running),
        );
        let aggregator = Aggregator::new(
            Arc::clone(&storage),
            plugins.clone(),
            Arc::clone(&runner),
            subscription_notifier.clone(),
            AggregatorConfig::from_node(&config),
            Arc::clone(&running),
        );
        let subscriptions = SubscriptionManager::new(Arc::clone(&storage), Arc::clone(&running));
        let reconciler = OperationReconciler::new(
            Arc::clone(&storage),
            Arc::clone(&runner),
            events_tx.clone(),
            config.reconcile_interval_millis,
            config.stale_threshold_millis,
            Arc::clone(&running),
        );

        Arc::new(Self {
            config,
            storage,
            plugins,
            assembler,
            batch_manager,
            senders,
            ingress,
            aggregator,
            runner,
            reconciler,
            subscriptions,
            events_tx,
            sealed_tx,
            subscription_notifier,
            running,
            channels: Mutex::new(Some(NodeChannels {
                events_rx,
                batch_keys_rx,
                sealed_rx,
                aggregator_rx,
                rewind_rx,
                subscriptions_rx,
            })),
        })
    }

    // The channel plugins push their events into
    pub fn events_sender(&self) -> mpsc::Sender<PluginEvent> {
        self.events_tx.clone()
    }

    pub fn storage(&self) -> Arc<RwLock<S>> {
        Arc::clone(&self.storage)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn register_transport(&self, transport: Arc<dyn DeliveryTransport>) {
        self.subscriptions.register_transport(transport);
    }

    // Spawn every component task. Recovery runs first: unsealed batches are
    // discarded, staged messages re-offered and sealed unconfirmed batches
    // re-dispatched.
    pub async fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        info!(
            "Starting weft node '{}' in namespace '{}' as {}",
            self.config.node, self.config.namespace, self.config.org
        );
        let channels = self
            .channels
            .lock()
            .await
            .take()
            .ok_or_else(|| CoreError::Conflict("Node already started".to_owned()))?;

        let pending_keys = self.batch_manager.recover().await?;
        let unconfirmed = {
            let storage = self.storage.read().await;
            storage.get_unconfirmed_batches().await?
        };

        spawn_task(
            "event-ingress",
            Arc::clone(&self.ingress).run(channels.events_rx),
        );
        spawn_task(
            "batch-manager",
            Arc::clone(&self.batch_manager).run(channels.batch_keys_rx),
        );
        spawn_task(
            "batch-senders",
            Arc::clone(&self.senders).run(channels.sealed_rx),
        );
        spawn_task(
            "aggregator",
            Arc::clone(&self.aggregator).run(channels.aggregator_rx, channels.rewind_rx),
        );
        spawn_task(
            "subscription-manager",
            Arc::clone(&self.subscriptions).run(channels.subscriptions_rx),
        );
        spawn_task("operation-reconciler", Arc::clone(&self.reconciler).run());

        for key in pending_keys {
            self.batch_manager.notify_dispatcher(key);
        }
        for batch in unconfirmed {
            if self.plugins.identity.is_local(&batch.header.author) {
                let _ = self.sealed_tx.send(batch.header.id).await;
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping weft node '{}'", self.config.node);
        self.running.store(false, Ordering::SeqCst);
    }

    // ---- API surface delegates ----

    pub async fn send_message(
        &self,
        message: Message,
        data: Vec<DataElement>,
    ) -> Result<Message, CoreError> {
        self.assembler.send_message(message, data).await
    }

    pub async fn ensure_group(&self, definition: GroupDefinition) -> Result<Group, CoreError> {
        self.assembler.ensure_group(definition).await
    }

    pub async fn create_subscription(
        &self,
        sub: Subscription,
    ) -> Result<Subscription, CoreError> {
        self.subscriptions.create_subscription(sub).await
    }

    pub async fn delete_subscription(&self, id: &Uuid) -> Result<(), CoreError> {
        self.subscriptions.delete_subscription(id).await
    }

    pub async fn run_operation(&self, op: Operation) -> Result<Operation, CoreError> {
        self.runner.run_operation(op).await
    }

    pub async fn retry_operation(&self, id: &Uuid) -> Result<Operation, CoreError> {
        self.runner.retry_operation(id).await
    }

    pub async fn submit_network_action(&self, action: &str) -> Result<Operation, CoreError> {
        let tx = self.begin_transaction(TxType::NetworkAction).await?;
        let op = Operation::new(
            self.config.namespace.clone(),
            tx.id,
            OpType::BlockchainNetworkAction,
            self.plugins.blockchain.name().to_owned(),
            json!({ "action": action }),
            get_current_time_in_millis(),
        );
        self.runner.run_operation(op).await
    }

    // ---- token actions ----

    pub async fn create_token_pool(
        &self,
        name: &str,
        connector: &str,
        locator: &str,
    ) -> Result<TokenPool, CoreError> {
        let tx = self.begin_transaction(TxType::TokenPool).await?;
        let now = get_current_time_in_millis();
        let pool = TokenPool {
            id: Uuid::new_v4(),
            namespace: self.config.namespace.clone(),
            name: name.to_owned(),
            connector: connector.to_owned(),
            locator: locator.to_owned(),
            tx: Some(tx.id),
            state: TokenPoolState::Pending,
            created: now,
        };
        {
            let mut storage = self.storage.write().await;
            storage.start_commit_point().await?;
            let result = storage.upsert_token_pool(&pool).await;
            match result {
                Ok(()) => storage.end_commit_point(true).await?,
                Err(e) => {
                    storage.end_commit_point(false).await?;
                    return Err(e);
                }
            }
        }

        let op = Operation::new(
            self.config.namespace.clone(),
            tx.id,
            OpType::TokenCreatePool,
            self.plugins.tokens.name().to_owned(),
            serde_json::to_value(&pool)?,
            now,
        );
        self.runner.run_operation(op).await?;
        Ok(pool)
    }

    pub async fn submit_token_transfer(
        &self,
        mut transfer: TokenTransfer,
    ) -> Result<TokenTransfer, CoreError> {
        let tx = self.begin_transaction(TxType::TokenTransfer).await?;
        let now = get_current_time_in_millis();
        transfer.local_id = Uuid::new_v4();
        transfer.namespace = self.config.namespace.clone();
        transfer.tx = Some(tx.id);
        transfer.created = now;
        {
            let mut storage = self.storage.write().await;
            storage.start_commit_point().await?;
            let result = storage.upsert_token_transfer(&transfer).await;
            match result {
                Ok(()) => storage.end_commit_point(true).await?,
                Err(e) => {
                    storage.end_commit_point(false).await?;
                    return Err(e);
                }
            }
        }

        let op = Operation::new(
            self.config.namespace.clone(),
            tx.id,
            OpType::TokenTransfer,
            self.plugins.tokens.name().to_owned(),
            serde_json::to_value(&transfer)?,
            now,
        );
        self.runner.run_operation(op).await?;
        Ok(transfer)
    }

    pub async fn submit_token_approval(
        &self,
        mut approval: TokenApproval,
    ) -> Result<TokenApproval, CoreError> {
        let tx = self.begin_transaction(TxType::TokenApproval).await?;
        let now = get_current_time_in_millis();
        approval.local_id = Uuid::new_v4();
        approval.namespace = self.config.namespace.clone();
        approval.tx = Some(tx.id);
        approval.created = now;
        {
            let mut storage = self.storage.write().await;
            storage.start_commit_point().await?;
            let result = storage.upsert_token_approval(&approval).await;
            match result {
                Ok(()) => storage.end_commit_point(true).await?,
                Err(e) => {
                    storage.end_commit_point(false).await?;
                    return Err(e);
                }
            }
        }

        let op = Operation::new(
            self.config.namespace.clone(),
            tx.id,
            OpType::TokenApproval,
            self.plugins.tokens.name().to_owned(),
            serde_json::to_value(&approval)?,
            now,
        );
        self.runner.run_operation(op).await?;
        Ok(approval)
    }

    // Open a transaction row for one logical action and announce it
    async fn begin_transaction(&self, tx_type: TxType) -> Result<Transaction, CoreError> {
        let now = get_current_time_in_millis();
        let tx = Transaction::new(self.config.namespace.clone(), tx_type, now);
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let result = async {
            storage.insert_transaction(&tx).await?;
            storage
                .insert_event(Event::new(
                    self.config.namespace.clone(),
                    EventType::TransactionSubmitted,
                    tx.id,
                    Some(tx.id),
                    None,
                    now,
                ))
                .await?;
            Ok::<(), CoreError>(())
        }
        .await;
        match result {
            Ok(()) => storage.end_commit_point(true).await?,
            Err(e) => {
                storage.end_commit_point(false).await?;
                return Err(e);
            }
        }
        drop(storage);
        self.subscription_notifier.nudge();
        Ok(tx)
    }
}
