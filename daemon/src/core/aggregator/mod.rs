mod readiness;

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, trace, warn};
use serde_json::json;
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    time::{interval, sleep},
};
use uuid::Uuid;
use weft_common::{
    crypto::Hash,
    offset::{Offset, OffsetKind},
    operation::{OpType, Operation},
    subscription::RetryOptions,
    time::get_current_time_in_millis,
    tokio::{select, spawn_task},
};

use crate::{
    config::{NodeConfig, AGGREGATOR_POLL_MILLIS},
    core::{error::CoreError, notify::Notifier, operations::OperationRunner, storage::Storage},
    plugins::Plugins,
};

pub const AGGREGATOR_OFFSET: &str = "pins";

#[derive(Clone)]
pub struct AggregatorConfig {
    pub page_size: usize,
    pub cid_grace_millis: u64,
    // A nonce gap older than this many pins is an integrity violation, not
    // a wait
    pub rewind_lookback: u64,
    pub retry: RetryOptions,
}

impl AggregatorConfig {
    pub fn from_node(config: &NodeConfig) -> Self {
        Self {
            page_size: config.aggregator_page_size,
            cid_grace_millis: config.cid_grace_millis,
            rewind_lookback: config.rewind_lookback,
            retry: config.retry_options(),
        }
    }
}

// Why a pin could not be consumed yet, and what would unblock it
pub(super) enum SideRequest {
    FetchBatch {
        batch: Uuid,
        payload_ref: String,
        namespace: String,
    },
    FetchBlob {
        hash: Hash,
        author: String,
        namespace: String,
    },
}

pub(super) enum Disposition {
    // The pin was consumed: delivered, deduplicated or quarantined
    Dispatched,
    // Not yet: readiness misses are never errors
    Parked(Option<SideRequest>),
}

// Turns the on-chain pin order plus local data availability into message
// delivery. Single pumping loop; the durable offset only ever advances over
// a fully-dispatched prefix of the pin log, so a crash re-examines parked
// pins instead of losing them.
pub struct Aggregator<S: Storage> {
    storage: Arc<RwLock<S>>,
    plugins: Plugins,
    runner: Arc<OperationRunner<S>>,
    subscriptions: Notifier,
    config: AggregatorConfig,
    // One payload / blob request per process lifetime, cleared by arrival
    requested_batches: Mutex<HashSet<Uuid>>,
    requested_blobs: Mutex<HashSet<Hash>>,
    running: Arc<AtomicBool>,
}

impl<S: Storage> Aggregator<S> {
    pub fn new(
        storage: Arc<RwLock<S>>,
        plugins: Plugins,
        runner: Arc<OperationRunner<S>>,
        subscriptions: Notifier,
        config: AggregatorConfig,
        running: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            plugins,
            runner,
            subscriptions,
            config,
            requested_batches: Mutex::new(HashSet::new()),
            requested_blobs: Mutex::new(HashSet::new()),
            running,
        })
    }

    pub async fn run(
        self: Arc<Self>,
        mut notify_rx: mpsc::Receiver<()>,
        mut rewind_rx: mpsc::Receiver<Hash>,
    ) {
        let mut timer = interval(Duration::from_millis(AGGREGATOR_POLL_MILLIS));
        let mut failures: u32 = 0;
        while self.running.load(Ordering::SeqCst) {
            select! {
                wakeup = notify_rx.recv() => {
                    if wakeup.is_none() {
                        break;
                    }
                }
                rewound = rewind_rx.recv() => {
                    match rewound {
                        Some(context) => {
                            if log::log_enabled!(log::Level::Trace) {
                                trace!("Rewind requested for context {}", context);
                            }
                            // Coalesce any queued rewinds into this pass
                            while rewind_rx.try_recv().is_ok() {}
                            self.clear_requests().await;
                        }
                        None => break,
                    }
                }
                _ = timer.tick() => {}
            }

            match self.process_pending().await {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!("Aggregator pass failed (attempt {}): {}", failures, e);
                    sleep(Duration::from_millis(
                        self.config.retry.delay_millis(failures.saturating_sub(1)),
                    ))
                    .await;
                }
            }
        }
        debug!("Aggregator exiting");
    }

    // Something new arrived: allow re-requesting anything still missing
    async fn clear_requests(&self) {
        self.requested_batches.lock().await.clear();
        self.requested_blobs.lock().await.clear();
    }

    // Keep taking passes over the pin log until a pass makes no progress:
    // each delivery can release messages parked behind the advanced nonces
    async fn process_pending(&self) -> Result<(), CoreError> {
        loop {
            if !self.process_page().await? {
                return Ok(());
            }
        }
    }

    async fn process_page(&self) -> Result<bool, CoreError> {
        let offset = {
            let storage = self.storage.read().await;
            storage
                .get_offset(OffsetKind::Aggregator, AGGREGATOR_OFFSET)
                .await?
                .map(|offset| offset.current)
                .unwrap_or(0)
        };
        let pins = {
            let storage = self.storage.read().await;
            storage.get_pins_after(offset, self.config.page_size).await?
        };
        if pins.is_empty() {
            return Ok(false);
        }

        let mut progressed = false;
        let mut requests = Vec::new();
        for pin in &pins {
            if pin.dispatched {
                continue;
            }
            match self.attempt(pin).await? {
                Disposition::Dispatched => progressed = true,
                Disposition::Parked(request) => {
                    if let Some(request) = request {
                        requests.push(request);
                    }
                }
            }
        }

        // The offset only moves over a contiguous dispatched prefix, so
        // parked pins keep being re-examined and a crash loses nothing
        let refreshed = {
            let storage = self.storage.read().await;
            storage.get_pins_after(offset, self.config.page_size).await?
        };
        let mut new_offset = offset;
        for pin in &refreshed {
            if pin.sequence == new_offset + 1 && pin.dispatched {
                new_offset = pin.sequence;
            } else {
                break;
            }
        }
        if new_offset != offset {
            let mut storage = self.storage.write().await;
            storage.start_commit_point().await?;
            let result = storage
                .upsert_offset(&Offset {
                    kind: OffsetKind::Aggregator,
                    name: AGGREGATOR_OFFSET.to_owned(),
                    current: new_offset,
                })
                .await;
            match result {
                Ok(()) => storage.end_commit_point(true).await?,
                Err(e) => {
                    storage.end_commit_point(false).await?;
                    return Err(e);
                }
            }
            progressed = true;
        }

        for request in requests {
            self.issue_request(request).await;
        }
        Ok(progressed)
    }

    // One pin, one commit point: readiness checks and (on success) the
    // delivery writes are atomic
    async fn attempt(&self, pin: &weft_common::pin::Pin) -> Result<Disposition, CoreError> {
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let disposition = self.process_pin(&mut *storage, pin).await;
        match disposition {
            Ok(Disposition::Dispatched) => {
                storage.end_commit_point(true).await?;
                drop(storage);
                self.subscriptions.nudge();
                Ok(Disposition::Dispatched)
            }
            Ok(parked) => {
                storage.end_commit_point(false).await?;
                Ok(parked)
            }
            Err(e) => {
                storage.end_commit_point(false).await?;
                Err(e)
            }
        }
    }

    async fn issue_request(&self, request: SideRequest) {
        match request {
            SideRequest::FetchBatch {
                batch,
                payload_ref,
                namespace,
            } => {
                if !self.requested_batches.lock().await.insert(batch) {
                    return;
                }
                let op = Operation::new(
                    namespace,
                    Uuid::new_v4(),
                    OpType::SharedStorageDownloadBatch,
                    self.plugins.shared_storage.name().to_owned(),
                    json!({ "batch": batch, "payload_ref": payload_ref }),
                    get_current_time_in_millis(),
                );
                let runner = Arc::clone(&self.runner);
                spawn_task(format!("fetch-batch-{}", batch), async move {
                    if let Err(e) = runner.run_operation(op).await {
                        warn!("Payload fetch for batch {} failed: {}", batch, e);
                    }
                });
            }
            SideRequest::FetchBlob {
                hash,
                author,
                namespace,
            } => {
                if !self.requested_blobs.lock().await.insert(hash.clone()) {
                    return;
                }
                let peer = match self.plugins.identity.resolve(&author).await {
                    Ok(identity) => identity.node,
                    Err(e) => {
                        warn!("Cannot resolve {} to request blob {}: {}", author, hash, e);
                        return;
                    }
                };
                let op = Operation::new(
                    namespace,
                    Uuid::new_v4(),
                    OpType::DataExchangeRequestBlob,
                    self.plugins.data_exchange.name().to_owned(),
                    json!({ "peer": peer, "hash": hash.to_hex() }),
                    get_current_time_in_millis(),
                );
                let runner = Arc::clone(&self.runner);
                spawn_task(format!("fetch-blob-{}", hash), async move {
                    if let Err(e) = runner.run_operation(op).await {
                        warn!("Blob fetch {} failed: {}", hash, e);
                    }
                });
            }
        }
    }
}
