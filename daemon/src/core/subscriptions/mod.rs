mod dispatcher;

pub(crate) use dispatcher::SubscriptionDispatcher;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use tokio::{
    sync::{mpsc, RwLock},
    time::interval,
};
use uuid::Uuid;
use weft_common::{
    event::Event,
    offset::{Offset, OffsetKind},
    subscription::{FirstEvent, Subscription},
    time::get_current_time_in_millis,
    tokio::{select, spawn_task},
};

use crate::{
    config::SUBSCRIPTION_POLL_MILLIS,
    core::{error::CoreError, notify::Notifier, storage::Storage},
    plugins::PluginError,
};

// The seam external consumers plug into: one registered transport per name,
// selected by the subscription row. Ok acknowledges the event, Err asks for
// redelivery.
#[async_trait]
pub trait DeliveryTransport: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn deliver(&self, sub: &Subscription, event: &Event) -> Result<(), PluginError>;
}

struct DispatcherHandle {
    notifier: Notifier,
    stop: Arc<AtomicBool>,
}

// Owns one dispatcher task per stored subscription and keeps the running
// set reconciled with the subscription rows
pub struct SubscriptionManager<S: Storage> {
    storage: Arc<RwLock<S>>,
    transports: std::sync::RwLock<HashMap<String, Arc<dyn DeliveryTransport>>>,
    dispatchers: DashMap<Uuid, DispatcherHandle>,
    running: Arc<AtomicBool>,
}

impl<S: Storage> SubscriptionManager<S> {
    pub fn new(storage: Arc<RwLock<S>>, running: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            storage,
            transports: std::sync::RwLock::new(HashMap::new()),
            dispatchers: DashMap::new(),
            running,
        })
    }

    pub fn register_transport(&self, transport: Arc<dyn DeliveryTransport>) {
        if let Ok(mut transports) = self.transports.write() {
            transports.insert(transport.name().to_owned(), transport);
        }
    }

    fn transport_for(&self, name: &str) -> Option<Arc<dyn DeliveryTransport>> {
        self.transports
            .read()
            .ok()
            .and_then(|transports| transports.get(name).cloned())
    }

    // Register a subscription: the first_event option seeds its offset
    pub async fn create_subscription(
        &self,
        mut sub: Subscription,
    ) -> Result<Subscription, CoreError> {
        if self.transport_for(&sub.transport).is_none() {
            return Err(CoreError::InvalidInput(format!(
                "Unknown delivery transport '{}'",
                sub.transport
            )));
        }
        sub.created = get_current_time_in_millis();

        let mut storage = self.storage.write().await;
        if let Some(existing) = storage
            .get_subscription_by_name(&sub.namespace, &sub.name)
            .await?
        {
            if existing.id != sub.id {
                return Err(CoreError::Conflict(format!(
                    "Subscription '{}' already exists",
                    sub.name
                )));
            }
        }
        let initial = match sub.options.first_event {
            FirstEvent::Oldest => 0,
            FirstEvent::Newest => storage.latest_sequence().await?,
            FirstEvent::At(sequence) => sequence,
        };

        storage.start_commit_point().await?;
        let result = async {
            storage.upsert_subscription(&sub).await?;
            if storage
                .get_offset(OffsetKind::Subscription, &sub.id.to_string())
                .await?
                .is_none()
            {
                storage
                    .upsert_offset(&Offset {
                        kind: OffsetKind::Subscription,
                        name: sub.id.to_string(),
                        current: initial,
                    })
                    .await?;
            }
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

        self.spawn_dispatcher(sub.clone());
        Ok(sub)
    }

    pub async fn delete_subscription(&self, id: &Uuid) -> Result<(), CoreError> {
        if let Some((_, handle)) = self.dispatchers.remove(id) {
            handle.stop.store(true, Ordering::SeqCst);
            handle.notifier.nudge();
        }
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let result = async {
            storage.delete_subscription(id).await?;
            storage
                .delete_offset(OffsetKind::Subscription, &id.to_string())
                .await?;
            Ok::<(), CoreError>(())
        }
        .await;
        match result {
            Ok(()) => storage.end_commit_point(true).await,
            Err(e) => {
                storage.end_commit_point(false).await?;
                Err(e)
            }
        }
    }

    // New-event wakeups fan out to every dispatcher; the periodic pass also
    // picks up subscription rows created out-of-band
    pub async fn run(self: Arc<Self>, mut notify_rx: mpsc::Receiver<()>) {
        let mut timer = interval(Duration::from_millis(SUBSCRIPTION_POLL_MILLIS));
        while self.running.load(Ordering::SeqCst) {
            select! {
                wakeup = notify_rx.recv() => {
                    if wakeup.is_none() {
                        break;
                    }
                }
                _ = timer.tick() => {}
            }
            if let Err(e) = self.reconcile().await {
                warn!("Subscription reconciliation failed: {}", e);
            }
        }
        debug!("Subscription manager exiting");
    }

    async fn reconcile(&self) -> Result<(), CoreError> {
        let subs = {
            let storage = self.storage.read().await;
            storage.get_subscriptions().await?
        };
        let known: HashSet<Uuid> = subs.iter().map(|sub| sub.id).collect();

        for sub in subs {
            match self.dispatchers.get(&sub.id) {
                Some(handle) => handle.notifier.nudge(),
                None => self.spawn_dispatcher(sub),
            }
        }

        self.dispatchers.retain(|id, handle| {
            if known.contains(id) {
                true
            } else {
                handle.stop.store(true, Ordering::SeqCst);
                handle.notifier.nudge();
                false
            }
        });
        Ok(())
    }

    fn spawn_dispatcher(&self, sub: Subscription) {
        let transport = match self.transport_for(&sub.transport) {
            Some(transport) => transport,
            None => {
                warn!(
                    "Subscription {} names unknown transport '{}', not dispatching",
                    sub.name, sub.transport
                );
                return;
            }
        };
        let (notifier, rx) = Notifier::new(1);
        let stop = Arc::new(AtomicBool::new(false));
        notifier.nudge();
        self.dispatchers.insert(
            sub.id,
            DispatcherHandle {
                notifier,
                stop: Arc::clone(&stop),
            },
        );

        let name = format!("subscription-{}-{}", sub.namespace, sub.name);
        let dispatcher = SubscriptionDispatcher::new(
            Arc::clone(&self.storage),
            sub,
            transport,
            stop,
            Arc::clone(&self.running),
        );
        spawn_task(name, dispatcher.run(rx));
    }
}
