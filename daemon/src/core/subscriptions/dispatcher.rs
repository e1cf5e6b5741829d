use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{stream::FuturesOrdered, StreamExt};
use log::{debug, trace, warn};
use metrics::counter;
use tokio::{
    sync::{mpsc, RwLock},
    time::sleep,
};
use weft_common::{
    event::Event,
    offset::{Offset, OffsetKind},
    subscription::Subscription,
    tokio::select,
};

use crate::{
    config::SUBSCRIPTION_POLL_MILLIS,
    core::{error::CoreError, storage::Storage, subscriptions::DeliveryTransport},
};

// Per-subscription delivery: strictly sequence-ordered, at-least-once, with
// up to read_ahead outstanding un-acked deliveries in flight. The offset
// only advances once every event of a page has been acknowledged or
// dead-lettered, so a crash redelivers rather than skips.
pub(crate) struct SubscriptionDispatcher<S: Storage> {
    storage: Arc<RwLock<S>>,
    sub: Subscription,
    transport: Arc<dyn DeliveryTransport>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl<S: Storage> SubscriptionDispatcher<S> {
    pub(crate) fn new(
        storage: Arc<RwLock<S>>,
        sub: Subscription,
        transport: Arc<dyn DeliveryTransport>,
        stop: Arc<AtomicBool>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            storage,
            sub,
            transport,
            stop,
            running,
        }
    }

    pub(crate) async fn run(self, mut rx: mpsc::Receiver<()>) {
        let mut failures: u32 = 0;
        loop {
            if self.stop.load(Ordering::SeqCst) || !self.running.load(Ordering::SeqCst) {
                break;
            }
            select! {
                wakeup = rx.recv() => {
                    if wakeup.is_none() {
                        break;
                    }
                }
                _ = sleep(Duration::from_millis(SUBSCRIPTION_POLL_MILLIS)) => {}
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            match self.deliver_pending().await {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Subscription {} delivery pass failed: {}",
                        self.sub.name, e
                    );
                    sleep(Duration::from_millis(
                        self.sub
                            .options
                            .retry
                            .delay_millis(failures.saturating_sub(1)),
                    ))
                    .await;
                }
            }
        }
        debug!("Subscription dispatcher {} exiting", self.sub.name);
    }

    async fn deliver_pending(&self) -> Result<(), CoreError> {
        let offset_name = self.sub.id.to_string();
        loop {
            let current = {
                let storage = self.storage.read().await;
                storage
                    .get_offset(OffsetKind::Subscription, &offset_name)
                    .await?
                    .map(|offset| offset.current)
                    .unwrap_or(0)
            };
            let events = {
                let storage = self.storage.read().await;
                storage
                    .get_events_after(current, self.sub.options.read_ahead.max(1) as usize)
                    .await?
            };
            let Some(last) = events.last().map(|event| event.sequence) else {
                return Ok(());
            };

            let mut matching = Vec::new();
            for event in events {
                if self.matches(&event).await? {
                    matching.push(event);
                }
            }

            // Ordered in-flight window: acks are consumed in sequence order
            // so the per-subscription ordering guarantee holds even with
            // read_ahead deliveries outstanding
            let mut window: FuturesOrdered<_> = matching
                .into_iter()
                .map(|event| self.deliver_with_retry(event))
                .collect();
            while window.next().await.is_some() {}

            let mut storage = self.storage.write().await;
            storage.start_commit_point().await?;
            let result = storage
                .upsert_offset(&Offset {
                    kind: OffsetKind::Subscription,
                    name: offset_name.clone(),
                    current: last,
                })
                .await;
            match result {
                Ok(()) => storage.end_commit_point(true).await?,
                Err(e) => {
                    storage.end_commit_point(false).await?;
                    return Err(e);
                }
            }
        }
    }

    async fn matches(&self, event: &Event) -> Result<bool, CoreError> {
        if event.namespace != self.sub.namespace {
            return Ok(false);
        }
        if !self.sub.filter.matches_event(event) {
            return Ok(false);
        }
        if self.sub.filter.needs_message() {
            let message = {
                let storage = self.storage.read().await;
                storage.get_message(&event.reference).await?
            };
            let Some(message) = message else {
                return Ok(false);
            };
            if let Some(author) = &self.sub.filter.author {
                if message.header.author != *author {
                    return Ok(false);
                }
            }
            if let Some(tag) = &self.sub.filter.tag {
                if message.header.tag.as_deref() != Some(tag.as_str()) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    // At-least-once with backoff; exhausting the retry budget dead-letters
    // the event and moves on
    async fn deliver_with_retry(&self, event: Event) {
        let retry = &self.sub.options.retry;
        let attempts = retry.max_attempts.max(1);
        for attempt in 0..attempts {
            match self.transport.deliver(&self.sub, &event).await {
                Ok(()) => {
                    counter!("weft_events_delivered_total").increment(1);
                    if log::log_enabled!(log::Level::Trace) {
                        trace!(
                            "Delivered event {} to subscription {}",
                            event.sequence,
                            self.sub.name
                        );
                    }
                    return;
                }
                Err(e) => {
                    warn!(
                        "Delivery of event {} to {} failed (attempt {}): {}",
                        event.sequence,
                        self.sub.name,
                        attempt + 1,
                        e
                    );
                    if attempt + 1 < attempts {
                        sleep(Duration::from_millis(retry.delay_millis(attempt))).await;
                    }
                }
            }
        }

        counter!("weft_events_dead_lettered_total").increment(1);
        warn!(
            "Event {} dead-lettered for subscription {}",
            event.sequence, self.sub.name
        );
        let mut storage = self.storage.write().await;
        if storage.start_commit_point().await.is_ok() {
            let recorded = storage.record_dead_letter(&self.sub.id, event.sequence).await;
            let _ = storage.end_commit_point(recorded.is_ok()).await;
        }
    }
}
