use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{trace, warn};
use tokio::{
    sync::{mpsc, RwLock},
    time::interval,
};
use weft_common::time::get_current_time_in_millis;

use crate::{
    core::{error::CoreError, operations::OperationRunner, storage::Storage},
    plugins::PluginEvent,
};

// Periodic sweep over Pending operations: asks the owning plugin for the
// authoritative status of anything stale and feeds the answer back through
// the single ingress path, so the state transition and its event share one
// commit point.
pub struct OperationReconciler<S: Storage> {
    storage: Arc<RwLock<S>>,
    runner: Arc<OperationRunner<S>>,
    events_tx: mpsc::Sender<PluginEvent>,
    interval_millis: u64,
    stale_millis: u64,
    running: Arc<AtomicBool>,
}

impl<S: Storage> OperationReconciler<S> {
    pub fn new(
        storage: Arc<RwLock<S>>,
        runner: Arc<OperationRunner<S>>,
        events_tx: mpsc::Sender<PluginEvent>,
        interval_millis: u64,
        stale_millis: u64,
        running: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            runner,
            events_tx,
            interval_millis,
            stale_millis,
            running,
        })
    }

    pub async fn run(self: Arc<Self>) {
        let mut timer = interval(Duration::from_millis(self.interval_millis));
        while self.running.load(Ordering::SeqCst) {
            timer.tick().await;
            if let Err(e) = self.sweep().await {
                warn!("Operation reconciliation sweep failed: {}", e);
            }
        }
    }

    async fn sweep(&self) -> Result<(), CoreError> {
        let cutoff = get_current_time_in_millis().saturating_sub(self.stale_millis);
        let stale = {
            let storage = self.storage.read().await;
            storage.get_pending_older_than(cutoff).await?
        };
        if stale.is_empty() {
            return Ok(());
        }
        if log::log_enabled!(log::Level::Trace) {
            trace!("Reconciling {} stale pending operations", stale.len());
        }

        for op in stale {
            let handler = match self.runner.handler_for(op.op_type) {
                Ok(handler) => handler,
                Err(e) => {
                    warn!("No handler to reconcile operation {}: {}", op.id, e);
                    continue;
                }
            };
            match handler.status(&op).await {
                Ok(Some(update)) => {
                    if self
                        .events_tx
                        .send(PluginEvent::OperationUpdate(update))
                        .await
                        .is_err()
                    {
                        return Err(CoreError::Cancelled);
                    }
                }
                // No authoritative answer yet: stays pending
                Ok(None) => {}
                Err(e) => warn!("Status check for operation {} failed: {}", op.id, e),
            }
        }
        Ok(())
    }
}
