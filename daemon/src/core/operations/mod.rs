mod handlers;
mod reconciler;

pub use handlers::*;
pub use reconciler::OperationReconciler;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};
use metrics::counter;
use serde_json::Value;
use tokio::{sync::RwLock, time::sleep};
use uuid::Uuid;
use weft_common::{
    event::{Event, EventType},
    operation::{OpStatus, OpType, Operation},
    subscription::RetryOptions,
    time::{get_current_time_in_millis, TimestampMillis},
};

use crate::{
    core::{error::CoreError, notify::Notifier, storage::Storage},
    plugins::OperationUpdate,
};

pub enum OperationOutcome {
    // The side effect is done; the optional value becomes the stored output
    Complete(Option<Value>),
    // Accepted but still in flight; a plugin status update finishes it
    Pending,
}

#[async_trait]
pub trait OperationHandler: Send + Sync + 'static {
    async fn execute(&self, op: &Operation) -> Result<OperationOutcome, CoreError>;

    // Authoritative status for the reconciliation sweep. None means the
    // plugin has no record of the operation.
    async fn status(&self, _op: &Operation) -> Result<Option<OperationUpdate>, CoreError> {
        Ok(None)
    }
}

// Drives every durable side effect: at-most-once per idempotency key, with
// classified retries and terminal status events
pub struct OperationRunner<S: Storage> {
    storage: Arc<RwLock<S>>,
    handlers: std::sync::RwLock<HashMap<OpType, Arc<dyn OperationHandler>>>,
    retry: RetryOptions,
    // Terminal operation events are subscription-visible
    subscriptions: Notifier,
}

impl<S: Storage> OperationRunner<S> {
    pub fn new(
        storage: Arc<RwLock<S>>,
        retry: RetryOptions,
        subscriptions: Notifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            handlers: std::sync::RwLock::new(HashMap::new()),
            retry,
            subscriptions,
        })
    }

    pub fn register_handler(&self, op_type: OpType, handler: Arc<dyn OperationHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(op_type, handler);
        }
    }

    pub(crate) fn handler_for(
        &self,
        op_type: OpType,
    ) -> Result<Arc<dyn OperationHandler>, CoreError> {
        self.handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(&op_type).cloned())
            .ok_or_else(|| CoreError::NoHandler(op_type.to_string()))
    }

    // Run an operation to a state the caller can act on: Succeeded, Failed,
    // or Pending (finished later by a plugin status update). Retryable
    // failures are re-attempted here with backoff under the same
    // idempotency key.
    pub async fn run_operation(&self, mut op: Operation) -> Result<Operation, CoreError> {
        let key = op.idempotency_key()?;

        // Idempotent short-circuit: a prior success under the same key
        // returns its stored output without touching the plugin
        {
            let storage = self.storage.read().await;
            let existing = storage.get_operations_by_key(&key).await?;
            if let Some(done) = existing
                .into_iter()
                .find(|o| o.status == OpStatus::Succeeded)
            {
                if log::log_enabled!(log::Level::Debug) {
                    debug!(
                        "Operation {} short-circuited by idempotency key onto {}",
                        op.op_type, done.id
                    );
                }
                return Ok(done);
            }
        }

        self.write_row(&op, true, None).await?;
        let handler = self.handler_for(op.op_type)?;

        loop {
            op.status = OpStatus::Pending;
            op.updated = Some(get_current_time_in_millis());
            self.write_row(&op, false, None).await?;

            match handler.execute(&op).await {
                Ok(OperationOutcome::Complete(output)) => {
                    op.status = OpStatus::Succeeded;
                    op.output = output;
                    op.error = None;
                    op.updated = Some(get_current_time_in_millis());
                    self.write_row(&op, false, Some(EventType::OperationSucceeded))
                        .await?;
                    counter!("weft_operations_succeeded_total").increment(1);
                    return Ok(op);
                }
                Ok(OperationOutcome::Pending) => return Ok(op),
                Err(e) if e.is_retryable() && op.retry_count + 1 < self.retry.max_attempts => {
                    op.retry_count += 1;
                    op.error = Some(e.to_string());
                    self.write_row(&op, false, None).await?;
                    let delay = self.retry.delay_millis(op.retry_count - 1);
                    warn!(
                        "Operation {} attempt {} failed, retrying in {}ms: {}",
                        op.id, op.retry_count, delay, e
                    );
                    sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    op.status = OpStatus::Failed;
                    op.error = Some(e.to_string());
                    op.updated = Some(get_current_time_in_millis());
                    self.write_row(&op, false, Some(EventType::OperationFailed))
                        .await?;
                    counter!("weft_operations_failed_total").increment(1);
                    warn!("Operation {} failed: {}", op.id, e);
                    return Ok(op);
                }
            }
        }
    }

    // Manual retry of a failed operation: a fresh row, fresh id, but the
    // same inputs so the idempotency key is preserved
    pub async fn retry_operation(&self, id: &Uuid) -> Result<Operation, CoreError> {
        let previous = {
            let storage = self.storage.read().await;
            storage
                .get_operation(id)
                .await?
                .ok_or(CoreError::NotFound("Operation"))?
        };
        if previous.status != OpStatus::Failed {
            return Err(CoreError::Conflict(format!(
                "Operation {} is {} and cannot be retried",
                previous.id, previous.status
            )));
        }
        let op = Operation::new(
            previous.namespace,
            previous.tx,
            previous.op_type,
            previous.plugin,
            previous.input,
            get_current_time_in_millis(),
        );
        self.run_operation(op).await
    }

    async fn write_row(
        &self,
        op: &Operation,
        insert: bool,
        event: Option<EventType>,
    ) -> Result<(), CoreError> {
        let mut storage = self.storage.write().await;
        storage.start_commit_point().await?;
        let result = async {
            if insert {
                storage.insert_operation(op).await?;
            } else {
                storage.update_operation(op).await?;
            }
            if let Some(event_type) = event {
                storage
                    .insert_event(Event::new(
                        op.namespace.clone(),
                        event_type,
                        op.id,
                        Some(op.tx),
                        None,
                        op.updated.unwrap_or(op.created),
                    ))
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
        if event.is_some() {
            self.subscriptions.nudge();
        }
        Ok(())
    }
}

// Apply an authoritative plugin status report inside the caller's commit
// point. Used by the ingress for pushed updates and by the reconciler
// through the same event channel.
pub async fn apply_operation_update<S: Storage>(
    storage: &mut S,
    update: &OperationUpdate,
    now: TimestampMillis,
) -> Result<Option<Operation>, CoreError> {
    let mut op = match storage.get_operation(&update.op).await? {
        Some(op) => op,
        None => {
            debug!("Dropping status update for unknown operation {}", update.op);
            return Ok(None);
        }
    };
    if !op.status.can_transition_to(update.status) {
        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "Ignoring {} -> {} transition for operation {}",
                op.status, update.status, op.id
            );
        }
        return Ok(None);
    }

    op.status = update.status;
    op.updated = Some(now);
    if let Some(output) = &update.output {
        op.output = Some(output.clone());
    }
    if let Some(error) = &update.error {
        op.error = Some(error.clone());
    }
    storage.update_operation(&op).await?;

    if let Some(blockchain_id) = &update.blockchain_id {
        if storage.get_transaction(&op.tx).await?.is_some() {
            storage.add_blockchain_id(&op.tx, blockchain_id).await?;
        }
    }

    if update.status.is_terminal() {
        let event_type = if update.status == OpStatus::Succeeded {
            EventType::OperationSucceeded
        } else {
            EventType::OperationFailed
        };
        storage
            .insert_event(Event::new(
                op.namespace.clone(),
                event_type,
                op.id,
                Some(op.tx),
                None,
                now,
            ))
            .await?;
    }
    Ok(Some(op))
}
