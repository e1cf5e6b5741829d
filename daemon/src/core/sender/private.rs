use log::debug;
use serde_json::json;
use weft_common::{
    batch::Batch,
    operation::{OpStatus, OpType, Operation},
    time::get_current_time_in_millis,
};

use crate::core::{error::CoreError, sender::BatchSenders, storage::Storage};

// Private path: the payload goes point-to-point to every group member node
// before the pin lands on-chain. Our own node already holds the batch row.
pub(super) async fn send<S: Storage>(
    senders: &BatchSenders<S>,
    batch: Batch,
) -> Result<(), CoreError> {
    let group_hash = batch
        .header
        .group
        .clone()
        .ok_or_else(|| CoreError::InvalidInput("Private batch without a group".to_owned()))?;
    let group = {
        let storage = senders.storage.read().await;
        storage.get_group(&group_hash).await?
    }
    .ok_or(CoreError::GroupNotFound(group_hash))?;
    let tx = batch
        .tx
        .as_ref()
        .ok_or(CoreError::NotFound("Transaction"))?
        .id;

    let local_node = senders.plugins.identity.local_node().to_owned();
    let peers: Vec<String> = group
        .nodes()
        .filter(|node| *node != local_node)
        .map(str::to_owned)
        .collect();

    for peer in peers {
        let op = Operation::new(
            batch.header.namespace.clone(),
            tx,
            OpType::DataExchangeSendBatch,
            senders.plugins.data_exchange.name().to_owned(),
            json!({ "batch": batch.header.id, "peer": peer.as_str() }),
            get_current_time_in_millis(),
        );
        let op = senders.runner.run_operation(op).await?;
        if op.status == OpStatus::Failed {
            return Err(CoreError::RemoteUnavailable(format!(
                "Transfer of batch {} to {} failed",
                batch.header.id, peer
            )));
        }
        if log::log_enabled!(log::Level::Debug) {
            debug!("Batch {} offered to {}", batch.header.id, peer);
        }
    }

    senders.submit_pin(&batch, None).await
}
