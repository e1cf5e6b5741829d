use log::debug;
use serde_json::json;
use weft_common::{
    batch::Batch,
    operation::{OpStatus, OpType, Operation},
    time::get_current_time_in_millis,
};

use crate::core::{error::CoreError, sender::BatchSenders, storage::Storage};

// Broadcast path: canonical payload to shared storage, then the pin with
// the returned public reference
pub(super) async fn send<S: Storage>(
    senders: &BatchSenders<S>,
    batch: Batch,
) -> Result<(), CoreError> {
    let tx = batch
        .tx
        .as_ref()
        .ok_or(CoreError::NotFound("Transaction"))?
        .id;

    let upload = Operation::new(
        batch.header.namespace.clone(),
        tx,
        OpType::SharedStorageUploadBatch,
        senders.plugins.shared_storage.name().to_owned(),
        json!({ "batch": batch.header.id }),
        get_current_time_in_millis(),
    );
    let upload = senders.runner.run_operation(upload).await?;
    if upload.status != OpStatus::Succeeded {
        return Err(CoreError::RemoteUnavailable(format!(
            "Upload of batch {} did not complete",
            batch.header.id
        )));
    }
    let payload_ref = upload
        .output
        .as_ref()
        .and_then(|output| output.get("payload_ref"))
        .and_then(|value| value.as_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            CoreError::InvalidInput("Upload operation recorded no payload_ref".to_owned())
        })?;

    if log::log_enabled!(log::Level::Debug) {
        debug!(
            "Batch {} uploaded to shared storage as {}",
            batch.header.id, payload_ref
        );
    }
    senders.submit_pin(&batch, Some(payload_ref)).await
}
