use async_trait::async_trait;
use log::trace;
use uuid::Uuid;
use weft_common::{batch::Batch, crypto::Hash, time::TimestampMillis};

use crate::core::{
    error::CoreError,
    storage::{BatchProvider, Column, SledStorage},
};

#[async_trait]
impl BatchProvider for SledStorage {
    async fn upsert_batch(&mut self, batch: &Batch) -> Result<(), CoreError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "Upserting batch {} sealed: {}",
                batch.header.id,
                batch.is_sealed()
            );
        }
        if let Some(existing) = self.get_batch(&batch.header.id).await? {
            if existing.is_sealed() && existing.hash != batch.hash {
                return Err(CoreError::IntegrityViolation(format!(
                    "Batch {} already sealed with a different hash",
                    batch.header.id
                )));
            }
        }
        self.save(Column::Batches, batch.header.id.as_bytes().to_vec(), batch)
    }

    async fn get_batch(&self, id: &Uuid) -> Result<Option<Batch>, CoreError> {
        self.load(Column::Batches, id.as_bytes())
    }

    async fn set_batch_payload_ref(
        &mut self,
        id: &Uuid,
        payload_ref: &str,
    ) -> Result<(), CoreError> {
        let mut batch = self
            .get_batch(id)
            .await?
            .ok_or(CoreError::NotFound("Batch"))?;
        batch.payload_ref = Some(payload_ref.to_owned());
        self.save(Column::Batches, id.as_bytes().to_vec(), &batch)
    }

    async fn set_batch_confirmed(
        &mut self,
        id: &Uuid,
        when: TimestampMillis,
    ) -> Result<(), CoreError> {
        let mut batch = self
            .get_batch(id)
            .await?
            .ok_or(CoreError::NotFound("Batch"))?;
        batch.confirmed = Some(when);
        self.save(Column::Batches, id.as_bytes().to_vec(), &batch)
    }

    async fn delete_batch(&mut self, id: &Uuid) -> Result<(), CoreError> {
        self.remove_raw(Column::Batches, id.as_bytes())
    }

    async fn get_unconfirmed_batches(&self) -> Result<Vec<Batch>, CoreError> {
        Ok(self
            .scan_values::<Batch>(Column::Batches)?
            .into_iter()
            .filter(|batch| batch.is_sealed() && batch.confirmed.is_none())
            .collect())
    }

    async fn upsert_pending_payload(
        &mut self,
        hash: &Hash,
        payload: &[u8],
    ) -> Result<(), CoreError> {
        self.insert_raw(
            Column::PendingPayloads,
            hash.as_bytes().to_vec(),
            payload.to_vec(),
        )
    }

    async fn get_pending_payload(&self, hash: &Hash) -> Result<Option<Vec<u8>>, CoreError> {
        self.get_raw(Column::PendingPayloads, hash.as_bytes())
    }

    async fn delete_pending_payload(&mut self, hash: &Hash) -> Result<(), CoreError> {
        self.remove_raw(Column::PendingPayloads, hash.as_bytes())
    }
}
