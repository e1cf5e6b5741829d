use async_trait::async_trait;
use uuid::Uuid;
use weft_common::{batch::Batch, crypto::Hash, time::TimestampMillis};

use crate::core::error::CoreError;

#[async_trait]
pub trait BatchProvider {
    // Insert or overwrite by id. Returns IntegrityViolation if a sealed row
    // with this id exists under a different payload hash.
    async fn upsert_batch(&mut self, batch: &Batch) -> Result<(), CoreError>;

    async fn get_batch(&self, id: &Uuid) -> Result<Option<Batch>, CoreError>;

    async fn set_batch_payload_ref(
        &mut self,
        id: &Uuid,
        payload_ref: &str,
    ) -> Result<(), CoreError>;

    async fn set_batch_confirmed(
        &mut self,
        id: &Uuid,
        when: TimestampMillis,
    ) -> Result<(), CoreError>;

    // Open (unsealed) batches are discarded on restart, their messages
    // return to staged
    async fn delete_batch(&mut self, id: &Uuid) -> Result<(), CoreError>;

    // Sealed batches not yet confirmed on-chain, for send recovery
    async fn get_unconfirmed_batches(&self) -> Result<Vec<Batch>, CoreError>;

    // Wire payloads that arrived over the data exchange before their pin,
    // parked by payload hash until the pin binds them to a batch id
    async fn upsert_pending_payload(
        &mut self,
        hash: &Hash,
        payload: &[u8],
    ) -> Result<(), CoreError>;

    async fn get_pending_payload(&self, hash: &Hash) -> Result<Option<Vec<u8>>, CoreError>;

    async fn delete_pending_payload(&mut self, hash: &Hash) -> Result<(), CoreError>;
}
