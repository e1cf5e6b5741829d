use async_trait::async_trait;
use uuid::Uuid;
use weft_common::{crypto::Hash, operation::Operation, time::TimestampMillis};

use crate::core::error::CoreError;

#[async_trait]
pub trait OperationProvider {
    async fn insert_operation(&mut self, op: &Operation) -> Result<(), CoreError>;

    // Full-row rewrite, the runner owns the status transition rules
    async fn update_operation(&mut self, op: &Operation) -> Result<(), CoreError>;

    async fn get_operation(&self, id: &Uuid) -> Result<Option<Operation>, CoreError>;

    // All attempts sharing one idempotency key, ascending creation
    async fn get_operations_by_key(&self, key: &Hash) -> Result<Vec<Operation>, CoreError>;

    // Pending operations not updated since the cutoff, for reconciliation
    async fn get_pending_older_than(
        &self,
        cutoff: TimestampMillis,
    ) -> Result<Vec<Operation>, CoreError>;
}
