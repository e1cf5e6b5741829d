use async_trait::async_trait;
use uuid::Uuid;
use weft_common::transaction::Transaction;

use crate::core::error::CoreError;

#[async_trait]
pub trait TransactionProvider {
    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), CoreError>;

    async fn get_transaction(&self, id: &Uuid) -> Result<Option<Transaction>, CoreError>;

    // Record an on-chain transaction hash against the logical transaction,
    // de-duplicated
    async fn add_blockchain_id(
        &mut self,
        id: &Uuid,
        blockchain_id: &str,
    ) -> Result<(), CoreError>;
}
