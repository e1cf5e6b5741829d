use async_trait::async_trait;
use uuid::Uuid;
use weft_common::transaction::Transaction;

use crate::core::{
    error::CoreError,
    storage::{Column, SledStorage, TransactionProvider},
};

#[async_trait]
impl TransactionProvider for SledStorage {
    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), CoreError> {
        self.save(Column::Transactions, tx.id.as_bytes().to_vec(), tx)
    }

    async fn get_transaction(&self, id: &Uuid) -> Result<Option<Transaction>, CoreError> {
        self.load(Column::Transactions, id.as_bytes())
    }

    async fn add_blockchain_id(
        &mut self,
        id: &Uuid,
        blockchain_id: &str,
    ) -> Result<(), CoreError> {
        let mut tx = self
            .get_transaction(id)
            .await?
            .ok_or(CoreError::NotFound("Transaction"))?;
        if !tx.blockchain_ids.iter().any(|known| known == blockchain_id) {
            tx.blockchain_ids.push(blockchain_id.to_owned());
            self.save(Column::Transactions, id.as_bytes().to_vec(), &tx)?;
        }
        Ok(())
    }
}
