use async_trait::async_trait;
use uuid::Uuid;
use weft_common::tokens::{TokenApproval, TokenPool, TokenTransfer};

use crate::core::{
    error::CoreError,
    storage::{Column, SledStorage, TokenProvider},
};

#[async_trait]
impl TokenProvider for SledStorage {
    async fn upsert_token_pool(&mut self, pool: &TokenPool) -> Result<(), CoreError> {
        self.save(Column::TokenPools, pool.id.as_bytes().to_vec(), pool)
    }

    async fn get_token_pool(&self, id: &Uuid) -> Result<Option<TokenPool>, CoreError> {
        self.load(Column::TokenPools, id.as_bytes())
    }

    async fn get_token_pool_by_locator(
        &self,
        connector: &str,
        locator: &str,
    ) -> Result<Option<TokenPool>, CoreError> {
        Ok(self
            .scan_values::<TokenPool>(Column::TokenPools)?
            .into_iter()
            .find(|pool| pool.connector == connector && pool.locator == locator))
    }

    async fn upsert_token_transfer(
        &mut self,
        transfer: &TokenTransfer,
    ) -> Result<(), CoreError> {
        self.save(
            Column::TokenTransfers,
            transfer.local_id.as_bytes().to_vec(),
            transfer,
        )
    }

    async fn get_token_transfer(
        &self,
        local_id: &Uuid,
    ) -> Result<Option<TokenTransfer>, CoreError> {
        self.load(Column::TokenTransfers, local_id.as_bytes())
    }

    async fn upsert_token_approval(
        &mut self,
        approval: &TokenApproval,
    ) -> Result<(), CoreError> {
        self.save(
            Column::TokenApprovals,
            approval.local_id.as_bytes().to_vec(),
            approval,
        )
    }

    async fn get_token_approval(
        &self,
        local_id: &Uuid,
    ) -> Result<Option<TokenApproval>, CoreError> {
        self.load(Column::TokenApprovals, local_id.as_bytes())
    }
}
