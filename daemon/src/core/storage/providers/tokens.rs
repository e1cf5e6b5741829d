use async_trait::async_trait;
use uuid::Uuid;
use weft_common::tokens::{TokenApproval, TokenPool, TokenTransfer};

use crate::core::error::CoreError;

#[async_trait]
pub trait TokenProvider {
    async fn upsert_token_pool(&mut self, pool: &TokenPool) -> Result<(), CoreError>;

    async fn get_token_pool(&self, id: &Uuid) -> Result<Option<TokenPool>, CoreError>;

    // Pools are correlated back from plugin events by (connector, locator)
    async fn get_token_pool_by_locator(
        &self,
        connector: &str,
        locator: &str,
    ) -> Result<Option<TokenPool>, CoreError>;

    async fn upsert_token_transfer(&mut self, transfer: &TokenTransfer)
        -> Result<(), CoreError>;

    async fn get_token_transfer(
        &self,
        local_id: &Uuid,
    ) -> Result<Option<TokenTransfer>, CoreError>;

    async fn upsert_token_approval(
        &mut self,
        approval: &TokenApproval,
    ) -> Result<(), CoreError>;

    async fn get_token_approval(
        &self,
        local_id: &Uuid,
    ) -> Result<Option<TokenApproval>, CoreError>;
}
