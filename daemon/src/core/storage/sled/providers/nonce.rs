use async_trait::async_trait;
use weft_common::crypto::Hash;

use crate::core::{
    error::CoreError,
    storage::{Column, NonceProvider, SledStorage},
};

#[async_trait]
impl NonceProvider for SledStorage {
    async fn get_latest_nonce(&self, key: &Hash) -> Result<Option<u64>, CoreError> {
        self.load(Column::Nonces, key.as_bytes())
    }

    async fn set_latest_nonce(&mut self, key: &Hash, nonce: u64) -> Result<(), CoreError> {
        self.save(Column::Nonces, key.as_bytes().to_vec(), &nonce)
    }
}
