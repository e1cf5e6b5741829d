use async_trait::async_trait;
use weft_common::crypto::Hash;

use crate::core::error::CoreError;

// Per-(context, author) nonce counters, keyed by `pin::nonce_key`. Read and
// advanced inside the sealing commit point only.
#[async_trait]
pub trait NonceProvider {
    async fn get_latest_nonce(&self, key: &Hash) -> Result<Option<u64>, CoreError>;

    async fn set_latest_nonce(&mut self, key: &Hash, nonce: u64) -> Result<(), CoreError>;
}
