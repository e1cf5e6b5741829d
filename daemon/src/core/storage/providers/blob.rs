use async_trait::async_trait;
use weft_common::{crypto::Hash, data::Blob};

use crate::core::error::CoreError;

// Local blob availability, maintained from data exchange receipts
#[async_trait]
pub trait BlobProvider {
    async fn upsert_blob(&mut self, blob: &Blob) -> Result<(), CoreError>;

    async fn get_blob(&self, hash: &Hash) -> Result<Option<Blob>, CoreError>;
}
