use async_trait::async_trait;
use weft_common::{crypto::Hash, data::Blob};

use crate::core::{
    error::CoreError,
    storage::{BlobProvider, Column, SledStorage},
};

#[async_trait]
impl BlobProvider for SledStorage {
    async fn upsert_blob(&mut self, blob: &Blob) -> Result<(), CoreError> {
        self.save(Column::Blobs, blob.hash.as_bytes().to_vec(), blob)
    }

    async fn get_blob(&self, hash: &Hash) -> Result<Option<Blob>, CoreError> {
        self.load(Column::Blobs, hash.as_bytes())
    }
}
