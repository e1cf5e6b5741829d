use async_trait::async_trait;
use uuid::Uuid;
use weft_common::{
    crypto::Hash,
    data::{Data, DataRef},
};

use crate::core::error::CoreError;

#[async_trait]
pub trait DataProvider {
    async fn insert_data(&mut self, data: &Data) -> Result<(), CoreError>;

    async fn upsert_data(&mut self, data: &Data) -> Result<(), CoreError>;

    async fn get_data(&self, id: &Uuid) -> Result<Option<Data>, CoreError>;

    // Resolve a message's data refs; missing rows are simply absent from the
    // result so callers can detect the gap
    async fn get_data_many(&self, refs: &[DataRef]) -> Result<Vec<Data>, CoreError>;

    async fn get_data_by_blob(&self, blob_hash: &Hash) -> Result<Vec<Data>, CoreError>;
}
