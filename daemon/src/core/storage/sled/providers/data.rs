use async_trait::async_trait;
use uuid::Uuid;
use weft_common::{
    crypto::Hash,
    data::{Data, DataRef},
};

use crate::core::{
    error::CoreError,
    storage::{Column, DataProvider, SledStorage},
};

#[async_trait]
impl DataProvider for SledStorage {
    async fn insert_data(&mut self, data: &Data) -> Result<(), CoreError> {
        self.save(Column::Data, data.id.as_bytes().to_vec(), data)
    }

    async fn upsert_data(&mut self, data: &Data) -> Result<(), CoreError> {
        if let Some(existing) = self.get_data(&data.id).await? {
            if existing.hash != data.hash {
                return Err(CoreError::IntegrityViolation(format!(
                    "Data {} already stored with a different hash",
                    data.id
                )));
            }
            return Ok(());
        }
        self.save(Column::Data, data.id.as_bytes().to_vec(), data)
    }

    async fn get_data(&self, id: &Uuid) -> Result<Option<Data>, CoreError> {
        self.load(Column::Data, id.as_bytes())
    }

    async fn get_data_many(&self, refs: &[DataRef]) -> Result<Vec<Data>, CoreError> {
        let mut found = Vec::with_capacity(refs.len());
        for data_ref in refs {
            if let Some(data) = self.get_data(&data_ref.id).await? {
                found.push(data);
            }
        }
        Ok(found)
    }

    async fn get_data_by_blob(&self, blob_hash: &Hash) -> Result<Vec<Data>, CoreError> {
        Ok(self
            .scan_values::<Data>(Column::Data)?
            .into_iter()
            .filter(|data| {
                data.blob
                    .as_ref()
                    .map(|blob| blob.hash == *blob_hash)
                    .unwrap_or(false)
            })
            .collect())
    }
}
