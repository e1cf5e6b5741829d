use async_trait::async_trait;
use uuid::Uuid;
use weft_common::{
    crypto::Hash,
    operation::{OpStatus, Operation},
    time::TimestampMillis,
};

use crate::core::{
    error::CoreError,
    storage::{Column, OperationProvider, SledStorage},
};

fn op_key_index(key: &Hash, id: &Uuid) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(48);
    bytes.extend_from_slice(key.as_bytes());
    bytes.extend_from_slice(id.as_bytes());
    bytes
}

#[async_trait]
impl OperationProvider for SledStorage {
    async fn insert_operation(&mut self, op: &Operation) -> Result<(), CoreError> {
        let key = op.idempotency_key()?;
        self.save(Column::Operations, op.id.as_bytes().to_vec(), op)?;
        self.insert_raw(
            Column::OperationKeys,
            op_key_index(&key, &op.id),
            op.id.as_bytes().to_vec(),
        )
    }

    async fn update_operation(&mut self, op: &Operation) -> Result<(), CoreError> {
        if self.get_operation(&op.id).await?.is_none() {
            return Err(CoreError::NotFound("Operation"));
        }
        self.save(Column::Operations, op.id.as_bytes().to_vec(), op)
    }

    async fn get_operation(&self, id: &Uuid) -> Result<Option<Operation>, CoreError> {
        self.load(Column::Operations, id.as_bytes())
    }

    async fn get_operations_by_key(&self, key: &Hash) -> Result<Vec<Operation>, CoreError> {
        let refs = self.scan_raw(Column::OperationKeys, Some(key.as_bytes()), None)?;
        let mut ops = Vec::with_capacity(refs.len());
        for (_, id) in refs {
            let id = Uuid::from_slice(&id).map_err(|_| {
                CoreError::IntegrityViolation("Corrupt operation key index".to_owned())
            })?;
            if let Some(op) = self.get_operation(&id).await? {
                ops.push(op);
            }
        }
        ops.sort_by_key(|op| op.created);
        Ok(ops)
    }

    async fn get_pending_older_than(
        &self,
        cutoff: TimestampMillis,
    ) -> Result<Vec<Operation>, CoreError> {
        Ok(self
            .scan_values::<Operation>(Column::Operations)?
            .into_iter()
            .filter(|op| {
                op.status == OpStatus::Pending && op.updated.unwrap_or(op.created) < cutoff
            })
            .collect())
    }
}
