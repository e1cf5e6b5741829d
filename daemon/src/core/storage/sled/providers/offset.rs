use async_trait::async_trait;
use weft_common::offset::{Offset, OffsetKind};

use crate::core::{
    error::CoreError,
    storage::{Column, OffsetProvider, SledStorage},
};

fn offset_key(kind: OffsetKind, name: &str) -> Vec<u8> {
    format!("{}:{}", kind, name).into_bytes()
}

#[async_trait]
impl OffsetProvider for SledStorage {
    async fn get_offset(
        &self,
        kind: OffsetKind,
        name: &str,
    ) -> Result<Option<Offset>, CoreError> {
        self.load(Column::Offsets, &offset_key(kind, name))
    }

    async fn upsert_offset(&mut self, offset: &Offset) -> Result<(), CoreError> {
        self.save(
            Column::Offsets,
            offset_key(offset.kind, &offset.name),
            offset,
        )
    }

    async fn delete_offset(&mut self, kind: OffsetKind, name: &str) -> Result<(), CoreError> {
        self.remove_raw(Column::Offsets, &offset_key(kind, name))
    }
}
