use async_trait::async_trait;
use weft_common::offset::{Offset, OffsetKind};

use crate::core::error::CoreError;

#[async_trait]
pub trait OffsetProvider {
    async fn get_offset(
        &self,
        kind: OffsetKind,
        name: &str,
    ) -> Result<Option<Offset>, CoreError>;

    async fn upsert_offset(&mut self, offset: &Offset) -> Result<(), CoreError>;

    async fn delete_offset(&mut self, kind: OffsetKind, name: &str) -> Result<(), CoreError>;
}
