use async_trait::async_trait;
use weft_common::{crypto::Hash, group::Group};

use crate::core::{
    error::CoreError,
    storage::{Column, GroupProvider, SledStorage},
};

#[async_trait]
impl GroupProvider for SledStorage {
    async fn upsert_group(&mut self, group: &Group) -> Result<(), CoreError> {
        self.save(Column::Groups, group.hash.as_bytes().to_vec(), group)
    }

    async fn get_group(&self, hash: &Hash) -> Result<Option<Group>, CoreError> {
        self.load(Column::Groups, hash.as_bytes())
    }
}
