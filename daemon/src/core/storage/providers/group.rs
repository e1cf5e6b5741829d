use async_trait::async_trait;
use weft_common::{crypto::Hash, group::Group};

use crate::core::error::CoreError;

// Groups are content-addressed by the hash of their canonical definition, so
// upserting an existing group is always a no-op rewrite of identical content
#[async_trait]
pub trait GroupProvider {
    async fn upsert_group(&mut self, group: &Group) -> Result<(), CoreError>;

    async fn get_group(&self, hash: &Hash) -> Result<Option<Group>, CoreError>;
}
