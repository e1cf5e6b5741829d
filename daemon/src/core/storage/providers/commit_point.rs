use async_trait::async_trait;

use crate::core::error::CoreError;

// Begin/commit/rollback over the snapshot overlay. A component holds at most
// one commit point at a time; the storage lock serializes writers.
#[async_trait]
pub trait CommitPointProvider {
    async fn start_commit_point(&mut self) -> Result<(), CoreError>;

    // apply = true commits the buffered changes, false discards them
    async fn end_commit_point(&mut self, apply: bool) -> Result<(), CoreError>;

    fn has_commit_point(&self) -> bool;
}
