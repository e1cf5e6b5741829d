use async_trait::async_trait;
use weft_common::{crypto::Hash, pin::NextPin};

use crate::core::error::CoreError;

// Aggregator consumption pointers: the next expected nonce per
// (context, author)
#[async_trait]
pub trait NextPinProvider {
    async fn get_next_pin(
        &self,
        context: &Hash,
        identity: &str,
    ) -> Result<Option<NextPin>, CoreError>;

    async fn upsert_next_pin(&mut self, next_pin: &NextPin) -> Result<(), CoreError>;
}
