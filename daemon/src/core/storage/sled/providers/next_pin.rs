use async_trait::async_trait;
use weft_common::{crypto::Hash, pin::NextPin};

use crate::core::{
    error::CoreError,
    storage::{Column, NextPinProvider, SledStorage},
};

fn next_pin_key(context: &Hash, identity: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + identity.len());
    key.extend_from_slice(context.as_bytes());
    key.extend_from_slice(identity.as_bytes());
    key
}

#[async_trait]
impl NextPinProvider for SledStorage {
    async fn get_next_pin(
        &self,
        context: &Hash,
        identity: &str,
    ) -> Result<Option<NextPin>, CoreError> {
        self.load(Column::NextPins, &next_pin_key(context, identity))
    }

    async fn upsert_next_pin(&mut self, next_pin: &NextPin) -> Result<(), CoreError> {
        self.save(
            Column::NextPins,
            next_pin_key(&next_pin.context, &next_pin.identity),
            next_pin,
        )
    }
}
