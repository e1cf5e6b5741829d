use async_trait::async_trait;
use uuid::Uuid;
use weft_common::subscription::Subscription;

use crate::core::{
    error::CoreError,
    storage::{sled::decode_u64, Column, SledStorage, SubscriptionProvider},
};

fn dead_letter_key(sub: &Uuid, sequence: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(sub.as_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

#[async_trait]
impl SubscriptionProvider for SledStorage {
    async fn upsert_subscription(&mut self, sub: &Subscription) -> Result<(), CoreError> {
        if let Some(existing) = self
            .get_subscription_by_name(&sub.namespace, &sub.name)
            .await?
        {
            if existing.id != sub.id {
                return Err(CoreError::IdMismatch);
            }
        }
        self.save(Column::Subscriptions, sub.id.as_bytes().to_vec(), sub)
    }

    async fn get_subscription(&self, id: &Uuid) -> Result<Option<Subscription>, CoreError> {
        self.load(Column::Subscriptions, id.as_bytes())
    }

    async fn get_subscription_by_name(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, CoreError> {
        Ok(self
            .scan_values::<Subscription>(Column::Subscriptions)?
            .into_iter()
            .find(|sub| sub.namespace == namespace && sub.name == name))
    }

    async fn get_subscriptions(&self) -> Result<Vec<Subscription>, CoreError> {
        self.scan_values(Column::Subscriptions)
    }

    async fn delete_subscription(&mut self, id: &Uuid) -> Result<(), CoreError> {
        self.remove_raw(Column::Subscriptions, id.as_bytes())
    }

    async fn record_dead_letter(&mut self, sub: &Uuid, sequence: u64) -> Result<(), CoreError> {
        self.insert_raw(
            Column::DeadLetters,
            dead_letter_key(sub, sequence),
            sequence.to_be_bytes().to_vec(),
        )
    }

    async fn get_dead_letters(&self, sub: &Uuid) -> Result<Vec<u64>, CoreError> {
        self.scan_raw(Column::DeadLetters, Some(sub.as_bytes()), None)?
            .into_iter()
            .map(|(_, value)| decode_u64(&value))
            .collect()
    }
}
