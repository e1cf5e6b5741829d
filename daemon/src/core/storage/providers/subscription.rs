use async_trait::async_trait;
use uuid::Uuid;
use weft_common::subscription::Subscription;

use crate::core::error::CoreError;

#[async_trait]
pub trait SubscriptionProvider {
    // Insert or update. Returns IdMismatch if (namespace, name) is already
    // taken by a different subscription id.
    async fn upsert_subscription(&mut self, sub: &Subscription) -> Result<(), CoreError>;

    async fn get_subscription(&self, id: &Uuid) -> Result<Option<Subscription>, CoreError>;

    async fn get_subscription_by_name(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, CoreError>;

    async fn get_subscriptions(&self) -> Result<Vec<Subscription>, CoreError>;

    async fn delete_subscription(&mut self, id: &Uuid) -> Result<(), CoreError>;

    // Deliveries given up on after exhausting retries; kept for operator
    // inspection, skipped by the dispatcher
    async fn record_dead_letter(&mut self, sub: &Uuid, sequence: u64) -> Result<(), CoreError>;

    async fn get_dead_letters(&self, sub: &Uuid) -> Result<Vec<u64>, CoreError>;
}
