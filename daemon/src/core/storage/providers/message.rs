use async_trait::async_trait;
use uuid::Uuid;
use weft_common::{
    message::{Message, MessageState},
    query::{Filter, QueryParams},
    time::TimestampMillis,
};

use crate::core::{batch::BatchKey, error::CoreError};

#[async_trait]
pub trait MessageProvider {
    async fn insert_message(&mut self, message: &Message) -> Result<(), CoreError>;

    // Insert or overwrite by id. Returns IntegrityViolation if a row with
    // this id exists under a different content hash.
    async fn upsert_message(&mut self, message: &Message) -> Result<(), CoreError>;

    async fn get_message(&self, id: &Uuid) -> Result<Option<Message>, CoreError>;

    // Staged outbound messages for one dispatcher key, ascending creation
    async fn get_staged_messages(
        &self,
        key: &BatchKey,
        limit: usize,
    ) -> Result<Vec<Message>, CoreError>;

    async fn get_messages_in_state(
        &self,
        state: MessageState,
    ) -> Result<Vec<Message>, CoreError>;

    // Messages referencing a given data element, used for blob rewinds
    async fn get_messages_for_data(&self, data_id: &Uuid) -> Result<Vec<Message>, CoreError>;

    async fn set_message_batch(
        &mut self,
        id: &Uuid,
        batch: &Uuid,
        state: MessageState,
    ) -> Result<(), CoreError>;

    async fn set_message_confirmed(
        &mut self,
        id: &Uuid,
        state: MessageState,
        when: TimestampMillis,
    ) -> Result<(), CoreError>;

    async fn query_messages(
        &self,
        namespace: &str,
        filter: Option<&Filter>,
        params: &QueryParams,
    ) -> Result<Vec<Message>, CoreError>;
}
